use crate::serialize::KeyCasing;
use crate::template::{FormatProvider, InvariantFormat};
use crate::transport::DEFAULT_SEND_TIMEOUT;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// US Log API endpoint.
pub const US_ENDPOINT: &str = "https://log-api.newrelic.com/log/v1";

/// EU Log API endpoint.
pub const EU_ENDPOINT: &str = "https://log-api.eu.newrelic.com/log/v1";

/// Application name used when none is passed explicitly.
pub const NEW_RELIC_APP_NAME_ENV: &str = "NEW_RELIC_APP_NAME";

/// License key used when neither key is passed explicitly.
pub const NEW_RELIC_LICENSE_KEY_ENV: &str = "NEW_RELIC_LICENSE_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Endpoint {
    #[default]
    Us,
    Eu,
    Custom(String),
}

impl Endpoint {
    pub fn url(&self) -> &str {
        match self {
            Endpoint::Us => US_ENDPOINT,
            Endpoint::Eu => EU_ENDPOINT,
            Endpoint::Custom(url) => url,
        }
    }
}

/// Value of the `Api-Key` header.
#[derive(Clone, PartialEq, Eq)]
pub enum ApiKey {
    License(String),
    Insert(String),
}

impl ApiKey {
    /// Pick the key to authenticate with. The license key wins when both are
    /// given; blank keys count as absent.
    pub fn select(license_key: Option<&str>, insert_key: Option<&str>) -> Option<ApiKey> {
        non_blank(license_key)
            .map(ApiKey::License)
            .or_else(|| non_blank(insert_key).map(ApiKey::Insert))
    }

    pub fn value(&self) -> &str {
        match self {
            ApiKey::License(key) | ApiKey::Insert(key) => key,
        }
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiKey::License(_) => write!(f, "ApiKey::License(<redacted>)"),
            ApiKey::Insert(_) => write!(f, "ApiKey::Insert(<redacted>)"),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("an application name must be supplied either as a parameter or through NEW_RELIC_APP_NAME")]
    MissingApplicationName,

    #[error("the New Relic Logs API endpoint URL must be supplied")]
    MissingEndpoint,

    #[error("either a license key or an insert key must be supplied")]
    MissingApiKey,
}

/// Explicit sink parameters, before falling back to the environment.
#[derive(Clone, Debug, Default)]
pub struct SinkOptions {
    pub endpoint: Endpoint,
    pub application_name: Option<String>,
    pub license_key: Option<String>,
    pub insert_key: Option<String>,
    /// Camel-case the payload's schema keys; see [`KeyCasing`].
    pub enforce_camel_case: bool,
    pub send_timeout: Option<Duration>,
}

impl SinkOptions {
    /// Resolve against the process environment.
    pub fn resolve(self) -> Result<NewRelicConfig, ConfigError> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve using `env` to look up fallbacks.
    ///
    /// Order: explicit parameter, then environment variable. Fails with the
    /// first missing piece of configuration.
    pub fn resolve_with<F>(self, env: F) -> Result<NewRelicConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let application_name = non_blank(self.application_name.as_deref())
            .or_else(|| non_blank(env(NEW_RELIC_APP_NAME_ENV).as_deref()))
            .ok_or(ConfigError::MissingApplicationName)?;

        let endpoint_url =
            non_blank(Some(self.endpoint.url())).ok_or(ConfigError::MissingEndpoint)?;

        let api_key = ApiKey::select(self.license_key.as_deref(), self.insert_key.as_deref())
            .or_else(|| non_blank(env(NEW_RELIC_LICENSE_KEY_ENV).as_deref()).map(ApiKey::License))
            .ok_or(ConfigError::MissingApiKey)?;

        Ok(NewRelicConfig {
            endpoint_url,
            application_name,
            api_key,
            key_casing: KeyCasing::from_enforce_camel_case(self.enforce_camel_case),
            send_timeout: self.send_timeout.unwrap_or(DEFAULT_SEND_TIMEOUT),
            format_provider: Arc::new(InvariantFormat),
        })
    }
}

/// Validated configuration consumed by [`NewRelicLogsSink`](crate::newrelic::NewRelicLogsSink).
#[derive(Clone)]
pub struct NewRelicConfig {
    pub endpoint_url: String,
    pub application_name: String,
    pub api_key: ApiKey,
    pub key_casing: KeyCasing,
    pub send_timeout: Duration,
    pub format_provider: Arc<dyn FormatProvider>,
}

impl NewRelicConfig {
    pub fn with_format_provider(mut self, provider: Arc<dyn FormatProvider>) -> Self {
        self.format_provider = provider;
        self
    }

    pub fn with_key_casing(mut self, casing: KeyCasing) -> Self {
        self.key_casing = casing;
        self
    }
}

impl fmt::Debug for NewRelicConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewRelicConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("application_name", &self.application_name)
            .field("api_key", &self.api_key)
            .field("key_casing", &self.key_casing)
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}
