use crate::config::ApiKey;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::io::Write;
use std::time::Duration;

/// Bound on a single send. Delivery is best effort; this only keeps a dead
/// endpoint from holding the batching task forever.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(40);

const API_KEY_HEADER: &str = "api-key";

/// Reasons a batch could not be delivered.
#[derive(thiserror::Error, Debug)]
pub enum SendError {
    #[error("failed to gzip request body: {0}")]
    Compression(#[source] std::io::Error),

    #[error("invalid `{name}` header value")]
    InvalidHeader { name: &'static str },

    #[error("failed to build request: {0}")]
    Request(#[source] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("unexpected response status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
}

/// Gzip-compresses `body`.
pub fn gzip(body: &[u8]) -> Result<Vec<u8>, SendError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), Compression::default());
    encoder.write_all(body).map_err(SendError::Compression)?;
    encoder.finish().map_err(SendError::Compression)
}

/// HTTP client for the New Relic Log API.
#[derive(Clone, Debug)]
pub struct Transport {
    client: Client,
    endpoint_url: String,
    api_key: ApiKey,
    timeout: Duration,
}

impl Transport {
    pub fn new(endpoint_url: impl Into<String>, api_key: ApiKey, timeout: Duration) -> Result<Self, SendError> {
        // one request per batch; connections are not kept alive between batches
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(SendError::Request)?;

        Ok(Transport {
            client,
            endpoint_url: endpoint_url.into(),
            api_key,
            timeout,
        })
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    fn headers(&self) -> Result<HeaderMap, SendError> {
        let mut headers = HeaderMap::new();
        let mut api_key = HeaderValue::from_str(self.api_key.value())
            .map_err(|_| SendError::InvalidHeader { name: API_KEY_HEADER })?;
        api_key.set_sensitive(true);
        headers.insert(HeaderName::from_static(API_KEY_HEADER), api_key);
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        Ok(headers)
    }

    /// Compress and POST `body` (a serialized payload).
    ///
    /// **Returns**
    /// - `Ok(())` only if New Relic answered `202 Accepted`.
    /// - `Err(..)` for any other status, any transport fault, or a request
    ///   that could not be built. Nothing is retried.
    pub async fn send(&self, body: &[u8]) -> Result<(), SendError> {
        let compressed = gzip(body)?;

        let request = self
            .client
            .post(&self.endpoint_url)
            .headers(self.headers()?)
            .body(compressed)
            .build()
            .map_err(SendError::Request)?;

        let response = self.client.execute(request).await.map_err(|e| {
            if e.is_timeout() {
                SendError::Timeout(self.timeout)
            } else {
                SendError::Transport(e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(SendError::UnexpectedStatus { status, body })
        }
    }
}
