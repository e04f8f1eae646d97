use crate::config::NewRelicConfig;
use crate::event::LogEvent;
use crate::payload::PayloadBuilder;
use crate::selflog::{Diagnostic, Diagnostics, TracingDiagnostics};
use crate::serialize::{serialize, KeyCasing};
use crate::sink::BatchedLogSink;
use crate::transport::{SendError, Transport};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// New Relic Logs implementation of [`BatchedLogSink`].
///
/// Each batch is converted into one payload, serialized, gzipped and POSTed
/// to the Log API. Failures of any kind are reported through the sink's
/// [`Diagnostics`] and the batch is dropped.
#[derive(Clone)]
pub struct NewRelicLogsSink {
    builder: PayloadBuilder,
    transport: Transport,
    key_casing: KeyCasing,
    diagnostics: Arc<dyn Diagnostics>,
}

impl NewRelicLogsSink {
    /// Construct a sink reporting through [`TracingDiagnostics`].
    ///
    /// **Returns**
    /// - `Err(..)` only if the HTTP client could not be created.
    pub fn new(config: NewRelicConfig) -> Result<Self, SendError> {
        Self::with_diagnostics(config, Arc::new(TracingDiagnostics))
    }

    pub fn with_diagnostics(
        config: NewRelicConfig,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Result<Self, SendError> {
        let transport = Transport::new(config.endpoint_url, config.api_key, config.send_timeout)?;
        let builder = PayloadBuilder::new(
            config.application_name,
            config.format_provider,
            Arc::clone(&diagnostics),
        );

        Ok(Self {
            builder,
            transport,
            key_casing: config.key_casing,
            diagnostics,
        })
    }

    pub fn endpoint_url(&self) -> &str {
        self.transport.endpoint_url()
    }

    pub fn application_name(&self) -> &str {
        self.builder.application_name()
    }

    // Runs the request on its own task so a slow endpoint never stalls the
    // caller's executor thread, but still waits for the outcome.
    async fn send(&self, body: Vec<u8>) -> Result<(), String> {
        let transport = self.transport.clone();
        match tokio::spawn(async move { transport.send(&body).await }).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(join_error) => Err(format!("send task failed: {}", join_error)),
        }
    }
}

#[async_trait]
impl BatchedLogSink for NewRelicLogsSink {
    async fn emit_batch(&self, events: Vec<LogEvent>) {
        let (payload, dropped) = self.builder.build_payload(&events);
        if payload.logs.is_empty() {
            debug!("all {} events in batch were dropped; nothing to send", dropped);
            return;
        }

        let body = match serialize(&payload, self.key_casing) {
            Ok(body) => body,
            Err(e) => {
                self.diagnostics.record(Diagnostic::SerializationFailed {
                    events: payload.logs.len(),
                    error: e.to_string(),
                });
                return;
            }
        };

        let count = payload.logs.len();
        drop(payload);

        match self.send(body).await {
            Ok(()) => debug!("shipped {} log items to {}", count, self.endpoint_url()),
            Err(error) => self
                .diagnostics
                .record(Diagnostic::BatchDropped { events: count, error }),
        }
    }
}
