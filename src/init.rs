use crate::config::{ConfigError, SinkOptions};
use crate::layer::{LogShipperLayer, ShipperHandle, ShipperSettings};
use crate::newrelic::NewRelicLogsSink;
use crate::selflog::TracingDiagnostics;
use crate::sink::BatchedLogSink;
use crate::transport::SendError;
use std::sync::Arc;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Configuration of the logging layer.
///
/// **Fields**
/// - `shipper`: channel size, batch size, flush interval, minimum level
///   and linking metadata of the [`LogShipperLayer`].
/// - `enable_stdout`: if `true`, a `tracing_subscriber::fmt::Layer` is
///   stacked on top so events (and this crate's diagnostics) are also
///   printed to the console.
#[derive(Clone)]
pub struct LayerConfig {
    pub shipper: ShipperSettings,
    pub enable_stdout: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            shipper: ShipperSettings::default(),
            enable_stdout: true,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to create New Relic sink: {0}")]
    Sink(#[from] SendError),

    #[error(transparent)]
    SetGlobalDefault(#[from] SetGlobalDefaultError),
}

/// Install a global `tracing` subscriber that ships events to `sink`.
///
/// **Parameters**
/// - `sink`: the [`BatchedLogSink`] receiving batches of events.
/// - `config`: [`LayerConfig`] controlling buffering and batching.
///
/// **Returns**
/// - The [`ShipperHandle`]; call [`ShipperHandle::shutdown`] before the
///   process exits so the last batch is sent.
///
/// Must be called within a Tokio runtime.
pub fn init_tracing_with_config(
    sink: Arc<dyn BatchedLogSink>,
    config: LayerConfig,
) -> Result<ShipperHandle, InitError> {
    let (layer, handle) = LogShipperLayer::new(sink, config.shipper, Arc::new(TracingDiagnostics));

    // The two stacks have different types, so each branch installs its own.
    if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(handle)
}

/// Initialize tracing with [`LayerConfig::default`].
pub fn init_tracing(sink: Arc<dyn BatchedLogSink>) -> Result<ShipperHandle, InitError> {
    init_tracing_with_config(sink, LayerConfig::default())
}

/// Resolve `options` (falling back to the environment), build a
/// [`NewRelicLogsSink`] and install it. The recommended entrypoint for
/// typical services.
pub fn init_newrelic(options: SinkOptions, config: LayerConfig) -> Result<ShipperHandle, InitError> {
    let sink = NewRelicLogsSink::new(options.resolve()?)?;
    init_tracing_with_config(Arc::new(sink), config)
}
