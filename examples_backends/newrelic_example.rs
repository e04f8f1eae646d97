use std::sync::Arc;

use newrelic_logs::config::{Endpoint, SinkOptions};
use newrelic_logs::init::{init_newrelic, LayerConfig};
use newrelic_logs::layer::ShipperSettings;
use tracing::{error, info, warn};

/// Ships a few events to New Relic Logs.
///
/// Reads `NEW_RELIC_LICENSE_KEY` (and `NEW_RELIC_APP_NAME` when the name
/// below is removed) from the environment. Set `NEW_RELIC_REGION=eu` to use
/// the EU endpoint.
#[tokio::main]
async fn main() {
    let endpoint = match std::env::var("NEW_RELIC_REGION").as_deref() {
        Ok("eu") => Endpoint::Eu,
        _ => Endpoint::Us,
    };

    let options = SinkOptions {
        endpoint,
        application_name: Some("newrelic-logs-example".to_string()),
        ..Default::default()
    };
    let config = LayerConfig {
        shipper: ShipperSettings {
            linking_metadata: Some(Arc::new(|| {
                Some(vec![
                    ("trace.id".to_string(), "4bf92f3577b34da6a3ce929d0e0e4736".to_string()),
                    ("span.id".to_string(), "00f067aa0ba902b7".to_string()),
                ])
            })),
            ..Default::default()
        },
        ..Default::default()
    };

    let handle = init_newrelic(options, config).expect("failed to set up New Relic logging");

    // Formatted messages are shipped as is; a template is rendered against the fields.
    info!(message_template = "Hello {Name}", Name = "Ada");
    warn!(queue_depth = 17u64, "queue is filling up");

    let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "upstream timed out");
    error!(error = &err as &(dyn std::error::Error + 'static), "checkout failed");

    handle.shutdown().await;
}
