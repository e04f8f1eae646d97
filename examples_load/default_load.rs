use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use newrelic_logs::init::{init_tracing_with_config, LayerConfig};
use newrelic_logs::noop_sink::NoopSink;

#[tokio::main]
async fn main() {
    let sink = Arc::new(NoopSink::default());
    let config = LayerConfig {
        enable_stdout: false,
        ..Default::default()
    };
    let handle = init_tracing_with_config(sink.clone(), config).expect("install subscriber");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        info!(iteration = i, "default load test event");
    }

    let elapsed = start.elapsed();
    handle.shutdown().await;

    println!("default config: emitted {} events in {:?} (~{:.0} ev/s), {} reached the sink",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64(),
        sink.events_seen(),
    );
}
