use crate::event::LogEvent;
use crate::sink::BatchedLogSink;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// A sink that drops every batch, counting the events it was handed.
///
/// Useful for measuring the overhead of the layer itself without any
/// network I/O, and for tests that don't care about delivery.
#[derive(Default)]
pub struct NoopSink {
    events: AtomicU64,
}

impl NoopSink {
    pub fn events_seen(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BatchedLogSink for NoopSink {
    async fn emit_batch(&self, events: Vec<LogEvent>) {
        self.events.fetch_add(events.len() as u64, Ordering::Relaxed);
    }
}
