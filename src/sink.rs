use crate::event::LogEvent;
use async_trait::async_trait;

/// Asynchronous destination for batches of [`LogEvent`]s produced by the
/// logging layer.
///
/// Implementations transport a whole batch to a concrete backend. The
/// layer calls `emit_batch` from its background batching task, one batch at
/// a time, and never from an application thread.
#[async_trait]
pub trait BatchedLogSink: Send + Sync {
    /// Deliver one batch.
    ///
    /// **Parameters**
    /// - `events`: the batch, in the order the events were emitted.
    ///
    /// This method has no error channel: a sink must absorb every failure
    /// (report it through its diagnostics and drop the batch). The layer
    /// never retries.
    async fn emit_batch(&self, events: Vec<LogEvent>);

    /// Called when a flush interval elapsed with nothing buffered.
    ///
    /// Default implementation is a no-op.
    async fn on_empty_batch(&self) {}

    /// Flush anything the sink buffers itself. Called once on shutdown,
    /// after the final batch.
    ///
    /// Default implementation is a no-op.
    async fn flush(&self) {}
}
