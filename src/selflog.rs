use std::fmt;
use std::sync::{Arc, Mutex};

/// Internal failure that was absorbed instead of reaching the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// One event could not be turned into a log item and was skipped.
    EventDropped { error: String },
    /// A later attribute replaced an earlier one with the same key.
    AttributeOverwritten { key: String },
    /// The payload could not be serialized; the whole batch was dropped.
    SerializationFailed { events: usize, error: String },
    /// The batch could not be delivered and was dropped without retry.
    BatchDropped { events: usize, error: String },
    /// The layer's channel was full; the event never reached a batch.
    ChannelFull,
    /// The batching task has stopped; events are no longer shipped.
    ChannelClosed,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::EventDropped { error } => {
                write!(f, "log event could not be formatted and was dropped: {}", error)
            }
            Diagnostic::AttributeOverwritten { key } => {
                write!(f, "attribute `{}` was set more than once; keeping the last value", key)
            }
            Diagnostic::SerializationFailed { events, error } => {
                write!(f, "batch of {} events could not be serialized and was dropped: {}", events, error)
            }
            Diagnostic::BatchDropped { events, error } => {
                write!(f, "batch of {} events could not be sent to New Relic Logs and was dropped: {}", events, error)
            }
            Diagnostic::ChannelFull => write!(f, "log channel full, dropping log event"),
            Diagnostic::ChannelClosed => {
                write!(f, "log shipper has stopped, further log events are dropped")
            }
        }
    }
}

/// Destination for [`Diagnostic`]s.
///
/// Implementations must never panic or block for long; they are called
/// from the batching task and, for [`Diagnostic::ChannelFull`], from the
/// application thread that emitted the event.
pub trait Diagnostics: Send + Sync {
    fn record(&self, diagnostic: Diagnostic);
}

/// Reports diagnostics as `tracing` events under this crate's target.
///
/// The batching layer ignores its own crate's targets, so these records
/// reach other subscribers (stdout, files) but are never shipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn record(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::AttributeOverwritten { .. }
            | Diagnostic::ChannelFull
            | Diagnostic::ChannelClosed => {
                tracing::warn!("{}", diagnostic)
            }
            _ => tracing::error!("{}", diagnostic),
        }
    }
}

/// Keeps every diagnostic in memory.
#[derive(Debug, Clone, Default)]
pub struct CollectingDiagnostics {
    records: Arc<Mutex<Vec<Diagnostic>>>,
}

impl CollectingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Diagnostic> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Diagnostics for CollectingDiagnostics {
    fn record(&self, diagnostic: Diagnostic) {
        match self.records.lock() {
            Ok(mut records) => records.push(diagnostic),
            Err(poisoned) => poisoned.into_inner().push(diagnostic),
        }
    }
}
