use crate::event::{ExceptionInfo, LogEvent, LogLevel, PropertyValue, Scalar};
use crate::payload::LINKING_METADATA_KEY;
use crate::selflog::{Diagnostic, Diagnostics};
use crate::sink::BatchedLogSink;
use crate::template::escape;
use std::sync::{Arc, atomic::{AtomicBool, AtomicU64, Ordering}};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events from this crate's own targets are never shipped.
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Crates on the send path. Their events are emitted while a batch is in
/// flight and would otherwise be shipped in the next one, forever.
const TRANSPORT_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "h2", "want"];

/// Field carrying a message template to render against the event's other
/// fields, e.g. `info!(message_template = "Hello {Name}", Name = "Ada")`.
pub const MESSAGE_TEMPLATE_FIELD: &str = "message_template";

fn is_under(target: &str, root: &str) -> bool {
    target
        .strip_prefix(root)
        .map_or(false, |rest| rest.is_empty() || rest.starts_with("::"))
}

fn is_excluded_target(target: &str) -> bool {
    is_under(target, OWN_TARGET) || TRANSPORT_TARGETS.iter().any(|root| is_under(target, root))
}

/// Supplies distributed-trace identifiers for the current event, e.g.
/// `trace.id` and `span.id`. The result is attached under
/// [`LINKING_METADATA_KEY`] and flattened onto the log item.
pub type LinkingMetadataFn = Arc<dyn Fn() -> Option<Vec<(String, String)>> + Send + Sync>;

/// Batching settings of [`LogShipperLayer`].
#[derive(Clone)]
pub struct ShipperSettings {
    pub channel_buffer: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Least severe level that is captured. Events from this crate and from
    /// the HTTP stack it sends with are never captured, at any level.
    pub min_level: Level,
    pub linking_metadata: Option<LinkingMetadataFn>,
}

impl Default for ShipperSettings {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            batch_size: 128,
            flush_interval: Duration::from_secs(1),
            min_level: Level::INFO,
            linking_metadata: None,
        }
    }
}

/// `tracing_subscriber` layer that turns events into [`LogEvent`]s and
/// forwards them to a [`BatchedLogSink`] via a bounded channel and a
/// background batching task.
///
/// Network I/O is fully decoupled from application threads: when the
/// channel is full the event is dropped rather than waiting.
pub struct LogShipperLayer {
    sender: mpsc::Sender<LogEvent>,
    min_level: Level,
    linking_metadata: Option<LinkingMetadataFn>,
    diagnostics: Arc<dyn Diagnostics>,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Successfully enqueued into channel.
    pub enqueued_events: Arc<AtomicU64>,
    /// Dropped because the channel was full or the batching task had stopped.
    pub dropped_events: Arc<AtomicU64>,
    closed_reported: AtomicBool,
}

/// Owner of the background batching task.
pub struct ShipperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ShipperHandle {
    /// Stop intake, send whatever is buffered and wait for the task.
    ///
    /// Failures during this final flush are absorbed by the sink.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::error!("log shipper task ended abnormally: {}", e);
        }
    }
}

impl LogShipperLayer {
    /// Create a new layer and spawn a background task that pulls
    /// [`LogEvent`]s from a bounded channel and hands them to `sink` in
    /// batches.
    ///
    /// Minimal thresholds are enforced for `channel_buffer`, `batch_size`
    /// and `flush_interval` to avoid degenerate configurations. Must be
    /// called within a Tokio runtime.
    pub fn new(
        sink: Arc<dyn BatchedLogSink>,
        settings: ShipperSettings,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> (Self, ShipperHandle) {
        // Enforce minimal thresholds to avoid degenerate configs.
        let buffer = settings.channel_buffer.max(16);
        let batch_size = settings.batch_size.max(1);
        let flush_interval = settings.flush_interval.max(Duration::from_millis(10));

        let (tx, rx) = mpsc::channel::<LogEvent>(buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let enqueued_events = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(run_batches(
            sink,
            rx,
            shutdown_rx,
            batch_size,
            flush_interval,
        ));

        let layer = Self {
            sender: tx,
            min_level: settings.min_level,
            linking_metadata: settings.linking_metadata,
            diagnostics,
            total_events: Arc::new(AtomicU64::new(0)),
            enqueued_events,
            dropped_events: Arc::new(AtomicU64::new(0)),
            closed_reported: AtomicBool::new(false),
        };
        let handle = ShipperHandle {
            shutdown: shutdown_tx,
            task,
        };
        (layer, handle)
    }
}

async fn run_batches(
    sink: Arc<dyn BatchedLogSink>,
    mut rx: mpsc::Receiver<LogEvent>,
    mut shutdown: oneshot::Receiver<()>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut batch = Vec::with_capacity(batch_size);
    let mut shutdown_armed = true;
    let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(event) => {
                    batch.push(event);
                    if batch.len() >= batch_size {
                        sink.emit_batch(std::mem::replace(&mut batch, Vec::with_capacity(batch_size))).await;
                    }
                }
                // every layer is gone
                None => break,
            },
            _ = ticker.tick() => {
                if batch.is_empty() {
                    sink.on_empty_batch().await;
                } else {
                    sink.emit_batch(std::mem::take(&mut batch)).await;
                }
            }
            signal = &mut shutdown, if shutdown_armed => {
                if signal.is_err() {
                    // handle dropped without shutdown; keep shipping until the layer goes away
                    shutdown_armed = false;
                    continue;
                }
                rx.close();
                while let Some(event) = rx.recv().await {
                    batch.push(event);
                }
                break;
            }
        }
    }

    for chunk in batch.chunks(batch_size) {
        sink.emit_batch(chunk.to_vec()).await;
    }
    sink.flush().await;
}

impl<S> Layer<S> for LogShipperLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        // tracing orders levels by verbosity: TRACE > ERROR
        if *meta.level() > self.min_level || is_excluded_target(meta.target()) {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut log_event = LogEvent::new(LogLevel::from(meta.level()), visitor.message_template());
        log_event.exception = visitor.exception;
        log_event.properties = visitor.properties;
        log_event.properties.push(("target".to_string(), meta.target().into()));

        if let Some(linking) = self.linking_metadata.as_ref().and_then(|f| f()) {
            log_event
                .properties
                .push((LINKING_METADATA_KEY.to_string(), PropertyValue::mapping(linking)));
        }

        match self.sender.try_send(log_event) {
            Ok(()) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                self.diagnostics.record(Diagnostic::ChannelFull);
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                // reported once; every later event would repeat it
                if !self.closed_reported.swap(true, Ordering::Relaxed) {
                    self.diagnostics.record(Diagnostic::ChannelClosed);
                }
            }
        }
    }
}

/// Collects an event's fields into properties. The first recorded error
/// becomes the exception.
///
/// The `message` field is already formatted by `tracing` and is shipped
/// verbatim. A [`MESSAGE_TEMPLATE_FIELD`] field takes its place and is
/// rendered against the other fields.
#[derive(Default)]
pub struct EventVisitor {
    pub message: Option<String>,
    pub template: Option<String>,
    pub exception: Option<ExceptionInfo>,
    pub properties: Vec<(String, PropertyValue)>,
}

impl EventVisitor {
    /// Template for the [`LogEvent`]: the explicit template if one was
    /// given, otherwise the formatted message with its braces escaped.
    pub fn message_template(&mut self) -> String {
        match self.template.take() {
            Some(template) => template,
            None => self.message.as_deref().map(escape).unwrap_or_default(),
        }
    }

    fn push(&mut self, field: &Field, value: PropertyValue) {
        self.properties.push((field.name().to_string(), value));
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            MESSAGE_TEMPLATE_FIELD => self.template = Some(value.to_string()),
            _ => self.push(field, value.into()),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value.into());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if self.exception.is_none() {
            self.exception = Some(ExceptionInfo::from_error(value));
        } else {
            self.push(field, Scalar::Text(value.to_string()).into());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{:?}", value)),
            MESSAGE_TEMPLATE_FIELD => self.template = Some(format!("{:?}", value)),
            _ => self.push(field, Scalar::Text(format!("{:?}", value)).into()),
        }
    }
}
