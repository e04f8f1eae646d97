//! Conversion of [`LogEvent`]s into the New Relic Log API payload.

use crate::event::{LogEvent, LogLevel, PropertyValue};
use crate::selflog::{Diagnostic, Diagnostics};
use crate::simplify::{scalar_key, simplify};
use crate::template::{render, FormatError, FormatProvider};
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Property whose mapping value is flattened onto the log item.
///
/// The New Relic agents put distributed-trace identifiers (`trace.id`,
/// `span.id`, `entity.guid`, ...) under this key.
pub const LINKING_METADATA_KEY: &str = "newrelic.linkingmetadata";

/// Common attribute New Relic uses as the service name.
pub const SERVICE_ATTRIBUTE: &str = "service";

#[derive(thiserror::Error, Debug)]
pub enum ItemError {
    #[error("failed to render message template: {0}")]
    Render(#[from] FormatError),
}

/// One entry of the `logs` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogItem {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub message: String,
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogCommon {
    pub attributes: Map<String, Value>,
}

/// One batch as sent to New Relic. Created per batch and never reused.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    pub common: LogCommon,
    pub logs: Vec<LogItem>,
}

impl LogPayload {
    pub fn new(application_name: &str) -> Self {
        let mut payload = LogPayload::default();
        payload.common.attributes.insert(
            SERVICE_ATTRIBUTE.to_string(),
            Value::String(application_name.to_string()),
        );
        payload
    }
}

/// New Relic colors levels by name and does not know "Information".
fn level_label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Information => "Info",
        other => other.name(),
    }
}

/// Build the wire item for one event.
pub fn build_item(event: &LogEvent, provider: &dyn FormatProvider) -> Result<LogItem, ItemError> {
    build_item_with(event, provider, |_| {})
}

/// Like [`build_item`], calling `on_overwrite` with every attribute key that
/// replaced an earlier value. Later values always win.
pub(crate) fn build_item_with(
    event: &LogEvent,
    provider: &dyn FormatProvider,
    mut on_overwrite: impl FnMut(&str),
) -> Result<LogItem, ItemError> {
    let message = render(&event.message_template, &event.properties, provider)?;

    let mut attributes = Map::new();
    let mut insert = |key: String, value: Value| {
        if attributes.contains_key(&key) {
            on_overwrite(&key);
        }
        attributes.insert(key, value);
    };

    insert("level".to_string(), Value::from(level_label(event.level)));
    insert(
        "iso8601Timestamp".to_string(),
        Value::from(event.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
    );

    if let Some(exception) = &event.exception {
        insert("exception".to_string(), Value::from(exception.to_string()));
        insert(
            "stackTrace".to_string(),
            Value::from(exception.stack_trace.clone().unwrap_or_default()),
        );
    }

    for (key, value) in &event.properties {
        if key.eq_ignore_ascii_case(LINKING_METADATA_KEY) {
            // unroll distributed trace attributes
            if let PropertyValue::Mapping(entries) = value {
                for (inner_key, inner_value) in entries {
                    insert(scalar_key(inner_key), simplify(inner_value));
                }
            }
        } else {
            insert(key.clone(), simplify(value));
        }
    }

    Ok(LogItem {
        timestamp: event.timestamp.timestamp_millis(),
        message,
        attributes,
    })
}

/// Builds one [`LogPayload`] per batch, isolating per-event failures.
#[derive(Clone)]
pub struct PayloadBuilder {
    application_name: String,
    format_provider: Arc<dyn FormatProvider>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl PayloadBuilder {
    pub fn new(
        application_name: impl Into<String>,
        format_provider: Arc<dyn FormatProvider>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        PayloadBuilder {
            application_name: application_name.into(),
            format_provider,
            diagnostics,
        }
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn build_item(&self, event: &LogEvent) -> Result<LogItem, ItemError> {
        build_item_with(event, self.format_provider.as_ref(), |key| {
            self.diagnostics.record(Diagnostic::AttributeOverwritten {
                key: key.to_string(),
            })
        })
    }

    /// Build the payload for `events`, returning it with the number of
    /// events that were dropped. Item order follows event order.
    pub fn build_payload(&self, events: &[LogEvent]) -> (LogPayload, usize) {
        let mut payload = LogPayload::new(&self.application_name);
        payload.logs.reserve(events.len());
        let mut dropped = 0;

        for event in events {
            match self.build_item(event) {
                Ok(item) => payload.logs.push(item),
                Err(e) => {
                    dropped += 1;
                    self.diagnostics.record(Diagnostic::EventDropped {
                        error: e.to_string(),
                    });
                }
            }
        }

        (payload, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ExceptionInfo, Scalar};
    use crate::selflog::CollectingDiagnostics;
    use crate::template::InvariantFormat;
    use chrono::{FixedOffset, TimeZone};
    use serde_json::json;

    fn builder() -> (PayloadBuilder, CollectingDiagnostics) {
        let diagnostics = CollectingDiagnostics::new();
        let builder = PayloadBuilder::new(
            "checkout",
            Arc::new(InvariantFormat),
            Arc::new(diagnostics.clone()),
        );
        (builder, diagnostics)
    }

    fn timestamp() -> chrono::DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 10, 14, 30, 0)
            .unwrap()
            + chrono::Duration::microseconds(123_456)
    }

    #[test]
    fn builds_the_hello_example() {
        let event = LogEvent::new(LogLevel::Information, "Hello {Name}")
            .at(timestamp())
            .with_property("Name", "Ada");

        let item = build_item(&event, &InvariantFormat).unwrap();

        assert_eq!(item.message, "Hello Ada");
        assert_eq!(item.timestamp, 1_710_073_800_123);
        assert_eq!(item.attributes["level"], json!("Info"));
        assert_eq!(
            item.attributes["iso8601Timestamp"],
            json!("2024-03-10T14:30:00.123456+02:00")
        );
        assert_eq!(item.attributes["Name"], json!("Ada"));
    }

    #[test]
    fn non_information_levels_keep_their_name() {
        for (level, label) in [
            (LogLevel::Verbose, "Verbose"),
            (LogLevel::Debug, "Debug"),
            (LogLevel::Information, "Info"),
            (LogLevel::Warning, "Warning"),
            (LogLevel::Error, "Error"),
            (LogLevel::Fatal, "Fatal"),
        ] {
            let item = build_item(&LogEvent::new(level, "x"), &InvariantFormat).unwrap();
            assert_eq!(item.attributes["level"], json!(label));
        }
    }

    #[test]
    fn exception_attributes_only_when_present() {
        let plain = build_item(&LogEvent::new(LogLevel::Error, "boom"), &InvariantFormat).unwrap();
        assert!(!plain.attributes.contains_key("exception"));
        assert!(!plain.attributes.contains_key("stackTrace"));

        let exception = ExceptionInfo::new("TimeoutError", "upstream timed out")
            .with_stack_trace("at fetch (client.rs:10)")
            .with_cause(ExceptionInfo::new("IoError", "connection reset"));
        let event = LogEvent::new(LogLevel::Error, "boom").with_exception(exception);
        let item = build_item(&event, &InvariantFormat).unwrap();

        let text = item.attributes["exception"].as_str().unwrap();
        assert!(text.contains("TimeoutError: upstream timed out"));
        assert!(text.contains("IoError: connection reset"));
        assert_eq!(item.attributes["stackTrace"], json!("at fetch (client.rs:10)"));
    }

    #[test]
    fn missing_stack_trace_is_an_empty_string() {
        let event = LogEvent::new(LogLevel::Error, "boom")
            .with_exception(ExceptionInfo::new("Error", "no trace"));
        let item = build_item(&event, &InvariantFormat).unwrap();
        assert_eq!(item.attributes["stackTrace"], json!(""));
    }

    #[test]
    fn linking_metadata_is_unrolled() {
        let event = LogEvent::new(LogLevel::Information, "traced")
            .with_property("NewRelic.LinkingMetadata", PropertyValue::mapping([("traceId", "t1"), ("spanId", "s1")]))
            .with_property("Other", 1i64);

        let item = build_item(&event, &InvariantFormat).unwrap();

        assert_eq!(item.attributes["traceId"], json!("t1"));
        assert_eq!(item.attributes["spanId"], json!("s1"));
        assert_eq!(item.attributes["Other"], json!(1));
        assert!(item
            .attributes
            .keys()
            .all(|k| !k.eq_ignore_ascii_case(LINKING_METADATA_KEY)));
    }

    #[test]
    fn linking_metadata_that_is_not_a_mapping_is_ignored() {
        let event = LogEvent::new(LogLevel::Information, "x")
            .with_property(LINKING_METADATA_KEY, "not a map");
        let item = build_item(&event, &InvariantFormat).unwrap();
        assert_eq!(item.attributes.len(), 2);
    }

    #[test]
    fn linking_metadata_keys_are_stringified() {
        let event = LogEvent::new(LogLevel::Information, "x").with_property(
            LINKING_METADATA_KEY,
            PropertyValue::Mapping(vec![(Scalar::I64(7), "seven".into())]),
        );
        let item = build_item(&event, &InvariantFormat).unwrap();
        assert_eq!(item.attributes["7"], json!("seven"));
    }

    #[test]
    fn colliding_property_overwrites_and_is_reported() {
        let (builder, diagnostics) = builder();
        let event = LogEvent::new(LogLevel::Information, "x").with_property("level", "custom");

        let item = builder.build_item(&event).unwrap();

        assert_eq!(item.attributes["level"], json!("custom"));
        assert_eq!(
            diagnostics.records(),
            vec![Diagnostic::AttributeOverwritten { key: "level".into() }]
        );
    }

    #[test]
    fn payload_keeps_order_and_service_name() {
        let (builder, diagnostics) = builder();
        let events: Vec<LogEvent> = (0..5i64)
            .map(|i| LogEvent::new(LogLevel::Debug, "n={N}").with_property("N", i))
            .collect();

        let (payload, dropped) = builder.build_payload(&events);

        assert_eq!(dropped, 0);
        assert_eq!(payload.logs.len(), 5);
        let messages: Vec<&str> = payload.logs.iter().map(|i| i.message.as_str()).collect();
        assert_eq!(messages, vec!["n=0", "n=1", "n=2", "n=3", "n=4"]);
        assert_eq!(payload.common.attributes, {
            let mut m = Map::new();
            m.insert("service".into(), json!("checkout"));
            m
        });
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn malformed_event_is_dropped_and_reported_once() {
        let (builder, diagnostics) = builder();
        let events = vec![
            LogEvent::new(LogLevel::Information, "ok {A}").with_property("A", 1i64),
            LogEvent::new(LogLevel::Information, "bad {A:Q}").with_property("A", 1i64),
            LogEvent::new(LogLevel::Information, "ok again"),
        ];

        let (payload, dropped) = builder.build_payload(&events);

        assert_eq!(dropped, 1);
        assert_eq!(payload.logs.len(), 2);
        assert_eq!(payload.logs[1].message, "ok again");
        let records = diagnostics.records();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], Diagnostic::EventDropped { .. }));
    }

    #[test]
    fn oversized_format_width_drops_only_that_event() {
        let (builder, diagnostics) = builder();
        let events = vec![
            LogEvent::new(LogLevel::Information, "ok"),
            LogEvent::new(LogLevel::Information, "v={N:F70000}").with_property("N", 1.5f64),
            LogEvent::new(LogLevel::Information, "v={N:D70000}").with_property("N", 1i64),
        ];

        let (payload, dropped) = builder.build_payload(&events);

        assert_eq!(dropped, 2);
        assert_eq!(payload.logs.len(), 1);
        assert_eq!(payload.logs[0].message, "ok");
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics
            .records()
            .iter()
            .all(|r| matches!(r, Diagnostic::EventDropped { .. })));
    }
}
