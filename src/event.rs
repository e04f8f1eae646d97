use chrono::{DateTime, FixedOffset, Local};
use std::fmt;

/// Severity of a [`LogEvent`].
///
/// The level name sent to New Relic is the variant name verbatim, except
/// for [`LogLevel::Information`] which is remapped when the item is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Verbose => "Verbose",
            LogLevel::Debug => "Debug",
            LogLevel::Information => "Information",
            LogLevel::Warning => "Warning",
            LogLevel::Error => "Error",
            LogLevel::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => LogLevel::Verbose,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Information,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

/// Leaf value of a log property.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Char(char),
    DateTime(DateTime<FixedOffset>),
    /// A value that was only captured through its text form, e.g. `Debug` output.
    Text(String),
}

/// Polymorphic, recursively nestable property value attached to an event.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Scalar(Scalar),
    Sequence(Vec<PropertyValue>),
    Mapping(Vec<(Scalar, PropertyValue)>),
    Structure {
        type_tag: Option<String>,
        fields: Vec<(String, PropertyValue)>,
    },
}

impl PropertyValue {
    pub fn null() -> Self {
        PropertyValue::Scalar(Scalar::Null)
    }

    /// Build a mapping from string keys, e.g. linking metadata.
    pub fn mapping<K, V, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        PropertyValue::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (Scalar::Str(k.into()), v.into()))
                .collect(),
        )
    }
}

impl From<Scalar> for PropertyValue {
    fn from(value: Scalar) -> Self {
        PropertyValue::Scalar(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Scalar(Scalar::Str(value.to_string()))
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Scalar(Scalar::Str(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Scalar(Scalar::Bool(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Scalar(Scalar::I64(value))
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        PropertyValue::Scalar(Scalar::U64(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Scalar(Scalar::F64(value))
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(values: Vec<T>) -> Self {
        PropertyValue::Sequence(values.into_iter().map(Into::into).collect())
    }
}

/// Lets an already simplified JSON tree be fed back as a property.
impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => PropertyValue::null(),
            Value::Bool(b) => b.into(),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i.into()
                } else if let Some(u) = n.as_u64() {
                    u.into()
                } else {
                    // serde_json numbers are always one of the three
                    n.as_f64().map(PropertyValue::from).unwrap_or_else(PropertyValue::null)
                }
            }
            Value::String(s) => s.into(),
            Value::Array(items) => {
                PropertyValue::Sequence(items.into_iter().map(PropertyValue::from).collect())
            }
            Value::Object(map) => PropertyValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| (Scalar::Str(k), PropertyValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Error attached to an event, with its chain of causes.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub cause: Option<Box<ExceptionInfo>>,
}

impl ExceptionInfo {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        ExceptionInfo {
            type_name: type_name.into(),
            message: message.into(),
            stack_trace: None,
            cause: None,
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_cause(mut self, cause: ExceptionInfo) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Capture an error and its `source()` chain.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        Self::with_type_name(error_type_name(error), error)
    }

    /// Like [`ExceptionInfo::from_error`], naming the outer error after its
    /// concrete type.
    pub fn of<E: std::error::Error + 'static>(error: &E) -> Self {
        Self::with_type_name(std::any::type_name::<E>().to_string(), error)
    }

    fn with_type_name(type_name: String, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut info = ExceptionInfo::new(type_name, error.to_string());
        if let Some(source) = error.source() {
            info.cause = Some(Box::new(ExceptionInfo::from_error(source)));
        }
        info
    }
}

// `dyn Error` carries no type name. `io::Error` is recognised by downcast
// since its Debug form names the internal repr (`Custom`, `Os`, `Kind`).
// Otherwise the Debug form usually starts with the type name.
fn error_type_name(error: &(dyn std::error::Error + 'static)) -> String {
    if error.is::<std::io::Error>() {
        return "std::io::Error".to_string();
    }
    let debug = format!("{:?}", error);
    let name: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if name.is_empty() {
        "Error".to_string()
    } else {
        name
    }
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " ---> {}", cause)?;
            write!(f, "\n   --- End of inner exception stack trace ---")?;
        }
        if let Some(trace) = &self.stack_trace {
            write!(f, "\n{}", trace)?;
        }
        Ok(())
    }
}

/// One structured log record handed to the sink by the batching layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp: DateTime<FixedOffset>,
    pub level: LogLevel,
    pub message_template: String,
    pub exception: Option<ExceptionInfo>,
    pub properties: Vec<(String, PropertyValue)>,
}

impl LogEvent {
    /// A new event stamped with the current local time and offset.
    pub fn new(level: LogLevel, message_template: impl Into<String>) -> Self {
        LogEvent {
            timestamp: Local::now().fixed_offset(),
            level,
            message_template: message_template.into(),
            exception: None,
            properties: Vec::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    pub fn with_exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}
