use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::str::FromStr;

/// Severity of a [`LogRecord`], ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" | "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" | "WARNING" => Ok(Level::Warning),
            "ERROR" => Ok(Level::Error),
            "CRITICAL" | "FATAL" => Ok(Level::Critical),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE | tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warning,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Keys owned by the record itself. Call sites can never set these as
/// extras, which keeps the remote payload shape stable.
pub const RESERVED_KEYS: [&str; 25] = [
    "name",
    "msg",
    "message",
    "args",
    "asctime",
    "level",
    "levelname",
    "levelno",
    "pathname",
    "filename",
    "module",
    "exc_info",
    "exc_text",
    "stack_info",
    "lineno",
    "funcName",
    "function_name",
    "created",
    "msecs",
    "relativeCreated",
    "thread",
    "threadName",
    "timestamp",
    "processName",
    "process",
];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Caller-supplied structured fields attached to a single record.
///
/// Reserved keys are rejected on insert: the call returns `false` and the
/// map is left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Extras(BTreeMap<String, Value>);

impl Extras {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        if is_reserved(&key) {
            return false;
        }
        self.0.insert(key, value.into());
        true
    }

    /// Insert any serializable value. Values serde cannot represent as JSON
    /// (maps with non-string keys, failing `Serialize` impls) are stored as
    /// their `Debug` text instead.
    pub fn insert_serialize<T>(&mut self, key: impl Into<String>, value: &T) -> bool
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        let value = serde_json::to_value(value).unwrap_or_else(|_| Value::String(format!("{:?}", value)));
        self.insert(key, value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Extras {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut extras = Extras::new();
        for (key, value) in iter {
            extras.insert(key, value);
        }
        extras
    }
}

/// Error details captured at the point a record is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// Declared kind name of the error, e.g. `SystemError`.
    pub type_name: String,
    /// `Display` text of the error.
    pub message: String,
    /// Captured backtrace followed by the error and its source chain.
    pub traceback: String,
}

impl ExceptionInfo {
    /// Capture an error whose concrete type is known at the call site.
    pub fn capture<E: Error + 'static>(err: &E) -> Self {
        match known_kind(err) {
            Some((type_name, type_path)) => Self::build(type_name, type_path, err),
            None => {
                let type_path = std::any::type_name::<E>();
                Self::build(short_type_name(type_path), type_path, err)
            }
        }
    }

    /// Capture a type-erased error. Only `std::io::Error` and this crate's
    /// error types are named; anything else is reported as `Error`.
    pub fn from_dyn(err: &(dyn Error + 'static)) -> Self {
        let (type_name, type_path) = known_kind(err).unwrap_or(("Error", "Error"));
        Self::build(type_name, type_path, err)
    }

    fn build(type_name: &str, type_path: &str, err: &dyn Error) -> Self {
        let mut traceback = format!(
            "Backtrace (most recent call first):\n{}\n{}: {}",
            Backtrace::force_capture(),
            type_path,
            err
        );
        let mut source = err.source();
        while let Some(cause) = source {
            traceback.push_str(&format!("\nCaused by: {}", cause));
            source = cause.source();
        }

        ExceptionInfo {
            type_name: type_name.to_string(),
            message: err.to_string(),
            traceback,
        }
    }
}

/// `(kind name, type path)` for error types that can be named through
/// `dyn Error` downcasting.
fn known_kind(err: &(dyn Error + 'static)) -> Option<(&'static str, &'static str)> {
    fn named<T: Error + 'static>(err: &(dyn Error + 'static)) -> Option<(&'static str, &'static str)> {
        let path = std::any::type_name::<T>();
        err.is::<T>().then(|| (short_type_name(path), path))
    }

    if err.is::<std::io::Error>() {
        return Some(("io::Error", "std::io::Error"));
    }
    named::<crate::error::SystemError>(err)
        .or_else(|| named::<crate::remote::ConfigurationError>(err))
        .or_else(|| named::<crate::remote::TransportError>(err))
        .or_else(|| named::<crate::sink::SinkError>(err))
        .or_else(|| named::<crate::settings::SettingsError>(err))
        .or_else(|| named::<crate::logger::LoggerError>(err))
        .or_else(|| named::<ParseLevelError>(err))
}

fn short_type_name(path: &str) -> &str {
    let without_generics = path.split('<').next().unwrap_or(path);
    without_generics.rsplit("::").next().unwrap_or(without_generics)
}

/// Capture the current call stack as text for [`LogRecord::stack`].
pub fn capture_stack() -> String {
    format!("Stack (most recent call first):\n{}", Backtrace::force_capture())
}

pub fn current_thread_name() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}

/// One log event, fully resolved and ready for formatting.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub logger_name: String,
    pub level: Level,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub thread_name: String,
    pub function_name: String,
    pub line: u32,
    pub exception: Option<ExceptionInfo>,
    pub stack: Option<String>,
    pub extras: Extras,
}

impl LogRecord {
    pub fn new(logger_name: impl Into<String>, level: Level, message: impl Into<String>) -> Self {
        LogRecord {
            logger_name: logger_name.into(),
            level,
            message: message.into(),
            timestamp: Utc::now(),
            thread_name: current_thread_name(),
            function_name: "<unknown>".to_string(),
            line: 0,
            exception: None,
            stack: None,
            extras: Extras::new(),
        }
    }

    pub fn with_function(mut self, function_name: impl Into<String>) -> Self {
        self.function_name = function_name.into();
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    pub fn with_exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_extras(mut self, extras: Extras) -> Self {
        self.extras = extras;
        self
    }
}
