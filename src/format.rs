use crate::record::LogRecord;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// ANSI escape sequences used by [`ConsoleFormatter`].
pub mod color {
    pub const PURPLE: &str = "\x1b[35m";
    pub const YELLOW: &str = "\x1b[93m";
    pub const BLUE: &str = "\x1b[94m";
    pub const RED: &str = "\x1b[91m";
    pub const END: &str = "\x1b[0m";
}

/// Wrap `text` in `color` and a trailing reset.
pub fn paint(text: &str, color: &str) -> String {
    format!("{}{}{}", color, text, color::END)
}

/// Pure transformation from a [`LogRecord`] to the text a sink writes.
pub trait Formatter: Send + Sync {
    fn format(&self, record: &LogRecord) -> String;
}

const LOCATION_WIDTH: usize = 30;
const LEVEL_TAG_WIDTH: usize = "[CRITICAL]".len();

/// `2024-05-01 13:45:12,345` in local time.
fn asctime(timestamp: &DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S,%3f")
        .to_string()
}

fn location(record: &LogRecord) -> String {
    format!("{}.{}", record.logger_name, record.line)
}

/// Colorized single-line output for humans.
///
/// `<timestamp> <[LEVEL]> <logger.line> <message>`; the three leading
/// fields each get their own color, the message is left as-is. A traceback
/// follows on the next lines in red, a stack capture uncolored.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleFormatter;

impl Formatter for ConsoleFormatter {
    fn format(&self, record: &LogRecord) -> String {
        let level_tag = format!("{:<width$}", format!("[{}]", record.level), width = LEVEL_TAG_WIDTH);
        let location = format!("{:<width$}", location(record), width = LOCATION_WIDTH);

        let mut line = format!(
            "{} {} {} {}",
            paint(&asctime(&record.timestamp), color::PURPLE),
            paint(&level_tag, color::YELLOW),
            paint(&location, color::BLUE),
            record.message
        );

        if let Some(exception) = &record.exception {
            line.push_str(&paint(&format!("\n{}", exception.traceback), color::RED));
        }
        if let Some(stack) = &record.stack {
            line.push('\n');
            line.push_str(stack);
        }
        line
    }
}

/// Fixed plain-text layout used by the rotating file sink:
/// `timestamp [LEVEL] logger.line: message`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFormatter;

impl Formatter for PlainFormatter {
    fn format(&self, record: &LogRecord) -> String {
        let mut line = format!(
            "{} [{}] {}: {}",
            asctime(&record.timestamp),
            record.level,
            location(record),
            record.message
        );
        if let Some(exception) = &record.exception {
            line.push('\n');
            line.push_str(&exception.traceback);
        }
        if let Some(stack) = &record.stack {
            line.push('\n');
            line.push_str(stack);
        }
        line
    }
}

/// JSON payload shipped to the remote intake.
///
/// Fixed fields: `logger {name, thread_name}`, `level`, `message`,
/// `function_name`, `timestamp` (UTC, microseconds). `traceback`,
/// `exception_message` and `exception_type` appear only with exception
/// info, `stack_info` only with a stack capture. Extras are merged at the
/// top level; fixed fields are written last and win on a name clash.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredFormatter;

impl StructuredFormatter {
    pub fn to_value(&self, record: &LogRecord) -> Value {
        let mut payload = Map::new();
        for (key, value) in record.extras.iter() {
            payload.insert(key.clone(), value.clone());
        }

        let mut logger = Map::new();
        logger.insert("name".into(), Value::from(record.logger_name.as_str()));
        logger.insert("thread_name".into(), Value::from(record.thread_name.as_str()));

        payload.insert("logger".into(), Value::Object(logger));
        payload.insert("level".into(), Value::from(record.level.as_str()));
        payload.insert("message".into(), Value::from(record.message.as_str()));
        payload.insert("function_name".into(), Value::from(record.function_name.as_str()));
        payload.insert(
            "timestamp".into(),
            Value::from(record.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)),
        );

        if let Some(exception) = &record.exception {
            payload.insert("traceback".into(), Value::from(exception.traceback.as_str()));
            payload.insert("exception_message".into(), Value::from(exception.message.as_str()));
            payload.insert("exception_type".into(), Value::from(exception.type_name.as_str()));
        }
        if let Some(stack) = &record.stack {
            payload.insert("stack_info".into(), Value::from(stack.as_str()));
        }

        Value::Object(payload)
    }
}

impl Formatter for StructuredFormatter {
    fn format(&self, record: &LogRecord) -> String {
        self.to_value(record).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ExceptionInfo, Extras, Level, RESERVED_KEYS};
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("BAD VALUE")]
    struct SystemFault;

    fn record(level: Level, message: &str) -> LogRecord {
        LogRecord::new("tests.test_logger", level, message)
            .with_line(100)
            .with_function("structured_payload")
    }

    #[test]
    fn structured_debug_payload_has_fixed_fields_only() {
        let mut value = StructuredFormatter.to_value(&record(Level::Debug, "MESSAGE"));
        let timestamp = value.as_object_mut().unwrap().remove("timestamp").unwrap();
        assert!(timestamp.as_str().unwrap().ends_with("+00:00"));

        let thread_name = crate::record::current_thread_name();
        assert_eq!(
            value,
            json!({
                "logger": {"name": "tests.test_logger", "thread_name": thread_name},
                "level": "DEBUG",
                "message": "MESSAGE",
                "function_name": "structured_payload",
            })
        );
    }

    #[test]
    fn structured_payload_merges_extras() {
        let extras: Extras = [("extra_attribute", true)].into_iter().collect();
        let line = StructuredFormatter.format(&record(Level::Debug, "MESSAGE").with_extras(extras));
        assert!(line.contains(r#""extra_attribute":true"#));

        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["extra_attribute"], json!(true));
        assert_eq!(parsed["level"], json!("DEBUG"));
        let object = parsed.as_object().unwrap();
        for key in RESERVED_KEYS {
            if key == "message" || key == "level" || key == "function_name" || key == "timestamp" {
                continue;
            }
            assert!(!object.contains_key(key), "reserved key {key} leaked");
        }
    }

    #[test]
    fn fixed_fields_win_over_colliding_extras() {
        let mut extras = Extras::new();
        extras.insert("logger", "spoofed");
        let value = StructuredFormatter.to_value(&record(Level::Info, "m").with_extras(extras));
        assert_eq!(value["logger"]["name"], json!("tests.test_logger"));
    }

    #[test]
    fn structured_exception_payload() {
        let rec = record(Level::Error, "ERROR").with_exception(ExceptionInfo::capture(&SystemFault));
        let value = StructuredFormatter.to_value(&rec);
        assert_eq!(value["exception_message"], json!("BAD VALUE"));
        assert_eq!(value["exception_type"], json!("SystemFault"));
        let traceback = value["traceback"].as_str().unwrap();
        assert!(traceback.contains("SystemFault: BAD VALUE"));
        assert!(value.get("stack_info").is_none());
    }

    #[test]
    fn structured_stack_info_only_when_captured() {
        let value = StructuredFormatter.to_value(&record(Level::Info, "m").with_stack("Stack: here"));
        assert_eq!(value["stack_info"], json!("Stack: here"));
        assert!(value.get("traceback").is_none());
    }

    #[test]
    fn console_line_colors_fields_but_not_message() {
        let line = ConsoleFormatter.format(&record(Level::Warning, "hello world"));
        assert!(line.starts_with(color::PURPLE));
        assert!(line.contains(&format!("{}[WARNING] ", color::YELLOW)));
        let location = format!("{}{:<30}{}", color::BLUE, "tests.test_logger.100", color::END);
        assert!(line.contains(&location));
        assert!(line.ends_with(&format!("{} hello world", color::END)));
    }

    #[test]
    fn console_location_longer_than_width_is_not_truncated() {
        let rec = LogRecord::new("a.very.long.logger.name.for.padding", Level::Info, "m").with_line(7);
        let line = ConsoleFormatter.format(&rec);
        assert!(line.contains("a.very.long.logger.name.for.padding.7\x1b[0m"));
    }

    #[test]
    fn console_appends_traceback_and_stack() {
        let rec = record(Level::Error, "EXCEPTION")
            .with_exception(ExceptionInfo::capture(&SystemFault))
            .with_stack("Stack (most recent call first):\nframe");
        let line = ConsoleFormatter.format(&rec);
        let mut parts = line.splitn(2, '\n');
        assert!(parts.next().unwrap().ends_with(&format!("EXCEPTION{}", color::RED)));
        let rest = parts.next().unwrap();
        assert!(rest.contains(&format!("SystemFault: BAD VALUE{}", color::END)));
        assert!(rest.ends_with("\nStack (most recent call first):\nframe"));
    }

    #[test]
    fn plain_line_layout() {
        let line = PlainFormatter.format(&record(Level::Info, "saved"));
        assert!(line.ends_with(" [INFO] tests.test_logger.100: saved"));
        assert!(!line.contains('\x1b'));
    }
}
