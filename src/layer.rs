use crate::datadog::WORKER_THREAD_NAME;
use crate::logger::LoggerFactory;
use crate::record::{capture_stack, ExceptionInfo, Extras, Level, LogRecord};
use std::cell::Cell;
use std::sync::{atomic::{AtomicU64, Ordering}, Arc};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

thread_local! {
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// `tracing_subscriber` layer that turns events into [`LogRecord`]s and
/// routes them through the factory's loggers.
///
/// The event target is the logger name; a logger is built on first use.
/// Fields become extras, an `error` recorded as `&dyn Error` becomes
/// exception info, and `stack_info = true` attaches the call stack. The
/// enclosing span's name is used as the function name, so
/// `#[instrument]`ed functions report themselves.
///
/// Events raised while a record is being written, or on the remote
/// transport's worker thread, are ignored so the transport's own HTTP
/// stack cannot feed back into it.
pub struct RoutingLayer {
    factory: Arc<LoggerFactory>,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
    /// Events written to every sink without error.
    pub emitted_events: Arc<AtomicU64>,
    /// Events for which a logger could not be built or a sink failed.
    pub failed_events: Arc<AtomicU64>,
}

impl RoutingLayer {
    pub fn new(factory: Arc<LoggerFactory>) -> Self {
        RoutingLayer {
            factory,
            total_events: Arc::new(AtomicU64::new(0)),
            emitted_events: Arc::new(AtomicU64::new(0)),
            failed_events: Arc::new(AtomicU64::new(0)),
        }
    }

    fn dispatch<S>(&self, event: &Event<'_>, ctx: &Context<'_, S>)
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        let meta = event.metadata();
        let name = meta.target();
        let logger = match self.factory.get_or_create_logger(name) {
            Ok(logger) => logger,
            Err(e) => {
                self.failed_events.fetch_add(1, Ordering::Relaxed);
                eprintln!("failed to build logger {}: {}", name, e);
                return;
            }
        };

        let level = Level::from(*meta.level());
        if !logger.is_enabled_for(level) {
            return;
        }

        let mut extras = Extras::new();
        let mut message: Option<String> = None;
        let mut exception: Option<ExceptionInfo> = None;
        let mut stack = false;

        let mut visitor = FieldVisitor {
            extras: &mut extras,
            message: &mut message,
            exception: &mut exception,
            stack: &mut stack,
        };
        event.record(&mut visitor);

        let function_name = ctx
            .event_span(event)
            .map(|span| span.name().to_string())
            .or_else(|| meta.module_path().map(|path| path.to_string()))
            .unwrap_or_else(|| "<unknown>".to_string());

        let mut record = LogRecord::new(name, level, message.unwrap_or_default())
            .with_function(function_name)
            .with_line(meta.line().unwrap_or(0))
            .with_extras(extras);
        record.exception = exception;
        if stack {
            record.stack = Some(capture_stack());
        }

        match logger.log_record(&record) {
            Ok(()) => {
                self.emitted_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed_events.fetch_add(1, Ordering::Relaxed);
                eprintln!("failed to write log record for {}: {}", name, e);
            }
        }
    }
}

impl<S> Layer<S> for RoutingLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if std::thread::current().name() == Some(WORKER_THREAD_NAME) {
            return;
        }
        let Some(_guard) = DispatchGuard::enter() else {
            return;
        };
        self.dispatch(event, &ctx);
    }
}

/// Marks the current thread as dispatching; cleared on drop, including
/// during unwinding.
struct DispatchGuard;

impl DispatchGuard {
    fn enter() -> Option<Self> {
        if DISPATCHING.with(|flag| flag.replace(true)) {
            None
        } else {
            Some(DispatchGuard)
        }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|flag| flag.set(false));
    }
}

pub struct FieldVisitor<'a> {
    pub extras: &'a mut Extras,
    pub message: &'a mut Option<String>,
    pub exception: &'a mut Option<ExceptionInfo>,
    pub stack: &'a mut bool,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.extras.insert(field.name(), value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.extras.insert(field.name(), value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.extras.insert(field.name(), value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.extras.insert(field.name(), value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "stack_info" {
            *self.stack = value;
        } else {
            self.extras.insert(field.name(), value);
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if field.name() == "error" {
            *self.exception = Some(ExceptionInfo::from_dyn(value));
        } else {
            self.extras.insert(field.name(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.extras.insert(field.name(), format!("{:?}", value));
        }
    }
}
