use crate::console::{shared_writer, ConsoleSink, SharedWriter};
use crate::datadog::DatadogTransportFactory;
use crate::file::{RotatingFileSink, RotationPolicy};
use crate::record::{capture_stack, ExceptionInfo, Extras, Level, LogRecord};
use crate::remote::{ConfigurationError, RemoteClient, RemoteSink, TransportFactory};
use crate::settings::{Settings, SettingsError};
use crate::sink::{LogSink, SinkError, SinkKind};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io::{self, Write};
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Console line written when a non-test environment has no usable Datadog
/// credentials.
pub const MISSING_CREDENTIALS_WARNING: &str =
    "* * * DD_API_KEY & DD_SITE REQUIRED -> using local file sink * * *";

#[derive(thiserror::Error, Debug)]
pub enum LoggerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to write startup warning: {0}")]
    Sink(#[from] SinkError),
}

struct LoggerState {
    level: Level,
    sinks: Vec<Arc<dyn LogSink>>,
}

struct LoggerInner {
    name: String,
    state: RwLock<Arc<LoggerState>>,
}

/// Named logger with an ordered, immutable sink set.
///
/// Cheap to clone; clones share state. When the factory rebuilds a logger
/// of the same name, every clone switches to the new sink set at once.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.inner.name)
            .field("level", &self.level())
            .field("sinks", &self.sink_kinds())
            .finish()
    }
}

impl Logger {
    fn new(name: &str, level: Level, sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Logger {
            inner: Arc::new(LoggerInner {
                name: name.to_string(),
                state: RwLock::new(Arc::new(LoggerState { level, sinks })),
            }),
        }
    }

    fn replace(&self, level: Level, sinks: Vec<Arc<dyn LogSink>>) {
        let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = Arc::new(LoggerState { level, sinks });
    }

    fn state(&self) -> Arc<LoggerState> {
        Arc::clone(&self.inner.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn level(&self) -> Level {
        self.state().level
    }

    pub fn is_enabled_for(&self, level: Level) -> bool {
        level >= self.level()
    }

    /// Kinds of the attached sinks, in attachment order.
    pub fn sink_kinds(&self) -> Vec<SinkKind> {
        self.state().sinks.iter().map(|sink| sink.kind()).collect()
    }

    /// Send a finished record to every sink, in attachment order.
    ///
    /// Records below the logger's level are ignored. Every sink is tried
    /// even if an earlier one fails; the first failure is returned.
    pub fn log_record(&self, record: &LogRecord) -> Result<(), SinkError> {
        let state = self.state();
        if record.level < state.level {
            return Ok(());
        }

        let mut first_error = None;
        for sink in &state.sinks {
            if let Err(e) = sink.emit(record) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Start a record at `level`; the caller's line number is captured.
    #[track_caller]
    pub fn event(&self, level: Level, message: impl Into<String>) -> EventBuilder<'_> {
        let line = Location::caller().line();
        EventBuilder {
            logger: self,
            record: LogRecord::new(self.name(), level, message).with_line(line),
        }
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<String>) -> Result<(), SinkError> {
        self.event(Level::Debug, message).emit()
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<String>) -> Result<(), SinkError> {
        self.event(Level::Info, message).emit()
    }

    #[track_caller]
    pub fn warning(&self, message: impl Into<String>) -> Result<(), SinkError> {
        self.event(Level::Warning, message).emit()
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<String>) -> Result<(), SinkError> {
        self.event(Level::Error, message).emit()
    }

    #[track_caller]
    pub fn critical(&self, message: impl Into<String>) -> Result<(), SinkError> {
        self.event(Level::Critical, message).emit()
    }

    /// Log `message` at `ERROR` with `err` attached as exception info.
    #[track_caller]
    pub fn exception<E: Error + 'static>(&self, message: impl Into<String>, err: &E) -> Result<(), SinkError> {
        self.event(Level::Error, message).exception(err).emit()
    }

    pub fn flush(&self) -> Result<(), SinkError> {
        for sink in &self.state().sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

/// Builder for a single record, returned by [`Logger::event`].
#[must_use = "records are only written by `emit`"]
pub struct EventBuilder<'a> {
    logger: &'a Logger,
    record: LogRecord,
}

impl<'a> EventBuilder<'a> {
    /// Attach one extra field. Reserved keys are dropped silently.
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.record.extras.insert(key, value);
        self
    }

    /// Attach any serializable value as an extra field.
    pub fn extra_serialize<T: Serialize + fmt::Debug + ?Sized>(mut self, key: impl Into<String>, value: &T) -> Self {
        self.record.extras.insert_serialize(key, value);
        self
    }

    pub fn extras(mut self, extras: Extras) -> Self {
        for (key, value) in extras.iter() {
            self.record.extras.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn function(mut self, name: impl Into<String>) -> Self {
        self.record.function_name = name.into();
        self
    }

    pub fn exception<E: Error + 'static>(mut self, err: &E) -> Self {
        self.record.exception = Some(ExceptionInfo::capture(err));
        self
    }

    pub fn exception_dyn(mut self, err: &(dyn Error + 'static)) -> Self {
        self.record.exception = Some(ExceptionInfo::from_dyn(err));
        self
    }

    /// Attach the current call stack.
    pub fn stack(mut self) -> Self {
        self.record.stack = Some(capture_stack());
        self
    }

    pub fn record(&self) -> &LogRecord {
        &self.record
    }

    pub fn emit(self) -> Result<(), SinkError> {
        self.logger.log_record(&self.record)
    }
}

/// Configures a [`LoggerFactory`]. Every collaborator the factory wires
/// into sinks can be replaced here.
pub struct LoggerFactoryBuilder {
    settings: Arc<Settings>,
    console: Option<SharedWriter>,
    log_dir: PathBuf,
    rotation: RotationPolicy,
    transport: Option<Arc<dyn TransportFactory>>,
}

impl LoggerFactoryBuilder {
    /// Writer used by every console sink. Defaults to stdout.
    pub fn console_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.console = Some(shared_writer(writer));
        self
    }

    /// Directory holding `debug.log` and its backups. Defaults to `logs`.
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn rotation(mut self, policy: RotationPolicy) -> Self {
        self.rotation = policy;
        self
    }

    /// Transport used when the remote client is first acquired. Defaults
    /// to [`DatadogTransportFactory`].
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport = Some(factory);
        self
    }

    pub fn build(self) -> LoggerFactory {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(DatadogTransportFactory::default()));
        // Shared by every file-backed logger: one handle and one byte count
        // per log file.
        let file = Arc::new(RotatingFileSink::in_dir(&self.log_dir, self.rotation));
        LoggerFactory {
            settings: self.settings,
            remote: Arc::new(RemoteClient::new(transport)),
            console: self.console.unwrap_or_else(|| shared_writer(io::stdout())),
            file,
            log_dir: self.log_dir,
            loggers: Mutex::new(HashMap::new()),
        }
    }
}

/// Process-scoped logging context.
///
/// Owns the configuration snapshot, the single [`RemoteClient`] and the
/// registry of named loggers. Dropping the factory closes the remote
/// client.
pub struct LoggerFactory {
    settings: Arc<Settings>,
    remote: Arc<RemoteClient>,
    console: SharedWriter,
    file: Arc<RotatingFileSink>,
    log_dir: PathBuf,
    loggers: Mutex<HashMap<String, Logger>>,
}

impl LoggerFactory {
    pub fn builder(settings: impl Into<Arc<Settings>>) -> LoggerFactoryBuilder {
        LoggerFactoryBuilder {
            settings: settings.into(),
            console: None,
            log_dir: PathBuf::from("logs"),
            rotation: RotationPolicy::default(),
            transport: None,
        }
    }

    pub fn new(settings: impl Into<Arc<Settings>>) -> Self {
        Self::builder(settings).build()
    }

    pub fn from_env() -> Result<Self, SettingsError> {
        Ok(Self::new(Settings::from_env()?))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn remote_client(&self) -> &Arc<RemoteClient> {
        &self.remote
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// The file sink every file-backed logger of this factory writes to.
    pub fn file_sink(&self) -> &Arc<RotatingFileSink> {
        &self.file
    }

    /// Build (or rebuild) the logger `name` at the configured level.
    #[track_caller]
    pub fn get_logger(&self, name: &str) -> Result<Logger, LoggerError> {
        self.get_logger_with_level(name, None)
    }

    /// Build (or rebuild) the logger `name`.
    ///
    /// **Parameters**
    /// - `name`: logical logger name; also the registry key.
    /// - `level`: explicit level, or `None` for `Settings::log_level`.
    ///
    /// **Behavior**
    ///
    /// Sinks are chosen from the settings snapshot:
    /// 1. a console sink, always;
    /// 2. outside `test`, with both credentials: the remote sink, and
    ///    nothing else;
    /// 3. outside `test`, without them: one warning line on the console;
    /// 4. otherwise a rotating file sink.
    ///
    /// A logger already registered under `name` has its sink set replaced,
    /// never extended.
    #[track_caller]
    pub fn get_logger_with_level(&self, name: &str, level: Option<Level>) -> Result<Logger, LoggerError> {
        let caller_line = Location::caller().line();
        let level = level.unwrap_or(self.settings.log_level);
        let sinks = self.select_sinks(name, caller_line)?;

        let mut loggers = self.loggers.lock().unwrap_or_else(PoisonError::into_inner);
        let logger = match loggers.get(name) {
            Some(existing) => {
                existing.replace(level, sinks);
                existing.clone()
            }
            None => {
                let logger = Logger::new(name, level, sinks);
                loggers.insert(name.to_string(), logger.clone());
                logger
            }
        };
        Ok(logger)
    }

    /// Registered logger `name`, or a new one at the configured level.
    ///
    /// Unlike [`get_logger`](Self::get_logger) an existing logger is
    /// returned as is. The registry stays locked while sinks are selected,
    /// so concurrent first callers build the logger (and print any
    /// missing-credentials warning) once.
    #[track_caller]
    pub fn get_or_create_logger(&self, name: &str) -> Result<Logger, LoggerError> {
        let caller_line = Location::caller().line();
        let mut loggers = self.loggers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = loggers.get(name) {
            return Ok(existing.clone());
        }

        let sinks = self.select_sinks(name, caller_line)?;
        let logger = Logger::new(name, self.settings.log_level, sinks);
        loggers.insert(name.to_string(), logger.clone());
        Ok(logger)
    }

    /// Registered logger `name`, if any, without rebuilding it.
    pub fn logger(&self, name: &str) -> Option<Logger> {
        self.loggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn select_sinks(&self, name: &str, caller_line: u32) -> Result<Vec<Arc<dyn LogSink>>, LoggerError> {
        let console = Arc::new(ConsoleSink::new(Arc::clone(&self.console)));
        let mut sinks: Vec<Arc<dyn LogSink>> = Vec::with_capacity(2);
        sinks.push(console.clone());

        if !self.settings.is_test() {
            if self.settings.credentials().is_some() {
                self.remote.acquire(&self.settings)?;
                sinks.push(Arc::new(RemoteSink::new(Arc::clone(&self.remote), &self.settings)));
                return Ok(sinks);
            }

            let warning = LogRecord::new(name, Level::Warning, MISSING_CREDENTIALS_WARNING)
                .with_function("get_logger")
                .with_line(caller_line);
            console.emit(&warning)?;
        }

        sinks.push(self.file.clone());
        Ok(sinks)
    }

    /// Flush every registered logger and close the remote client.
    ///
    /// Returns `true` if this call closed a live remote transport.
    pub fn shutdown(&self) -> bool {
        let loggers: Vec<Logger> = self
            .loggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for logger in loggers {
            if let Err(e) = logger.flush() {
                eprintln!("failed to flush logger {}: {}", logger.name(), e);
            }
        }
        self.remote.close()
    }
}

impl Drop for LoggerFactory {
    fn drop(&mut self) {
        self.remote.close();
    }
}
