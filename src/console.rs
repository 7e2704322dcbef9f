use crate::format::{ConsoleFormatter, Formatter};
use crate::record::LogRecord;
use crate::sink::{LogSink, SinkError, SinkKind};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// Writer shared by every console sink a factory creates.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub fn shared_writer(writer: impl Write + Send + 'static) -> SharedWriter {
    Arc::new(Mutex::new(Box::new(writer)))
}

/// Human-readable sink, stdout unless another writer is injected.
pub struct ConsoleSink {
    writer: SharedWriter,
    formatter: Box<dyn Formatter>,
}

impl ConsoleSink {
    pub fn new(writer: SharedWriter) -> Self {
        ConsoleSink {
            writer,
            formatter: Box::new(ConsoleFormatter),
        }
    }

    pub fn stdout() -> Self {
        Self::new(shared_writer(io::stdout()))
    }

    pub fn with_formatter(mut self, formatter: impl Formatter + 'static) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    /// Write an already formatted line.
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", line)?;
        writer.flush()
    }
}

impl LogSink for ConsoleSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Console
    }

    fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        let line = self.formatter.format(record);
        self.write_line(&line)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.flush()?;
        Ok(())
    }
}

/// In-memory writer that keeps everything written to it. Clones share the
/// same buffer, so one clone can be injected and another inspected.
#[derive(Clone, Default)]
pub struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CaptureWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
