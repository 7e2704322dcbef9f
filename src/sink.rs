use crate::record::LogRecord;
use crate::remote::{ConfigurationError, TransportError};

/// Which destination a sink writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    Console,
    RotatingFile,
    Remote,
}

/// Failure of a single sink while handling one record.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("log write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("remote submission rejected: {0}")]
    Transport(#[from] TransportError),
}

/// Destination for [`LogRecord`]s emitted through a logger.
///
/// Implementations own their formatter and run on the caller's thread:
/// `emit` returns once the record has been written locally, or handed to
/// the remote transport. Errors are returned to the caller, never
/// swallowed.
pub trait LogSink: Send + Sync {
    fn kind(&self) -> SinkKind;

    /// Format and write a single record.
    ///
    /// **Returns**
    /// - `Ok(())` if the record was written or handed off.
    /// - `Err(..)` on I/O failure, or when the remote client is not
    ///   available at the time of the call.
    fn emit(&self, record: &LogRecord) -> Result<(), SinkError>;

    /// Flush any buffered output. Default implementation is a no-op.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
