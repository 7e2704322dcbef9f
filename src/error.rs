use crate::record::Extras;

/// Application error carrying a message and optional structured context
/// that callers can attach to the log record alongside the error.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct SystemError {
    pub message: String,
    pub extra: Option<Extras>,
}

impl SystemError {
    pub fn new(message: impl Into<String>) -> Self {
        SystemError {
            message: message.into(),
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: Extras) -> Self {
        self.extra = Some(extra);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExceptionInfo;

    #[test]
    fn displays_its_message() {
        let err = SystemError::new("ERROR");
        assert_eq!(err.to_string(), "ERROR");
        assert!(err.extra.is_none());
    }

    #[test]
    fn captured_as_exception_with_kind_name() {
        let info = ExceptionInfo::capture(&SystemError::new("BAD VALUE"));
        assert_eq!(info.type_name, "SystemError");
        assert_eq!(info.message, "BAD VALUE");
        assert!(info.traceback.ends_with("SystemError: BAD VALUE"));
    }
}
