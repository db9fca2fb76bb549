use std::time::Duration;

use thiserror::Error;

/// Errors the core distinguishes. Adapters attach these to failed results
/// rather than returning them through `execute`; the engine owns the decision
/// of whether a failure is terminal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurgeError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("pool initialization failed: {0}")]
    PoolInit(String),
    #[error("pool exhausted before a handle became available")]
    PoolExhausted,
    #[error("pool is closed")]
    PoolClosed,
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("operation canceled")]
    Canceled,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("redirect limit exceeded after {0} redirects")]
    TooManyRedirects(u32),
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

/// Discriminant-only view of [`SurgeError`], used for counting and for the
/// error-category taxonomy the metrics collector maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigInvalid,
    PoolInit,
    PoolExhausted,
    PoolClosed,
    Timeout,
    Canceled,
    Protocol,
    Transport,
    UnsupportedOperation,
    TooManyRedirects,
    NotImplemented,
}

impl SurgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SurgeError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            SurgeError::PoolInit(_) => ErrorKind::PoolInit,
            SurgeError::PoolExhausted => ErrorKind::PoolExhausted,
            SurgeError::PoolClosed => ErrorKind::PoolClosed,
            SurgeError::Timeout(_) => ErrorKind::Timeout,
            SurgeError::Canceled => ErrorKind::Canceled,
            SurgeError::Protocol(_) => ErrorKind::Protocol,
            SurgeError::Transport(_) => ErrorKind::Transport,
            SurgeError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            SurgeError::TooManyRedirects(_) => ErrorKind::TooManyRedirects,
            SurgeError::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }

    /// Short category string used to key the collector's error table.
    pub fn category(&self) -> &'static str {
        self.kind().category()
    }

    /// Fatal errors abort the run before any worker starts; everything else
    /// is recorded as a failed result and the run continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConfigInvalid | ErrorKind::PoolInit
        )
    }
}

impl ErrorKind {
    pub fn category(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::PoolInit
            | ErrorKind::PoolExhausted
            | ErrorKind::PoolClosed
            | ErrorKind::Transport => "connection",
            ErrorKind::Protocol | ErrorKind::TooManyRedirects => "protocol",
            ErrorKind::ConfigInvalid
            | ErrorKind::Canceled
            | ErrorKind::UnsupportedOperation
            | ErrorKind::NotImplemented => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_cover_the_taxonomy() {
        assert_eq!(SurgeError::Timeout(Duration::from_secs(1)).category(), "timeout");
        assert_eq!(SurgeError::PoolExhausted.category(), "connection");
        assert_eq!(SurgeError::PoolClosed.category(), "connection");
        assert_eq!(SurgeError::Transport("refused".into()).category(), "connection");
        assert_eq!(SurgeError::Protocol("-ERR".into()).category(), "protocol");
        assert_eq!(SurgeError::TooManyRedirects(10).category(), "protocol");
        assert_eq!(SurgeError::Canceled.category(), "unknown");
        assert_eq!(
            SurgeError::UnsupportedOperation("http_brew".into()).category(),
            "unknown"
        );
    }

    #[test]
    fn only_setup_errors_are_fatal() {
        assert!(SurgeError::ConfigInvalid("bad".into()).is_fatal());
        assert!(SurgeError::PoolInit("refused".into()).is_fatal());
        assert!(!SurgeError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!SurgeError::Canceled.is_fatal());
    }
}
