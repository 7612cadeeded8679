//! Crate-wide error type.
//!
//! Mirrors the teacher's `NitriteError` shape (message + kind + optional
//! cause) but is built with `thiserror`, the way the storage-adapter layer
//! of the teacher (`nitrite-fjall-adapter::wrapper::FjallValueError`) builds
//! its low-level error types.

use std::fmt;
use std::io;

/// The five error kinds named by the storage/streaming core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Construction-time violation of schema rules. Fatal to the operation.
    Layout,
    /// The active MemTable arena cannot satisfy an allocation.
    MemTableFull,
    /// Invalid magic/version or checksum mismatch on a shard.
    CorruptShard,
    /// Generic I/O, lock contention, or refcount invariant violation.
    Storage,
    /// Wire envelope bounds violation.
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Layout => "layout error",
            ErrorKind::MemTableFull => "memtable full",
            ErrorKind::CorruptShard => "corrupt shard",
            ErrorKind::Storage => "storage error",
            ErrorKind::Protocol => "protocol error",
        };
        write!(f, "{s}")
    }
}

/// Top-level crate error.
///
/// Carries an optional chained cause so that a low-level I/O failure can be
/// reported alongside the higher-level operation it broke.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct GnitzError {
    message: String,
    kind: ErrorKind,
    #[source]
    cause: Option<Box<GnitzError>>,
}

impl GnitzError {
    pub fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        GnitzError {
            message: message.into(),
            kind,
            cause: None,
        }
    }

    pub fn with_cause(message: impl Into<String>, kind: ErrorKind, cause: GnitzError) -> Self {
        GnitzError {
            message: message.into(),
            kind,
            cause: Some(Box::new(cause)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn cause(&self) -> Option<&GnitzError> {
        self.cause.as_deref()
    }

    pub fn layout(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::Layout)
    }

    pub fn memtable_full(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::MemTableFull)
    }

    pub fn corrupt_shard(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::CorruptShard)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::Storage)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(message, ErrorKind::Protocol)
    }

    pub fn is_memtable_full(&self) -> bool {
        self.kind == ErrorKind::MemTableFull
    }
}

impl From<io::Error> for GnitzError {
    fn from(err: io::Error) -> Self {
        GnitzError::new(err.to_string(), ErrorKind::Storage)
    }
}

pub type GnitzResult<T> = Result<T, GnitzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = GnitzError::layout("pk must be an integer type");
        let text = err.to_string();
        assert!(text.contains("layout error"));
        assert!(text.contains("pk must be an integer type"));
    }

    #[test]
    fn cause_chain_is_preserved() {
        let cause = GnitzError::storage("disk full");
        let err = GnitzError::with_cause("flush failed", ErrorKind::Storage, cause);
        assert_eq!(err.cause().unwrap().message(), "disk full");
    }

    #[test]
    fn io_error_converts_to_storage_kind() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: GnitzError = io_err.into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
