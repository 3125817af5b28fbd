//! Error type of the store.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Underlying I/O error.
    Io(std::io::Error),
    /// A snapshot file failed to open or validate.
    Snapshot(snapfile::SnapError),
    /// A JSON sidecar (dictionary, metadata, config) failed to parse.
    Json(serde_json::Error),
    /// The caller passed arguments the store cannot act on.
    Invalid(String),
    /// An on-disk structure failed an integrity check.
    Corrupt(String),
    /// A mutation was attempted on a read-only store or tree.
    ReadOnly,
    /// The request is well-formed but not supported (e.g. diffing across
    /// independent root snapshots).
    Unsupported(String),
    /// Another process holds the store lock.
    Locked(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "{}", e),
            Error::Snapshot(e) => write!(f, "snapshot: {}", e),
            Error::Json(e) => write!(f, "json: {}", e),
            Error::Invalid(m) => write!(f, "invalid: {}", m),
            Error::Corrupt(m) => write!(f, "corrupt: {}", m),
            Error::ReadOnly => write!(f, "store is opened read-only"),
            Error::Unsupported(m) => write!(f, "unsupported: {}", m),
            Error::Locked(m) => write!(f, "{}", m),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Snapshot(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<snapfile::SnapError> for Error {
    fn from(e: snapfile::SnapError) -> Self {
        match e {
            snapfile::SnapError::Io(io) => Error::Io(io),
            other => Error::Snapshot(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
