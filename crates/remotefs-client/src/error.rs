//! Error types for the remote file protocol.
//!
//! Server-reported failures are decoded into an [`ErrorEnvelope`], a tagged
//! error carrying either a filesystem-style payload (errno/strerror/filename)
//! or a service payload (type/message/tracebacks), joined by the URL of the
//! request that failed. Everything the client raises on its own is a
//! [`RemoteFsError`] variant.

use std::fmt;
use std::io;

use serde_json::Value;
use thiserror::Error;

use crate::codec::CodecError;
use crate::constants::{OPEN_FAILED_MESSAGE, UNKNOWN_ERROR_MESSAGE, UNKNOWN_ERROR_TYPE};
use crate::file::FileState;
use crate::transport::TransportError;

// ============================================================================
// Error envelope
// ============================================================================

/// Filesystem-style failure (the remote equivalent of an `OSError`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsErrorDetail {
    pub errno: Option<i32>,
    pub strerror: Option<String>,
    pub filename: Option<String>,
}

/// Generic service failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceErrorDetail {
    /// Server-side exception type name, e.g. `"PermissionError"`.
    pub error_type: String,
    pub message: String,
    /// Remote stack traces, one string per trace.
    pub tracebacks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetail {
    Os(OsErrorDetail),
    Service(ServiceErrorDetail),
}

/// Coarse classification of an [`ErrorEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// errno-carrying filesystem error.
    Os,
    /// Service error with a server-supplied type.
    Service,
    /// Service error where the server gave no type.
    Unknown,
}

/// A decoded server failure. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ErrorEnvelope {
    /// URL of the request or session that failed.
    pub url: String,
    pub detail: ErrorDetail,
}

impl ErrorEnvelope {
    /// Build a filesystem-style error from `errno`/`strerror`/`filename`.
    pub fn os_from_json(body: &Value, url: impl Into<String>) -> Self {
        let errno = body
            .get("errno")
            .and_then(Value::as_i64)
            .and_then(|n| i32::try_from(n).ok());
        Self {
            url: url.into(),
            detail: ErrorDetail::Os(OsErrorDetail {
                errno,
                strerror: string_field(body, "strerror"),
                filename: string_field(body, "filename"),
            }),
        }
    }

    /// Build a service error from `type`/`message`/`tracebacks`, falling back
    /// to `UnknownError` / `Unknown error` / no tracebacks.
    pub fn service_from_json(body: &Value, url: impl Into<String>) -> Self {
        let tracebacks = match body.get("tracebacks") {
            Some(Value::Array(items)) => items.iter().map(traceback_text).collect(),
            _ => Vec::new(),
        };
        Self::service(
            string_field(body, "type").unwrap_or_else(|| UNKNOWN_ERROR_TYPE.to_string()),
            string_field(body, "message").unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string()),
            tracebacks,
            url,
        )
    }

    /// The error raised when an open request is rejected without a usable
    /// diagnostic.
    pub fn open_failed(url: impl Into<String>) -> Self {
        Self::service(UNKNOWN_ERROR_TYPE, OPEN_FAILED_MESSAGE, Vec::new(), url)
    }

    pub fn service(
        error_type: impl Into<String>,
        message: impl Into<String>,
        tracebacks: Vec<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            detail: ErrorDetail::Service(ServiceErrorDetail {
                error_type: error_type.into(),
                message: message.into(),
                tracebacks,
            }),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match &self.detail {
            ErrorDetail::Os(_) => ErrorKind::Os,
            ErrorDetail::Service(s) if s.error_type == UNKNOWN_ERROR_TYPE => ErrorKind::Unknown,
            ErrorDetail::Service(_) => ErrorKind::Service,
        }
    }

    /// The errno, if this is a filesystem-style error that carries one.
    pub fn errno(&self) -> Option<i32> {
        match &self.detail {
            ErrorDetail::Os(os) => os.errno,
            ErrorDetail::Service(_) => None,
        }
    }

    /// The human-readable message regardless of kind.
    pub fn message(&self) -> &str {
        match &self.detail {
            ErrorDetail::Os(os) => os.strerror.as_deref().unwrap_or(""),
            ErrorDetail::Service(s) => &s.message,
        }
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            ErrorDetail::Os(os) => {
                match (os.errno, &os.strerror) {
                    (Some(errno), Some(strerror)) => write!(f, "[Errno {errno}] {strerror}")?,
                    (Some(errno), None) => write!(f, "[Errno {errno}]")?,
                    (None, Some(strerror)) => f.write_str(strerror)?,
                    (None, None) => f.write_str("remote OS error")?,
                }
                if let Some(filename) = &os.filename {
                    write!(f, ": '{filename}'")?;
                }
                write!(f, " (url='{}')", self.url)
            }
            ErrorDetail::Service(s) => write!(
                f,
                "(type='{}', message='{}', url='{}')",
                s.error_type, s.message, self.url
            ),
        }
    }
}

/// Convert to `std::io::Error` so remote files can stand in for local ones.
impl From<ErrorEnvelope> for io::Error {
    fn from(e: ErrorEnvelope) -> Self {
        match e.errno() {
            Some(errno) => io::Error::new(io::Error::from_raw_os_error(errno).kind(), e),
            None => io::Error::other(e),
        }
    }
}

fn string_field(body: &Value, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn traceback_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(lines) => lines
            .iter()
            .map(|line| line.as_str().map_or_else(|| line.to_string(), str::to_string))
            .collect(),
        other => other.to_string(),
    }
}

// ============================================================================
// Client errors
// ============================================================================

/// Everything a remote file operation can fail with.
#[derive(Debug, Error)]
pub enum RemoteFsError {
    /// The server reported a failure.
    #[error(transparent)]
    Remote(#[from] ErrorEnvelope),

    /// The operation has no remote counterpart. Raised locally, never read
    /// from the wire.
    #[error("{0}() is not supported by the remote file API")]
    Unsupported(&'static str),

    /// The handle is not in the `Open` state.
    #[error("remote file is not open (state: {0})")]
    NotOpen(FileState),

    #[error("invalid file mode: {0:?}")]
    InvalidMode(String),

    #[error("unknown text encoding: {0:?}")]
    UnknownEncoding(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A frame or body that does not follow the protocol.
    #[error("malformed response: {0}")]
    Protocol(String),

    /// Connection-level failures pass through unchanged.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RemoteFsError {
    /// The server's error envelope, if this error came from the wire.
    pub fn envelope(&self) -> Option<&ErrorEnvelope> {
        match self {
            Self::Remote(envelope) => Some(envelope),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<RemoteFsError> for io::Error {
    fn from(e: RemoteFsError) -> Self {
        match e {
            RemoteFsError::Remote(envelope) => envelope.into(),
            RemoteFsError::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, e),
            RemoteFsError::NotOpen(_) => io::Error::new(io::ErrorKind::NotConnected, e),
            RemoteFsError::InvalidMode(_) | RemoteFsError::UnknownEncoding(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, e)
            }
            RemoteFsError::Codec(_) | RemoteFsError::Protocol(_) => {
                io::Error::new(io::ErrorKind::InvalidData, e)
            }
            RemoteFsError::Transport(TransportError::Timeout) => {
                io::Error::new(io::ErrorKind::TimedOut, e)
            }
            RemoteFsError::Transport(_) => io::Error::other(e),
        }
    }
}

/// Result type for remote file operations.
pub type Result<T> = std::result::Result<T, RemoteFsError>;
