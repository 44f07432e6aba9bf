//! Error types for DC Activity.
//!
//! Errors carry a stable numeric code and a category so the CLI can map them
//! to exit codes and log them in machine-parseable form:
//!
//! ```text
//! {"code": 20, "category": "server", "message": "bind failed: errno 98"}
//! ```
//!
//! Detection and encoding never produce these errors: a failed query just
//! fails to produce a candidate, and encoding truncates instead of failing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for DC Activity operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file and argument errors.
    Config,
    /// HTTP exposition server lifecycle errors.
    Server,
    /// Process query provider errors.
    Provider,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Server => write!(f, "server"),
            ErrorCategory::Provider => write!(f, "provider"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for DC Activity.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid program id: {0:?}")]
    InvalidProgramId(String),

    // Server errors (20-29)
    #[error("failed to spawn serving thread: {0}")]
    ThreadSpawn(String),

    #[error("{stage} failed: errno {errno}")]
    Socket { stage: &'static str, errno: i32 },

    #[error("serving thread exited before reporting readiness")]
    ServerVanished,

    // Provider errors (30-39)
    #[error("process query failed: {0}")]
    Provider(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the stable error code for this error.
    ///
    /// - 10-19: Configuration errors
    /// - 20-29: Server errors
    /// - 30-39: Provider errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidProgramId(_) => 11,
            Error::ThreadSpawn(_) => 20,
            Error::Socket { .. } => 21,
            Error::ServerVanished => 22,
            Error::Provider(_) => 30,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidProgramId(_) => ErrorCategory::Config,
            Error::ThreadSpawn(_) | Error::Socket { .. } | Error::ServerVanished => {
                ErrorCategory::Server
            }
            Error::Provider(_) => ErrorCategory::Provider,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// OS error number attached to this error, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::Socket { errno, .. } => Some(*errno),
            Error::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// Structured form for JSONL logs.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "category": self.category(),
            "message": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_grouped_by_category() {
        let cases = [
            (Error::Config("x".into()), 10, ErrorCategory::Config),
            (Error::InvalidProgramId("zz".into()), 11, ErrorCategory::Config),
            (Error::ThreadSpawn("oom".into()), 20, ErrorCategory::Server),
            (
                Error::Socket { stage: "bind", errno: 98 },
                21,
                ErrorCategory::Server,
            ),
            (Error::ServerVanished, 22, ErrorCategory::Server),
            (Error::Provider("gone".into()), 30, ErrorCategory::Provider),
        ];
        for (err, code, category) in cases {
            assert_eq!(err.code(), code, "{err}");
            assert_eq!(err.category(), category, "{err}");
        }
    }

    #[test]
    fn socket_error_message_names_stage() {
        let err = Error::Socket { stage: "bind", errno: 98 };
        assert_eq!(err.to_string(), "bind failed: errno 98");
        assert_eq!(err.errno(), Some(98));
    }

    #[test]
    fn io_error_exposes_raw_errno() {
        let err: Error = std::io::Error::from_raw_os_error(13).into();
        assert_eq!(err.errno(), Some(13));
        assert_eq!(err.category(), ErrorCategory::Io);
    }

    #[test]
    fn to_json_has_code_category_message() {
        let v = Error::Config("bad port".into()).to_json();
        assert_eq!(v["code"], 10);
        assert_eq!(v["category"], "config");
        assert_eq!(v["message"], "configuration error: bad port");
    }
}
