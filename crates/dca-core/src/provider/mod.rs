//! Process query providers.
//!
//! The detection poller never talks to the host directly. It goes through a
//! [`ProcessQueryProvider`], which answers three questions:
//!
//! 1. which process currently owns shell/foreground focus,
//! 2. which program a given process was launched from,
//! 3. which processes are alive right now (bounded).
//!
//! Any call may fail. Failures are not fatal to detection; the raw
//! [`ResultCode`] of each call is kept in telemetry for diagnostics.

pub mod procfs;
pub mod scripted;

pub use procfs::ProcfsProvider;
pub use scripted::ScriptedProvider;

use dca_common::{ProcessId, ProgramId, ResultCode};
use thiserror::Error;

/// Errors a provider call can report.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no such process or program")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("query service unavailable")]
    Unavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("platform query failed with result {code}")]
    Platform { code: ResultCode },
}

impl ProviderError {
    /// Raw result code recorded in telemetry for this failure. Never `SUCCESS`.
    pub fn result_code(&self) -> ResultCode {
        match self {
            ProviderError::NotFound => ResultCode(libc::ENOENT as u32),
            ProviderError::PermissionDenied => ResultCode(libc::EACCES as u32),
            ProviderError::Unavailable => ResultCode(libc::EAGAIN as u32),
            ProviderError::Io(e) => match e.raw_os_error() {
                Some(errno) if errno > 0 => ResultCode(errno as u32),
                _ => ResultCode(u32::MAX),
            },
            ProviderError::Platform { code } if code.is_success() => ResultCode(u32::MAX),
            ProviderError::Platform { code } => *code,
        }
    }
}

/// Result code of a provider call outcome: `SUCCESS` or the failure's code.
pub fn result_code_of<T>(result: &Result<T, ProviderError>) -> ResultCode {
    match result {
        Ok(_) => ResultCode::SUCCESS,
        Err(e) => e.result_code(),
    }
}

/// Source of host process information.
///
/// Implementations must be callable from the poller's thread while the HTTP
/// server runs concurrently; they are never called with the telemetry lock
/// held.
pub trait ProcessQueryProvider: Send + Sync {
    /// Process currently holding foreground/shell focus. `ProcessId::NONE`
    /// means "nobody".
    fn resolve_shell_process(&self) -> Result<ProcessId, ProviderError>;

    /// Program the given process was launched from.
    fn resolve_program_id(&self, pid: ProcessId) -> Result<ProgramId, ProviderError>;

    /// Snapshot of live processes, at most `max` entries.
    fn list_processes(&self, max: usize) -> Result<Vec<ProcessId>, ProviderError>;
}

impl<P: ProcessQueryProvider + ?Sized> ProcessQueryProvider for std::sync::Arc<P> {
    fn resolve_shell_process(&self) -> Result<ProcessId, ProviderError> {
        (**self).resolve_shell_process()
    }

    fn resolve_program_id(&self, pid: ProcessId) -> Result<ProgramId, ProviderError> {
        (**self).resolve_program_id(pid)
    }

    fn list_processes(&self, max: usize) -> Result<Vec<ProcessId>, ProviderError> {
        (**self).list_processes(max)
    }
}

impl<P: ProcessQueryProvider + ?Sized> ProcessQueryProvider for Box<P> {
    fn resolve_shell_process(&self) -> Result<ProcessId, ProviderError> {
        (**self).resolve_shell_process()
    }

    fn resolve_program_id(&self, pid: ProcessId) -> Result<ProgramId, ProviderError> {
        (**self).resolve_program_id(pid)
    }

    fn list_processes(&self, max: usize) -> Result<Vec<ProcessId>, ProviderError> {
        (**self).list_processes(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_codes_are_never_success() {
        let errors = [
            ProviderError::NotFound,
            ProviderError::PermissionDenied,
            ProviderError::Unavailable,
            ProviderError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")),
            ProviderError::Platform {
                code: ResultCode::SUCCESS,
            },
            ProviderError::Platform {
                code: ResultCode(0xC8A),
            },
        ];
        for e in &errors {
            assert!(!e.result_code().is_success(), "{e}");
        }
    }

    #[test]
    fn platform_code_passes_through() {
        let e = ProviderError::Platform {
            code: ResultCode(0x0000_0C0F),
        };
        assert_eq!(e.result_code(), ResultCode(0x0000_0C0F));
    }

    #[test]
    fn io_error_uses_errno() {
        let e = ProviderError::Io(std::io::Error::from_raw_os_error(libc::ESRCH));
        assert_eq!(e.result_code(), ResultCode(libc::ESRCH as u32));
    }

    #[test]
    fn result_code_of_ok_is_success() {
        let ok: Result<u8, ProviderError> = Ok(1);
        let err: Result<u8, ProviderError> = Err(ProviderError::NotFound);
        assert_eq!(result_code_of(&ok), ResultCode::SUCCESS);
        assert_eq!(result_code_of(&err), ResultCode(libc::ENOENT as u32));
    }
}
