//! Scripted process query provider.
//!
//! Deterministic stand-in for the host platform, used by tests and
//! simulations. The script can be changed between ticks, and every call is
//! counted so throttling and fallback behaviour are observable.
//!
//! # Example
//!
//! ```
//! use dca_core::provider::{ProcessQueryProvider, ScriptedProvider};
//! use dca_common::{ProcessId, ProgramId};
//!
//! let provider = ScriptedProvider::new()
//!     .with_shell(ProcessId(81))
//!     .with_program(ProcessId(81), ProgramId(0x0100_0000_0000_2000));
//!
//! assert_eq!(provider.resolve_shell_process().unwrap(), ProcessId(81));
//! assert_eq!(provider.shell_calls(), 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use dca_common::{ProcessId, ProgramId, ResultCode};

use super::{ProcessQueryProvider, ProviderError};

#[derive(Debug, Clone)]
struct Script {
    shell: Result<ProcessId, ResultCode>,
    programs: HashMap<ProcessId, Result<ProgramId, ResultCode>>,
    processes: Result<Vec<ProcessId>, ResultCode>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            shell: Ok(ProcessId::NONE),
            programs: HashMap::new(),
            processes: Ok(Vec::new()),
        }
    }
}

/// Provider whose answers are set by the caller.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
    shell_calls: AtomicUsize,
    program_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl ScriptedProvider {
    /// Empty script: no shell process, no programs, no processes.
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- builder ------------------------------------------------------------

    pub fn with_shell(self, pid: ProcessId) -> Self {
        self.set_shell(pid);
        self
    }

    pub fn with_shell_failure(self, code: ResultCode) -> Self {
        self.fail_shell(code);
        self
    }

    pub fn with_program(self, pid: ProcessId, program: ProgramId) -> Self {
        self.set_program(pid, program);
        self
    }

    pub fn with_program_failure(self, pid: ProcessId, code: ResultCode) -> Self {
        self.fail_program(pid, code);
        self
    }

    pub fn with_processes(self, pids: &[ProcessId]) -> Self {
        self.set_processes(pids);
        self
    }

    pub fn with_list_failure(self, code: ResultCode) -> Self {
        self.fail_list(code);
        self
    }

    // -- runtime mutation ---------------------------------------------------

    pub fn set_shell(&self, pid: ProcessId) {
        self.script().shell = Ok(pid);
    }

    pub fn fail_shell(&self, code: ResultCode) {
        self.script().shell = Err(code);
    }

    pub fn set_program(&self, pid: ProcessId, program: ProgramId) {
        self.script().programs.insert(pid, Ok(program));
    }

    pub fn fail_program(&self, pid: ProcessId, code: ResultCode) {
        self.script().programs.insert(pid, Err(code));
    }

    pub fn clear_programs(&self) {
        self.script().programs.clear();
    }

    pub fn set_processes(&self, pids: &[ProcessId]) {
        self.script().processes = Ok(pids.to_vec());
    }

    pub fn fail_list(&self, code: ResultCode) {
        self.script().processes = Err(code);
    }

    // -- call accounting ----------------------------------------------------

    pub fn shell_calls(&self) -> usize {
        self.shell_calls.load(Ordering::SeqCst)
    }

    pub fn program_calls(&self) -> usize {
        self.program_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Total provider calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.shell_calls() + self.program_calls() + self.list_calls()
    }
}

impl ProcessQueryProvider for ScriptedProvider {
    fn resolve_shell_process(&self) -> Result<ProcessId, ProviderError> {
        self.shell_calls.fetch_add(1, Ordering::SeqCst);
        self.script()
            .shell
            .map_err(|code| ProviderError::Platform { code })
    }

    fn resolve_program_id(&self, pid: ProcessId) -> Result<ProgramId, ProviderError> {
        self.program_calls.fetch_add(1, Ordering::SeqCst);
        match self.script().programs.get(&pid) {
            Some(Ok(program)) => Ok(*program),
            Some(Err(code)) => Err(ProviderError::Platform { code: *code }),
            None => Err(ProviderError::NotFound),
        }
    }

    fn list_processes(&self, max: usize) -> Result<Vec<ProcessId>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        match &self.script().processes {
            Ok(pids) => Ok(pids.iter().copied().take(max).collect()),
            Err(code) => Err(ProviderError::Platform { code: *code }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_script_has_no_shell_process() {
        let p = ScriptedProvider::new();
        assert_eq!(p.resolve_shell_process().unwrap(), ProcessId::NONE);
        assert!(matches!(
            p.resolve_program_id(ProcessId(1)),
            Err(ProviderError::NotFound)
        ));
        assert!(p.list_processes(64).unwrap().is_empty());
        assert_eq!(p.total_calls(), 3);
    }

    #[test]
    fn failures_surface_their_codes() {
        let p = ScriptedProvider::new()
            .with_shell_failure(ResultCode(0x1F))
            .with_program_failure(ProcessId(9), ResultCode(0x20))
            .with_list_failure(ResultCode(0x21));
        assert_eq!(
            p.resolve_shell_process().unwrap_err().result_code(),
            ResultCode(0x1F)
        );
        assert_eq!(
            p.resolve_program_id(ProcessId(9)).unwrap_err().result_code(),
            ResultCode(0x20)
        );
        assert_eq!(
            p.list_processes(4).unwrap_err().result_code(),
            ResultCode(0x21)
        );
    }

    #[test]
    fn list_respects_max() {
        let pids: Vec<ProcessId> = (1..=100).map(ProcessId).collect();
        let p = ScriptedProvider::new().with_processes(&pids);
        assert_eq!(p.list_processes(64).unwrap().len(), 64);
    }

    #[test]
    fn script_can_change_between_calls() {
        let p = ScriptedProvider::new().with_shell(ProcessId(5));
        assert_eq!(p.resolve_shell_process().unwrap(), ProcessId(5));
        p.set_shell(ProcessId(6));
        assert_eq!(p.resolve_shell_process().unwrap(), ProcessId(6));
        assert_eq!(p.shell_calls(), 2);
    }
}
