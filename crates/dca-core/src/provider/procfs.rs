//! Linux `/proc` process query provider.
//!
//! - Shell-owning process: the foreground process group (`tpgid`) of the
//!   terminal attached to an anchor process (the agent itself by default).
//! - Program id: looked up from the configured `comm → program id` table.
//!   Linux has no native program ids, so unmapped processes are `NotFound`.
//! - Process list: numeric `/proc` entries, ascending, capped.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dca_common::{ProcessId, ProgramId};
use tracing::trace;

use super::{ProcessQueryProvider, ProviderError};

/// Fields parsed from `/proc/[pid]/stat` that the provider needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFields {
    pub pid: u64,
    pub pgrp: i64,
    pub session: i64,
    pub tpgid: i64,
}

/// Provider reading a procfs tree.
#[derive(Debug, Clone)]
pub struct ProcfsProvider {
    root: PathBuf,
    anchor_pid: u64,
    programs: HashMap<String, ProgramId>,
}

impl ProcfsProvider {
    /// Provider over the live `/proc`, anchored at this process.
    pub fn new(programs: HashMap<String, ProgramId>) -> Self {
        Self::with_root("/proc", u64::from(std::process::id()), programs)
    }

    /// Provider over an arbitrary procfs-shaped directory (for testing).
    pub fn with_root(
        root: impl Into<PathBuf>,
        anchor_pid: u64,
        programs: HashMap<String, ProgramId>,
    ) -> Self {
        Self {
            root: root.into(),
            anchor_pid,
            programs,
        }
    }

    /// Use a different anchor process for foreground resolution.
    pub fn with_anchor(mut self, anchor_pid: u64) -> Self {
        self.anchor_pid = anchor_pid;
        self
    }

    fn read_pid_file(&self, pid: u64, name: &str) -> Result<String, ProviderError> {
        let path = self.root.join(pid.to_string()).join(name);
        fs::read_to_string(&path).map_err(map_io_error)
    }
}

fn map_io_error(err: io::Error) -> ProviderError {
    match err.kind() {
        io::ErrorKind::NotFound => ProviderError::NotFound,
        io::ErrorKind::PermissionDenied => ProviderError::PermissionDenied,
        _ => ProviderError::Io(err),
    }
}

/// Parse `/proc/[pid]/stat` content.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are located relative to the last `)`.
pub fn parse_stat_content(content: &str) -> Option<StatFields> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close < open {
        return None;
    }
    let pid = content[..open].trim().parse().ok()?;
    // After ")": state ppid pgrp session tty_nr tpgid ...
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if rest.len() < 6 {
        return None;
    }
    Some(StatFields {
        pid,
        pgrp: rest[2].parse().ok()?,
        session: rest[3].parse().ok()?,
        tpgid: rest[5].parse().ok()?,
    })
}

/// Parse `/proc/[pid]/comm` content.
pub fn parse_comm_content(content: &str) -> Option<&str> {
    let comm = content.trim_end_matches('\n');
    if comm.is_empty() {
        None
    } else {
        Some(comm)
    }
}

/// Collect numeric entries of a procfs directory, ascending, at most `max`.
pub fn list_pid_dirs(root: &Path, max: usize) -> io::Result<Vec<ProcessId>> {
    let mut pids: Vec<u64> = fs::read_dir(root)?
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u64>().ok())
        .collect();
    pids.sort_unstable();
    pids.truncate(max);
    Ok(pids.into_iter().map(ProcessId).collect())
}

impl ProcessQueryProvider for ProcfsProvider {
    fn resolve_shell_process(&self) -> Result<ProcessId, ProviderError> {
        let content = self.read_pid_file(self.anchor_pid, "stat")?;
        let stat = parse_stat_content(&content).ok_or(ProviderError::Unavailable)?;
        trace!(anchor = self.anchor_pid, tpgid = stat.tpgid, "resolved foreground group");
        if stat.tpgid <= 0 {
            // No controlling terminal: nobody owns the foreground.
            return Ok(ProcessId::NONE);
        }
        Ok(ProcessId(stat.tpgid as u64))
    }

    fn resolve_program_id(&self, pid: ProcessId) -> Result<ProgramId, ProviderError> {
        let content = self.read_pid_file(pid.0, "comm")?;
        let comm = parse_comm_content(&content).ok_or(ProviderError::NotFound)?;
        self.programs
            .get(comm)
            .copied()
            .ok_or(ProviderError::NotFound)
    }

    fn list_processes(&self, max: usize) -> Result<Vec<ProcessId>, ProviderError> {
        list_pid_dirs(&self.root, max).map_err(map_io_error)
    }
}
