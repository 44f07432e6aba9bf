//! Telemetry state shared between the detection poller and the HTTP server.
//!
//! There is exactly one [`Telemetry`] per agent. The poller is its only
//! writer; the HTTP server reads it when building `/state` responses. Every
//! access goes through the single mutex, and the lock is never held across
//! provider I/O or socket I/O.

pub mod detection;

pub use detection::{DetectionConfig, DetectionPoller, ProgramFilter, TickOutcome};

use std::sync::{Arc, Mutex, MutexGuard};

use dca_common::{ProcessId, ProgramId, ResultCode};
use serde::Serialize;

use crate::encode::truncate_utf8;

/// Published answer when no foreground program is detected.
pub const HOME_SENTINEL: &str = "HOME";

/// Firmware string used until an initializer sets one.
pub const UNKNOWN_FIRMWARE: &str = "unknown";

/// Maximum stored firmware length in bytes.
pub const FIRMWARE_MAX_BYTES: usize = 31;

/// Maximum stored active-game length in bytes.
pub const ACTIVE_GAME_MAX_BYTES: usize = 255;

/// Which strategy produced the last detection result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DetectionSource {
    #[default]
    None = 0,
    PrimaryShell = 1,
    ProcessScan = 2,
}

impl DetectionSource {
    /// Wire value used in the telemetry document.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// The telemetry record. Only reachable through [`Telemetry::lock`].
#[derive(Debug, Clone)]
pub struct TelemetryState {
    pub started_sec: u64,
    pub last_update_sec: u64,
    pub sample_count: u64,
    pub firmware: String,

    pub active_program_id: ProgramId,
    pub active_game: String,
    pub pending_program_id: ProgramId,
    pub pending_match_count: u8,

    pub next_query_sec: u64,
    pub detection_mode: bool,
    pub detection_source: DetectionSource,

    pub last_pm_result: ResultCode,
    pub last_pminfo_result: ResultCode,
    pub last_ns_result: ResultCode,
    pub last_svc_result: ResultCode,
    pub last_process_id: ProcessId,

    pub detection_attempt_count: u64,
    pub detection_success_count: u64,
    pub detection_fail_count: u64,
    pub detection_fail_streak: u32,
    pub detection_last_query_sec: u64,
    pub detection_last_success_sec: u64,
}

impl TelemetryState {
    /// Fresh state at `now_sec`; the first query is allowed immediately.
    pub fn new(now_sec: u64) -> Self {
        Self {
            started_sec: now_sec,
            last_update_sec: 0,
            sample_count: 0,
            firmware: UNKNOWN_FIRMWARE.to_string(),
            active_program_id: ProgramId::NONE,
            active_game: HOME_SENTINEL.to_string(),
            pending_program_id: ProgramId::NONE,
            pending_match_count: 0,
            next_query_sec: now_sec,
            detection_mode: false,
            detection_source: DetectionSource::None,
            last_pm_result: ResultCode::SUCCESS,
            last_pminfo_result: ResultCode::SUCCESS,
            last_ns_result: ResultCode::SUCCESS,
            last_svc_result: ResultCode::SUCCESS,
            last_process_id: ProcessId::NONE,
            detection_attempt_count: 0,
            detection_success_count: 0,
            detection_fail_count: 0,
            detection_fail_streak: 0,
            detection_last_query_sec: 0,
            detection_last_success_sec: 0,
        }
    }

    /// Un-publish: back to HOME with an empty debounce buffer.
    pub(crate) fn reset_to_home(&mut self) {
        self.pending_program_id = ProgramId::NONE;
        self.pending_match_count = 0;
        self.active_program_id = ProgramId::NONE;
        self.active_game.clear();
        self.active_game.push_str(HOME_SENTINEL);
    }

    pub(crate) fn publish(&mut self, program: ProgramId) {
        self.active_program_id = program;
        self.active_game = truncate_utf8(&program.to_string(), ACTIVE_GAME_MAX_BYTES).to_string();
    }
}

/// Copy of the published fields, taken under one lock hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub firmware: String,
    pub active_program_id: ProgramId,
    pub active_game: String,
    pub started_sec: u64,
    pub last_update_sec: u64,
    pub sample_count: u64,
    pub last_pm_result: ResultCode,
    pub last_pminfo_result: ResultCode,
    pub last_ns_result: ResultCode,
    pub last_svc_result: ResultCode,
    pub last_process_id: ProcessId,
    pub detection_source: DetectionSource,
    pub detection_mode: bool,
    pub detection_attempt_count: u64,
    pub detection_success_count: u64,
    pub detection_fail_count: u64,
    pub detection_fail_streak: u32,
    pub detection_last_query_sec: u64,
    pub detection_last_success_sec: u64,
}

/// Lock-guarded telemetry record.
#[derive(Debug)]
pub struct Telemetry {
    state: Mutex<TelemetryState>,
}

/// Handle shared by the poller and the HTTP server for the agent's lifetime.
pub type SharedTelemetry = Arc<Telemetry>;

impl Telemetry {
    pub fn new(now_sec: u64) -> Self {
        Self {
            state: Mutex::new(TelemetryState::new(now_sec)),
        }
    }

    pub fn shared(now_sec: u64) -> SharedTelemetry {
        Arc::new(Self::new(now_sec))
    }

    /// Acquire the state lock.
    ///
    /// A panic while holding the lock cannot leave the record half-valid in a
    /// way readers care about (all fields are plain values), so poisoning is
    /// cleared rather than propagated.
    pub fn lock(&self) -> MutexGuard<'_, TelemetryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the firmware description, truncated to [`FIRMWARE_MAX_BYTES`] on a
    /// character boundary. `None` restores `"unknown"`.
    pub fn set_firmware(&self, firmware: Option<&str>) {
        let value = truncate_utf8(firmware.unwrap_or(UNKNOWN_FIRMWARE), FIRMWARE_MAX_BYTES);
        let mut state = self.lock();
        state.firmware.clear();
        state.firmware.push_str(value);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let state = self.lock();
        TelemetrySnapshot {
            firmware: state.firmware.clone(),
            active_program_id: state.active_program_id,
            active_game: state.active_game.clone(),
            started_sec: state.started_sec,
            last_update_sec: state.last_update_sec,
            sample_count: state.sample_count,
            last_pm_result: state.last_pm_result,
            last_pminfo_result: state.last_pminfo_result,
            last_ns_result: state.last_ns_result,
            last_svc_result: state.last_svc_result,
            last_process_id: state.last_process_id,
            detection_source: state.detection_source,
            detection_mode: state.detection_mode,
            detection_attempt_count: state.detection_attempt_count,
            detection_success_count: state.detection_success_count,
            detection_fail_count: state.detection_fail_count,
            detection_fail_streak: state.detection_fail_streak,
            detection_last_query_sec: state.detection_last_query_sec,
            detection_last_success_sec: state.detection_last_success_sec,
        }
    }
}
