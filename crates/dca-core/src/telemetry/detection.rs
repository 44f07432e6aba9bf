//! Foreground program detection with throttling and hysteresis.
//!
//! Each tick the external driver calls [`DetectionPoller::update`]. Most ticks
//! only bump the sample counter; at most once per query interval the poller
//! asks the provider which program is in front:
//!
//! 1. **Primary**: the shell-owning process, resolved to its program id.
//! 2. **Fallback**: scan up to `scan_limit` live processes, drop anything the
//!    [`ProgramFilter`] rejects, and pick the numerically largest program id.
//!    "Highest id wins" is a heuristic for "most likely a user application",
//!    not a guarantee.
//!
//! A candidate is published only after it has been seen on
//! [`PROMOTE_AFTER_MATCHES`] consecutive queries. A single query that finds
//! nothing un-publishes immediately (back to `HOME`).
//!
//! Provider calls happen with the telemetry lock released.

use dca_common::{ProcessId, ProgramId, ResultCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{DetectionSource, Telemetry};
use crate::clock::Clock;
use crate::logging::event_names;
use crate::provider::{result_code_of, ProcessQueryProvider};

/// Consecutive identical candidates required before publishing.
pub const PROMOTE_AFTER_MATCHES: u8 = 2;

/// Default minimum spacing between real provider queries.
pub const DEFAULT_QUERY_INTERVAL_SECS: u64 = 3;

/// Default cap on processes examined by the fallback scan.
pub const DEFAULT_SCAN_LIMIT: usize = 64;

/// The system launcher (home menu).
pub const QLAUNCH_PROGRAM_ID: ProgramId = ProgramId(0x0100_0000_0000_1000);

/// This agent's own service id.
pub const AGENT_PROGRAM_ID: ProgramId = ProgramId(0x00FF_0000_A1B2_C3D4);

/// A masked id range: `id & mask == prefix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramRange {
    #[serde(with = "hex_u64")]
    pub mask: u64,
    #[serde(with = "hex_u64")]
    pub prefix: u64,
}

impl ProgramRange {
    pub const fn new(mask: u64, prefix: u64) -> Self {
        Self { mask, prefix }
    }

    pub fn contains(&self, id: ProgramId) -> bool {
        id.0 & self.mask == self.prefix
    }
}

/// Which program ids the fallback scan may consider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramFilter {
    /// Individually rejected ids.
    pub denylist: Vec<ProgramId>,
    /// Ids outside this range are reserved system ids.
    pub application_range: ProgramRange,
    /// Built-in system programs inside the application range.
    pub system_range: ProgramRange,
}

impl Default for ProgramFilter {
    fn default() -> Self {
        Self {
            denylist: vec![QLAUNCH_PROGRAM_ID, AGENT_PROGRAM_ID],
            application_range: ProgramRange::new(0xFFFF_0000_0000_0000, 0x0100_0000_0000_0000),
            system_range: ProgramRange::new(0xFFFF_FFFF_FFFF_F000, 0x0100_0000_0000_0000),
        }
    }
}

impl ProgramFilter {
    /// Whether `id` may be reported as the foreground program by the scan.
    pub fn accepts(&self, id: ProgramId) -> bool {
        !id.is_none()
            && self.application_range.contains(id)
            && !self.system_range.contains(id)
            && !self.denylist.contains(&id)
    }
}

/// Detection tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum seconds between real provider queries.
    pub query_interval_secs: u64,
    /// Maximum processes examined by the fallback scan.
    pub scan_limit: usize,
    /// Fallback scan filter policy.
    pub filter: ProgramFilter,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            query_interval_secs: DEFAULT_QUERY_INTERVAL_SECS,
            scan_limit: DEFAULT_SCAN_LIMIT,
            filter: ProgramFilter::default(),
        }
    }
}

/// What a single [`DetectionPoller::update`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Queries not permitted this tick; only bookkeeping was updated.
    Sampled,
    /// Queries permitted but the throttle gate is closed.
    Throttled { next_query_sec: u64 },
    /// A candidate was found.
    Detected {
        program: ProgramId,
        source: DetectionSource,
        pending_matches: u8,
        published: bool,
    },
    /// Neither strategy produced a candidate; the answer reset to HOME.
    Missed { fail_streak: u32 },
}

impl TickOutcome {
    /// Whether the provider was queried on this tick.
    pub fn queried(&self) -> bool {
        matches!(self, TickOutcome::Detected { .. } | TickOutcome::Missed { .. })
    }
}

/// Result of one unlocked detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Detection {
    candidate: Option<(ProgramId, DetectionSource)>,
    pm_result: ResultCode,
    pminfo_result: ResultCode,
    svc_result: ResultCode,
    process_id: ProcessId,
}

/// Throttled, debounced foreground program detector.
#[derive(Debug)]
pub struct DetectionPoller<P, C> {
    provider: P,
    clock: C,
    config: DetectionConfig,
}

impl<P: ProcessQueryProvider, C: Clock> DetectionPoller<P, C> {
    pub fn new(provider: P, clock: C, config: DetectionConfig) -> Self {
        Self {
            provider,
            clock,
            config,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Run one tick. `allow_query` gates whether the provider may be called.
    pub fn update(&self, telemetry: &Telemetry, allow_query: bool) -> TickOutcome {
        let now = self.clock.now_secs();

        {
            let mut state = telemetry.lock();
            state.sample_count = state.sample_count.saturating_add(1);
            state.last_update_sec = now;
            if !allow_query {
                return TickOutcome::Sampled;
            }
            state.detection_mode = true;
            if now < state.next_query_sec {
                return TickOutcome::Throttled {
                    next_query_sec: state.next_query_sec,
                };
            }
            state.next_query_sec = now.saturating_add(self.config.query_interval_secs);
        }

        let detection = self.detect();
        debug!(
            target: event_names::DETECT_QUERY,
            pm_result = %detection.pm_result,
            pminfo_result = %detection.pminfo_result,
            svc_result = %detection.svc_result,
            process_id = %detection.process_id,
            found = detection.candidate.is_some(),
            "detection query finished"
        );

        let mut state = telemetry.lock();
        state.detection_attempt_count = state.detection_attempt_count.saturating_add(1);
        state.detection_last_query_sec = now;
        state.last_pm_result = detection.pm_result;
        state.last_pminfo_result = detection.pminfo_result;
        state.last_ns_result = ResultCode::SUCCESS;
        state.last_svc_result = detection.svc_result;
        state.last_process_id = detection.process_id;
        state.detection_source = detection
            .candidate
            .map_or(DetectionSource::None, |(_, source)| source);

        let Some((program, source)) = detection.candidate else {
            state.detection_fail_count = state.detection_fail_count.saturating_add(1);
            state.detection_fail_streak = state.detection_fail_streak.saturating_add(1);
            let fail_streak = state.detection_fail_streak;
            let was_active = !state.active_program_id.is_none();
            state.reset_to_home();
            drop(state);

            if was_active {
                info!(
                    target: event_names::DETECT_UNPUBLISHED,
                    pm_result = %detection.pm_result,
                    svc_result = %detection.svc_result,
                    "no foreground program; back to HOME"
                );
            }
            if fail_streak % 10 == 0 {
                warn!(
                    target: event_names::DETECT_FAIL_STREAK,
                    fail_streak,
                    pm_result = %detection.pm_result,
                    svc_result = %detection.svc_result,
                    "detection keeps failing"
                );
            }
            return TickOutcome::Missed { fail_streak };
        };

        state.detection_success_count = state.detection_success_count.saturating_add(1);
        state.detection_fail_streak = 0;
        state.detection_last_success_sec = now;

        if state.pending_program_id == program {
            state.pending_match_count = state.pending_match_count.saturating_add(1);
        } else {
            state.pending_program_id = program;
            state.pending_match_count = 1;
        }
        let pending_matches = state.pending_match_count;

        let published = pending_matches >= PROMOTE_AFTER_MATCHES;
        let changed = published && state.active_program_id != program;
        if published {
            state.publish(program);
        }
        drop(state);

        if changed {
            info!(
                target: event_names::DETECT_PUBLISHED,
                program = %program,
                source = ?source,
                "foreground program changed"
            );
        } else {
            debug!(
                target: event_names::DETECT_CANDIDATE,
                program = %program,
                source = ?source,
                pending_matches,
                "candidate seen"
            );
        }

        TickOutcome::Detected {
            program,
            source,
            pending_matches,
            published,
        }
    }

    /// Two-tier detection. Must be called without the telemetry lock.
    fn detect(&self) -> Detection {
        let mut detection = Detection {
            candidate: None,
            pm_result: ResultCode::SUCCESS,
            pminfo_result: ResultCode::SUCCESS,
            svc_result: ResultCode::SUCCESS,
            process_id: ProcessId::NONE,
        };

        let shell = self.provider.resolve_shell_process();
        detection.pm_result = result_code_of(&shell);
        if let Ok(pid) = shell {
            detection.process_id = pid;
            if !pid.is_none() {
                let program = self.provider.resolve_program_id(pid);
                detection.pminfo_result = result_code_of(&program);
                if let Ok(program) = program {
                    if !program.is_none() {
                        detection.candidate = Some((program, DetectionSource::PrimaryShell));
                        return detection;
                    }
                }
            }
        }

        let listing = self.provider.list_processes(self.config.scan_limit);
        detection.svc_result = result_code_of(&listing);
        let Ok(pids) = listing else {
            return detection;
        };

        let mut best: Option<(ProgramId, ProcessId)> = None;
        for pid in pids.into_iter().take(self.config.scan_limit) {
            let Ok(candidate) = self.provider.resolve_program_id(pid) else {
                continue;
            };
            if !self.config.filter.accepts(candidate) {
                continue;
            }
            if best.map_or(true, |(current, _)| candidate > current) {
                best = Some((candidate, pid));
            }
        }

        if let Some((program, pid)) = best {
            detection.candidate = Some((program, DetectionSource::ProcessScan));
            detection.process_id = pid;
            detection.pminfo_result = ResultCode::SUCCESS;
        }
        detection
    }
}

/// Serde helper: `u64` as a `0x`-prefixed hex string.
mod hex_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("0x{:016X}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        let digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
        u64::from_str_radix(digits, 16).map_err(serde::de::Error::custom)
    }
}
