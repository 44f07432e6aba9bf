//! Periodic driver and agent wiring.
//!
//! The detection poller is passive; something has to call
//! [`DetectionPoller::update`] on a fixed cadence. [`run_driver`] does that
//! until a shutdown flag is raised. [`Agent`] ties telemetry, poller and HTTP
//! server together for `dcactivityd serve`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use dca_common::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, trace};

use crate::clock::Clock;
use crate::config::AgentConfig;
use crate::http::HttpServer;
use crate::logging::event_names;
use crate::provider::ProcessQueryProvider;
use crate::telemetry::{DetectionPoller, SharedTelemetry, Telemetry, TickOutcome};

const SLEEP_SLICE: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Driver cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Milliseconds between poller ticks.
    pub tick_interval_ms: u64,
    /// Whether ticks may query the process provider.
    pub allow_query: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            allow_query: true,
        }
    }
}

impl DaemonConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Tick `poller` every `config.tick_interval_ms` until `shutdown` is set.
/// Returns the number of ticks run.
pub fn run_driver<P, C>(
    poller: &DetectionPoller<P, C>,
    telemetry: &Telemetry,
    config: &DaemonConfig,
    shutdown: &AtomicBool,
) -> u64
where
    P: ProcessQueryProvider,
    C: Clock,
{
    drive(poller, telemetry, config, shutdown, None)
}

/// Like [`run_driver`], but stops after `ticks` ticks. No sleep follows the
/// last tick.
pub fn run_ticks<P, C>(
    poller: &DetectionPoller<P, C>,
    telemetry: &Telemetry,
    config: &DaemonConfig,
    shutdown: &AtomicBool,
    ticks: u64,
) -> u64
where
    P: ProcessQueryProvider,
    C: Clock,
{
    drive(poller, telemetry, config, shutdown, Some(ticks))
}

fn drive<P, C>(
    poller: &DetectionPoller<P, C>,
    telemetry: &Telemetry,
    config: &DaemonConfig,
    shutdown: &AtomicBool,
    limit: Option<u64>,
) -> u64
where
    P: ProcessQueryProvider,
    C: Clock,
{
    let interval = config.tick_interval();
    let mut ticks = 0u64;

    while !shutdown.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| ticks >= limit) {
            break;
        }
        let started = Instant::now();
        let outcome = poller.update(telemetry, config.allow_query);
        ticks += 1;
        if let TickOutcome::Detected { .. } | TickOutcome::Missed { .. } = outcome {
            trace!(tick = ticks, ?outcome, "tick queried provider");
        }
        if limit.is_some_and(|limit| ticks >= limit) {
            break;
        }
        sleep_until(started + interval, shutdown);
    }
    ticks
}

fn sleep_until(deadline: Instant, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// A running agent: shared telemetry, its poller, and the HTTP server.
#[derive(Debug)]
pub struct Agent<P, C> {
    telemetry: SharedTelemetry,
    poller: DetectionPoller<P, C>,
    server: HttpServer,
    daemon: DaemonConfig,
}

impl<P: ProcessQueryProvider, C: Clock> Agent<P, C> {
    /// Build telemetry, apply the firmware string and start the server.
    pub fn start(provider: P, clock: C, config: &AgentConfig) -> Result<Self> {
        let telemetry = Telemetry::shared(clock.now_secs());
        telemetry.set_firmware(config.firmware.as_deref());

        let server = HttpServer::start(telemetry.clone(), config.http.clone())?;
        info!(
            target: event_names::AGENT_STARTED,
            addr = %server.local_addr(),
            allow_query = config.daemon.allow_query,
            started_at = %Utc::now().to_rfc3339(),
            "agent started"
        );

        Ok(Self {
            telemetry,
            poller: DetectionPoller::new(provider, clock, config.detection.clone()),
            server,
            daemon: config.daemon.clone(),
        })
    }

    pub fn telemetry(&self) -> &SharedTelemetry {
        &self.telemetry
    }

    pub fn poller(&self) -> &DetectionPoller<P, C> {
        &self.poller
    }

    pub fn server(&self) -> &HttpServer {
        &self.server
    }

    /// Drive the poller on this thread until `shutdown` is set.
    pub fn run(&self, shutdown: &AtomicBool) -> u64 {
        run_driver(&self.poller, &self.telemetry, &self.daemon, shutdown)
    }

    /// Stop the HTTP server and release everything.
    pub fn shutdown(mut self) {
        self.server.stop();
        let snapshot = self.telemetry.snapshot();
        info!(
            target: event_names::AGENT_STOPPED,
            samples = snapshot.sample_count,
            attempts = snapshot.detection_attempt_count,
            "agent stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::provider::ScriptedProvider;
    use crate::telemetry::DetectionConfig;
    use dca_common::{ProcessId, ProgramId};
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn fast() -> DaemonConfig {
        DaemonConfig {
            tick_interval_ms: 1,
            allow_query: true,
        }
    }

    #[test]
    fn run_ticks_stops_at_limit() {
        let provider = ScriptedProvider::new();
        let poller = DetectionPoller::new(provider, ManualClock::new(0), DetectionConfig::default());
        let telemetry = Telemetry::new(0);
        let shutdown = AtomicBool::new(false);

        let ticks = run_ticks(&poller, &telemetry, &fast(), &shutdown, 5);
        assert_eq!(ticks, 5);
        assert_eq!(telemetry.snapshot().sample_count, 5);
        // Clock never moved: only the first tick passed the throttle.
        assert_eq!(telemetry.snapshot().detection_attempt_count, 1);
    }

    #[test]
    fn run_driver_honours_preset_shutdown() {
        let poller = DetectionPoller::new(
            ScriptedProvider::new(),
            ManualClock::new(0),
            DetectionConfig::default(),
        );
        let telemetry = Telemetry::new(0);
        let shutdown = AtomicBool::new(true);
        assert_eq!(run_driver(&poller, &telemetry, &fast(), &shutdown), 0);
    }

    #[test]
    fn run_driver_stops_when_flag_raised() {
        let poller = DetectionPoller::new(
            ScriptedProvider::new(),
            ManualClock::new(0),
            DetectionConfig::default(),
        );
        let telemetry = Telemetry::new(0);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
        });
        let config = DaemonConfig {
            tick_interval_ms: 10,
            allow_query: false,
        };
        let ticks = run_driver(&poller, &telemetry, &config, &shutdown);
        stopper.join().unwrap();
        assert!(ticks >= 1);
        assert_eq!(telemetry.snapshot().sample_count, ticks);
        assert!(!telemetry.snapshot().detection_mode);
    }

    #[test]
    fn agent_wires_firmware_and_server() {
        let provider = ScriptedProvider::new()
            .with_shell(ProcessId(81))
            .with_program(ProcessId(81), ProgramId(0x0100_0000_0000_2000));
        let clock = Arc::new(ManualClock::new(0));
        let mut config = AgentConfig::default();
        config.firmware = Some("19.0.1|AMS 1.9.0".to_string());
        config.http.bind = Ipv4Addr::LOCALHOST;
        config.http.port = 0;

        let agent = Agent::start(provider, clock.clone(), &config).unwrap();
        assert_eq!(agent.telemetry().snapshot().firmware, "19.0.1|AMS 1.9.0");
        assert!(agent.server().status().is_listening());

        agent.poller().update(agent.telemetry(), true);
        clock.advance(3);
        agent.poller().update(agent.telemetry(), true);
        assert_eq!(
            agent.telemetry().snapshot().active_program_id,
            ProgramId(0x0100_0000_0000_2000)
        );
        agent.shutdown();
    }
}
