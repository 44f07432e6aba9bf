//! Event vocabulary for structured logs.
//!
//! Every `tracing` call in the agent uses one of the [`event_names`] as its
//! target, so JSONL consumers can filter on the `event` key.

use serde::{Deserialize, Serialize};

/// Log levels as they appear in JSONL output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Agent lifecycle stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Foreground program detection.
    Detect,
    /// HTTP serving.
    Serve,
    /// Listening socket recovery.
    Recover,
    /// Orderly shutdown.
    Shutdown,
}

impl Stage {
    /// Stage an event belongs to, derived from its name prefix.
    pub fn of_event(event: &str) -> Option<Stage> {
        use event_names::*;
        Some(match event {
            CONFIG_LOADED | CONFIG_DEFAULT_USED | AGENT_STARTED => Stage::Init,
            HTTP_RECOVER | HTTP_REOPEN_FAILED => Stage::Recover,
            AGENT_STOPPED | HTTP_THREAD_STOPPED | HTTP_STOPPED => Stage::Shutdown,
            e if e.starts_with("dca.detect.") => Stage::Detect,
            e if e.starts_with("dca.http.") => Stage::Serve,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Detect => "detect",
            Stage::Serve => "serve",
            Stage::Recover => "recover",
            Stage::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Standard event names used as `tracing` targets.
pub mod event_names {
    // Config/init
    pub const CONFIG_LOADED: &str = "dca.config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "dca.config.default_used";
    pub const AGENT_STARTED: &str = "dca.agent.started";
    pub const AGENT_STOPPED: &str = "dca.agent.stopped";

    // Detection
    pub const DETECT_QUERY: &str = "dca.detect.query";
    pub const DETECT_CANDIDATE: &str = "dca.detect.candidate";
    pub const DETECT_PUBLISHED: &str = "dca.detect.published";
    pub const DETECT_UNPUBLISHED: &str = "dca.detect.unpublished";
    pub const DETECT_FAIL_STREAK: &str = "dca.detect.fail_streak";

    // HTTP serving
    pub const HTTP_LISTENING: &str = "dca.http.listening";
    pub const HTTP_SOCKET_FAILED: &str = "dca.http.socket_failed";
    pub const HTTP_WAIT_FAILED: &str = "dca.http.wait_failed";
    pub const HTTP_ACCEPT_FAILED: &str = "dca.http.accept_failed";
    pub const HTTP_RECV_FAILED: &str = "dca.http.recv_failed";
    pub const HTTP_RECOVER: &str = "dca.http.recover";
    pub const HTTP_REOPEN_FAILED: &str = "dca.http.reopen_failed";
    pub const HTTP_THREAD_STOPPED: &str = "dca.http.thread_stopped";
    pub const HTTP_STOPPED: &str = "dca.http.stopped";
}
