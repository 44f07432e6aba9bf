//! Structured logging for the agent.
//!
//! Provides dual-mode logging on stderr:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for supervisors and log shippers
//!
//! plus an optional append-only diagnostic file ([`FileSinkLayer`]).
//!
//! # Usage
//!
//! ```ignore
//! use dca_core::logging::{event_names, init_logging, LogConfig, LogSettings};
//!
//! let config = LogConfig::from_env(&LogSettings::default());
//! init_logging(&config);
//! tracing::info!(target: event_names::AGENT_STARTED, "agent started");
//! ```
//!
//! # Design Notes
//!
//! - stdout is reserved for command payloads (`snapshot`, `config`)
//! - lifecycle events use an [`event_names`] constant as their target
//! - level `off` installs no subscriber at all

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel, LogSettings};
pub use events::{event_names, Level, Stage};
pub use layer::{FileSinkLayer, JsonlLayer};

use std::io::IsTerminal;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Returns `false` when logging is off or a
/// subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> bool {
    if !config.enabled() {
        return false;
    }

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(config.level).into())
        .parse_lossy("");

    let human = config.format == LogFormat::Human;
    let use_ansi = std::io::stderr().is_terminal();
    let timed = (human && config.timestamps).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(use_ansi)
    });
    let untimed = (human && !config.timestamps).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(use_ansi)
            .without_time()
    });
    let jsonl = (!human).then(JsonlLayer::stderr);
    let file = config.file.as_ref().map(FileSinkLayer::new);

    tracing_subscriber::registry()
        .with(filter)
        .with(timed)
        .with(untimed)
        .with(jsonl)
        .with(file)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_installs_nothing() {
        let config = LogConfig::default().with_level(LogLevel::Off);
        assert!(!init_logging(&config));
    }

    #[test]
    fn level_filter_mapping() {
        assert_eq!(LevelFilter::from(LogLevel::Debug), LevelFilter::DEBUG);
        assert_eq!(LevelFilter::from(LogLevel::Off), LevelFilter::OFF);
    }
}
