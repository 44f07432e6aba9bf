//! Logging configuration.
//!
//! Sources, lowest to highest precedence:
//! - built-in defaults
//! - the `[logging]` section of the config file
//! - environment variables (`DCA_LOG`, `RUST_LOG`, `DCA_LOG_FORMAT`, `DCA_LOG_FILE`)
//! - CLI flags (`-v`, `-q`, `--log-format`)

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console format (default).
    #[default]
    Human,
    /// Machine-parseable JSON lines.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" | "console" | "pretty" => Ok(LogFormat::Human),
            "jsonl" | "json" | "structured" => Ok(LogFormat::Jsonl),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Jsonl => write!(f, "jsonl"),
        }
    }
}

/// Log level filter. `Off` disables every sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    /// One step more verbose, saturating at `Trace`.
    pub fn more_verbose(self) -> Self {
        match self {
            LogLevel::Off => LogLevel::Error,
            LogLevel::Error => LogLevel::Warn,
            LogLevel::Warn => LogLevel::Info,
            LogLevel::Info => LogLevel::Debug,
            LogLevel::Debug | LogLevel::Trace => LogLevel::Trace,
        }
    }

    /// One step quieter, saturating at `Off`.
    pub fn quieter(self) -> Self {
        match self {
            LogLevel::Trace => LogLevel::Debug,
            LogLevel::Debug => LogLevel::Info,
            LogLevel::Info => LogLevel::Warn,
            LogLevel::Warn => LogLevel::Error,
            LogLevel::Error | LogLevel::Off => LogLevel::Off,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "off" | "none" | "quiet" => Ok(LogLevel::Off),
            _ => Err(format!("unknown log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Off => write!(f, "off"),
        }
    }
}

impl From<LogLevel> for tracing_subscriber::filter::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
            LogLevel::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
            LogLevel::Info => tracing_subscriber::filter::LevelFilter::INFO,
            LogLevel::Warn => tracing_subscriber::filter::LevelFilter::WARN,
            LogLevel::Error => tracing_subscriber::filter::LevelFilter::ERROR,
            LogLevel::Off => tracing_subscriber::filter::LevelFilter::OFF,
        }
    }
}

/// The `[logging]` section of the config file. Unset keys keep the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<LogFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<bool>,
    /// Append-only diagnostic log file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Effective logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Timestamps in human output.
    pub timestamps: bool,
    /// Diagnostic log file, in addition to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Info,
            timestamps: true,
            file: None,
        }
    }
}

impl LogConfig {
    /// Defaults, then the config file section, then the environment.
    pub fn from_env(settings: &LogSettings) -> Self {
        Self::from_lookup(settings, |key| std::env::var(key).ok())
    }

    /// Like [`LogConfig::from_env`] with an explicit variable lookup.
    pub fn from_lookup(settings: &LogSettings, var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = LogConfig::default();

        if let Some(level) = settings.level {
            config.level = level;
        }
        if let Some(format) = settings.format {
            config.format = format;
        }
        if let Some(timestamps) = settings.timestamps {
            config.timestamps = timestamps;
        }
        config.file.clone_from(&settings.file);

        // DCA_LOG takes precedence over RUST_LOG
        if let Some(level) = var("DCA_LOG").and_then(|v| v.parse::<LogLevel>().ok()) {
            config.level = level;
        } else if let Some(val) = var("RUST_LOG") {
            if val.contains("trace") {
                config.level = LogLevel::Trace;
            } else if val.contains("debug") {
                config.level = LogLevel::Debug;
            } else if val.contains("warn") {
                config.level = LogLevel::Warn;
            } else if val.contains("error") {
                config.level = LogLevel::Error;
            } else if val.contains("off") {
                config.level = LogLevel::Off;
            }
        }

        if let Some(format) = var("DCA_LOG_FORMAT").and_then(|v| v.parse::<LogFormat>().ok()) {
            config.format = format;
        }
        if let Some(path) = var("DCA_LOG_FILE").filter(|v| !v.is_empty()) {
            config.file = Some(PathBuf::from(path));
        }

        config
    }

    /// Apply `-v`/`-q` counts and an explicit `--log-format`.
    pub fn with_cli(mut self, verbose: u8, quiet: u8, format: Option<LogFormat>) -> Self {
        for _ in 0..verbose {
            self.level = self.level.more_verbose();
        }
        for _ in 0..quiet {
            self.level = self.level.quieter();
        }
        if let Some(format) = format {
            self.format = format;
        }
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_file(mut self, file: Option<PathBuf>) -> Self {
        self.file = file;
        self
    }

    /// Whether any sink is active.
    pub fn enabled(&self) -> bool {
        self.level != LogLevel::Off
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("human".parse::<LogFormat>().unwrap(), LogFormat::Human);
        assert_eq!("jsonl".parse::<LogFormat>().unwrap(), LogFormat::Jsonl);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Jsonl);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("quiet".parse::<LogLevel>().unwrap(), LogLevel::Off);
        assert_eq!("TRACE".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn defaults_without_sources() {
        let config = LogConfig::from_lookup(&LogSettings::default(), lookup(&[]));
        assert_eq!(config, LogConfig::default());
        assert!(config.enabled());
    }

    #[test]
    fn env_overrides_file_settings() {
        let settings = LogSettings {
            level: Some(LogLevel::Warn),
            format: Some(LogFormat::Jsonl),
            timestamps: Some(false),
            file: Some(PathBuf::from("/var/log/dca.log")),
        };
        let config = LogConfig::from_lookup(&settings, lookup(&[]));
        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.format, LogFormat::Jsonl);
        assert!(!config.timestamps);

        let config = LogConfig::from_lookup(
            &settings,
            lookup(&[("DCA_LOG", "debug"), ("DCA_LOG_FORMAT", "human")]),
        );
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Human);
        assert_eq!(config.file, Some(PathBuf::from("/var/log/dca.log")));
    }

    #[test]
    fn dca_log_beats_rust_log() {
        let config = LogConfig::from_lookup(
            &LogSettings::default(),
            lookup(&[("DCA_LOG", "error"), ("RUST_LOG", "trace")]),
        );
        assert_eq!(config.level, LogLevel::Error);

        let config =
            LogConfig::from_lookup(&LogSettings::default(), lookup(&[("RUST_LOG", "dca=debug")]));
        assert_eq!(config.level, LogLevel::Debug);
    }

    #[test]
    fn cli_counts_step_levels() {
        let base = LogConfig::default();
        assert_eq!(base.clone().with_cli(1, 0, None).level, LogLevel::Debug);
        assert_eq!(base.clone().with_cli(5, 0, None).level, LogLevel::Trace);
        assert_eq!(base.clone().with_cli(0, 1, None).level, LogLevel::Warn);
        let off = base.with_cli(0, 9, Some(LogFormat::Jsonl));
        assert_eq!(off.level, LogLevel::Off);
        assert_eq!(off.format, LogFormat::Jsonl);
        assert!(!off.enabled());
    }

    #[test]
    fn log_file_env() {
        let config =
            LogConfig::from_lookup(&LogSettings::default(), lookup(&[("DCA_LOG_FILE", "/tmp/a.log")]));
        assert_eq!(config.file, Some(PathBuf::from("/tmp/a.log")));
    }
}
