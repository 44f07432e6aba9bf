//! Agent configuration loading and validation.
//!
//! The configuration is a single TOML file:
//!
//! ```toml
//! firmware = "19.0.1|AMS 1.9.0"
//!
//! [http]
//! port = 8080
//!
//! [detection]
//! query_interval_secs = 3
//!
//! [programs]
//! retroarch = "0x0100000000002000"
//! ```
//!
//! Resolution order (highest to lowest priority):
//! 1. Explicit `--config` path
//! 2. `DCA_CONFIG` environment variable
//! 3. `$XDG_CONFIG_HOME/dcactivity/config.toml` (or the platform config dir)
//! 4. Built-in defaults
//!
//! An explicit or environment path must exist. A missing file in the default
//! location just means defaults.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use dca_common::ProgramId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::daemon::DaemonConfig;
use crate::http::HttpConfig;
use crate::logging::{event_names, LogSettings};
use crate::telemetry::DetectionConfig;

/// Environment variable naming an explicit config file.
pub const ENV_CONFIG_PATH: &str = "DCA_CONFIG";

/// Directory name under the user config dir.
pub const CONFIG_DIR_NAME: &str = "dcactivity";

/// File name inside [`CONFIG_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Upper bound for `detection.scan_limit`.
pub const MAX_SCAN_LIMIT: usize = 1024;

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for dca_common::Error {
    fn from(err: ConfigError) -> Self {
        dca_common::Error::Config(err.to_string())
    }
}

/// Full agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Firmware description reported in the telemetry document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
    pub http: HttpConfig,
    pub detection: DetectionConfig,
    pub daemon: DaemonConfig,
    pub logging: LogSettings,
    /// Process name (`comm`) to program id, for the `/proc` provider.
    pub programs: BTreeMap<String, ProgramId>,
}

impl AgentConfig {
    /// Parse and validate TOML text. `origin` only labels errors.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "daemon.tick_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.detection.query_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "detection.query_interval_secs must be greater than 0".to_string(),
            ));
        }
        if !(1..=MAX_SCAN_LIMIT).contains(&self.detection.scan_limit) {
            return Err(ConfigError::Invalid(format!(
                "detection.scan_limit must be within 1..={}, got {}",
                MAX_SCAN_LIMIT, self.detection.scan_limit
            )));
        }
        if self.http.backlog <= 0 {
            return Err(ConfigError::Invalid(format!(
                "http.backlog must be greater than 0, got {}",
                self.http.backlog
            )));
        }
        if let Some((name, _)) = self.programs.iter().find(|(_, id)| id.is_none()) {
            return Err(ConfigError::Invalid(format!(
                "programs.{} must be a nonzero program id",
                name
            )));
        }
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// The `[programs]` table in the shape [`crate::provider::ProcfsProvider`] takes.
    pub fn program_table(&self) -> HashMap<String, ProgramId> {
        self.programs
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Where the configuration came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via `--config`.
    CliArgument,
    /// Named by `DCA_CONFIG`.
    Environment,
    /// Found in the user config directory.
    XdgConfig,
    /// No file; built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// A candidate config file and whether it has to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocation {
    pub path: PathBuf,
    pub source: ConfigSource,
}

impl ConfigLocation {
    pub fn is_required(&self) -> bool {
        matches!(
            self.source,
            ConfigSource::CliArgument | ConfigSource::Environment
        )
    }
}

/// Configuration plus provenance.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AgentConfig,
    /// File the configuration was read from; `None` for defaults.
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

impl LoadedConfig {
    /// Emit the provenance event. Called once logging is up.
    pub fn log_provenance(&self) {
        match &self.path {
            Some(path) => info!(
                target: event_names::CONFIG_LOADED,
                path = %path.display(),
                source = %self.source,
                "configuration loaded"
            ),
            None => info!(
                target: event_names::CONFIG_DEFAULT_USED,
                "no configuration file, using defaults"
            ),
        }
    }
}

/// The default config file location, `$XDG_CONFIG_HOME` first, then the
/// platform config dir.
pub fn default_config_path<F>(lookup: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    let base = lookup("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir)?;
    Some(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Pick the config file to read, without touching the filesystem.
pub fn resolve_config_path<F>(cli_path: Option<&Path>, lookup: F) -> Option<ConfigLocation>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = cli_path {
        return Some(ConfigLocation {
            path: path.to_path_buf(),
            source: ConfigSource::CliArgument,
        });
    }
    if let Some(path) = lookup(ENV_CONFIG_PATH).filter(|v| !v.is_empty()) {
        return Some(ConfigLocation {
            path: PathBuf::from(path),
            source: ConfigSource::Environment,
        });
    }
    default_config_path(lookup).map(|path| ConfigLocation {
        path,
        source: ConfigSource::XdgConfig,
    })
}

/// Read and validate one config file.
pub fn load_from_path(path: &Path) -> Result<AgentConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    AgentConfig::from_toml_str(&text, path)
}

/// Load configuration with the standard resolution order and the process
/// environment.
pub fn load_config(cli_path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    load_config_with(cli_path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an injectable environment.
pub fn load_config_with<F>(cli_path: Option<&Path>, lookup: F) -> Result<LoadedConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(location) = resolve_config_path(cli_path, lookup) else {
        return Ok(defaults());
    };

    match load_from_path(&location.path) {
        Ok(config) => Ok(LoadedConfig {
            config,
            path: Some(location.path),
            source: location.source,
        }),
        Err(ConfigError::NotFound { .. }) if !location.is_required() => Ok(defaults()),
        Err(err) => Err(err),
    }
}

fn defaults() -> LoadedConfig {
    LoadedConfig {
        config: AgentConfig::default(),
        path: None,
        source: ConfigSource::BuiltinDefault,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn defaults_validate() {
        AgentConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_full_file() {
        let text = r#"
firmware = "19.0.1|AMS 1.9.0"

[http]
bind = "127.0.0.1"
port = 9090
recover_on_wait_error = true

[detection]
query_interval_secs = 5
scan_limit = 16

[daemon]
tick_interval_ms = 250
allow_query = false

[logging]
level = "debug"
format = "jsonl"

[programs]
retroarch = "0x0100000000002000"
emu = "0100000000003000"
"#;
        let config = AgentConfig::from_toml_str(text, Path::new("test.toml")).unwrap();
        assert_eq!(config.firmware.as_deref(), Some("19.0.1|AMS 1.9.0"));
        assert_eq!(config.http.bind, Ipv4Addr::LOCALHOST);
        assert_eq!(config.http.port, 9090);
        assert_eq!(config.http.backlog, 4);
        assert!(config.http.recover_on_wait_error);
        assert_eq!(config.detection.query_interval_secs, 5);
        assert_eq!(config.detection.scan_limit, 16);
        assert_eq!(config.daemon.tick_interval_ms, 250);
        assert!(!config.daemon.allow_query);
        assert_eq!(config.programs["retroarch"], ProgramId(0x0100_0000_0000_2000));
        assert_eq!(config.programs["emu"], ProgramId(0x0100_0000_0000_3000));
        assert_eq!(config.program_table().len(), 2);
    }

    #[test]
    fn empty_file_is_defaults() {
        let config = AgentConfig::from_toml_str("", Path::new("empty.toml")).unwrap();
        assert_eq!(config, AgentConfig::default());
    }

    #[test]
    fn rejects_zero_intervals() {
        let err = AgentConfig::from_toml_str("[daemon]\ntick_interval_ms = 0\n", Path::new("x"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("tick_interval_ms")));

        let err =
            AgentConfig::from_toml_str("[detection]\nquery_interval_secs = 0\n", Path::new("x"))
                .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("query_interval_secs")));
    }

    #[test]
    fn rejects_scan_limit_out_of_range() {
        for limit in [0usize, MAX_SCAN_LIMIT + 1] {
            let mut config = AgentConfig::default();
            config.detection.scan_limit = limit;
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
        let mut config = AgentConfig::default();
        config.detection.scan_limit = MAX_SCAN_LIMIT;
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_program_ids() {
        let err = AgentConfig::from_toml_str("[programs]\nx = \"0xZZ\"\n", Path::new("p.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = AgentConfig::from_toml_str("[programs]\nx = \"0x0\"\n", Path::new("p.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("programs.x")));
    }

    #[test]
    fn rejects_unparseable_toml() {
        let err = AgentConfig::from_toml_str("[http\nport = ", Path::new("bad.toml")).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, PathBuf::from("bad.toml")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn toml_output_reparses() {
        let mut config = AgentConfig::default();
        config.firmware = Some("19.0.1".to_string());
        config
            .programs
            .insert("retroarch".to_string(), ProgramId(0x0100_0000_0000_2000));
        let text = config.to_toml().unwrap();
        assert!(text.contains("[http]"));
        assert!(text.contains("retroarch = \"0x0100000000002000\""));
        let back = AgentConfig::from_toml_str(&text, Path::new("out.toml")).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn cli_path_wins_over_env() {
        let loc = resolve_config_path(
            Some(Path::new("/tmp/cli.toml")),
            env(&[(ENV_CONFIG_PATH, "/tmp/env.toml")]),
        )
        .unwrap();
        assert_eq!(loc.path, PathBuf::from("/tmp/cli.toml"));
        assert_eq!(loc.source, ConfigSource::CliArgument);
        assert!(loc.is_required());
    }

    #[test]
    fn env_path_wins_over_xdg() {
        let loc = resolve_config_path(
            None,
            env(&[(ENV_CONFIG_PATH, "/tmp/env.toml"), ("XDG_CONFIG_HOME", "/tmp/xdg")]),
        )
        .unwrap();
        assert_eq!(loc.source, ConfigSource::Environment);
        assert_eq!(loc.path, PathBuf::from("/tmp/env.toml"));
    }

    #[test]
    fn xdg_location_is_optional() {
        let loc = resolve_config_path(None, env(&[("XDG_CONFIG_HOME", "/tmp/xdg")])).unwrap();
        assert_eq!(loc.path, PathBuf::from("/tmp/xdg/dcactivity/config.toml"));
        assert_eq!(loc.source, ConfigSource::XdgConfig);
        assert!(!loc.is_required());
    }

    #[test]
    fn missing_default_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let xdg = dir.path().to_string_lossy().into_owned();
        let loaded = load_config_with(None, env(&[("XDG_CONFIG_HOME", xdg.as_str())])).unwrap();
        assert_eq!(loaded.source, ConfigSource::BuiltinDefault);
        assert!(loaded.path.is_none());
        assert_eq!(loaded.config, AgentConfig::default());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = load_config_with(Some(&path), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { path: p } if p == path));

        let env_path = path.to_string_lossy().into_owned();
        let err = load_config_with(None, env(&[(ENV_CONFIG_PATH, env_path.as_str())])).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn loads_from_xdg_dir() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join(CONFIG_DIR_NAME);
        std::fs::create_dir_all(&app).unwrap();
        let path = write(&app, CONFIG_FILE_NAME, "[http]\nport = 9191\n");
        let xdg = dir.path().to_string_lossy().into_owned();

        let loaded = load_config_with(None, env(&[("XDG_CONFIG_HOME", xdg.as_str())])).unwrap();
        assert_eq!(loaded.source, ConfigSource::XdgConfig);
        assert_eq!(loaded.path, Some(path));
        assert_eq!(loaded.config.http.port, 9191);
    }

    #[test]
    fn invalid_default_file_is_still_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join(CONFIG_DIR_NAME);
        std::fs::create_dir_all(&app).unwrap();
        write(&app, CONFIG_FILE_NAME, "[daemon]\ntick_interval_ms = 0\n");
        let xdg = dir.path().to_string_lossy().into_owned();

        let err = load_config_with(None, env(&[("XDG_CONFIG_HOME", xdg.as_str())])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn converts_into_common_error() {
        let err: dca_common::Error = ConfigError::Invalid("bad".to_string()).into();
        assert_eq!(err.code(), 10);
    }
}
