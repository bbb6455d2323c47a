use dronenet_proto::MacAddress;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_IPC_ROOT: &str = "/tmp/ripple_ipc";
pub const DEFAULT_PROCESS_PERIOD_MS: u64 = 25;
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_ACK_POLL_MS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub mac: Option<String>,
    pub ipc_root: Option<String>,
    pub process_period_ms: Option<u64>,
    pub ack_timeout_ms: Option<u64>,
    pub ack_poll_ms: Option<u64>,
}

/// Resolved timing and location parameters for the virtual radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioSettings {
    pub ipc_root: PathBuf,
    pub process_period: Duration,
    pub ack_timeout: Duration,
    pub ack_poll: Duration,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            ipc_root: PathBuf::from(DEFAULT_IPC_ROOT),
            process_period: Duration::from_millis(DEFAULT_PROCESS_PERIOD_MS),
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            ack_poll: Duration::from_millis(DEFAULT_ACK_POLL_MS),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(mac) = &self.mac {
            mac.parse::<MacAddress>()
                .map_err(|e| ConfigError::Invalid(format!("mac: {}", e)))?;
        }
        if let Some(root) = &self.ipc_root {
            if root.trim().is_empty() {
                return Err(ConfigError::Invalid("ipc_root must not be empty".to_string()));
            }
        }
        if self.process_period_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "process_period_ms must be non-zero".to_string(),
            ));
        }
        if self.ack_poll_ms == Some(0) {
            return Err(ConfigError::Invalid("ack_poll_ms must be non-zero".to_string()));
        }
        let poll = self.ack_poll_ms.unwrap_or(DEFAULT_ACK_POLL_MS);
        let timeout = self.ack_timeout_ms.unwrap_or(DEFAULT_ACK_TIMEOUT_MS);
        if timeout <= poll {
            return Err(ConfigError::Invalid(format!(
                "ack_timeout_ms ({}) must exceed ack_poll_ms ({})",
                timeout, poll
            )));
        }
        Ok(())
    }

    pub fn device_mac(&self) -> Result<Option<MacAddress>, ConfigError> {
        self.mac
            .as_deref()
            .map(|m| {
                m.parse::<MacAddress>()
                    .map_err(|e| ConfigError::Invalid(format!("mac: {}", e)))
            })
            .transpose()
    }

    pub fn radio_settings(&self) -> RadioSettings {
        let defaults = RadioSettings::default();
        RadioSettings {
            ipc_root: self
                .ipc_root
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or(defaults.ipc_root),
            process_period: self
                .process_period_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.process_period),
            ack_timeout: self
                .ack_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.ack_timeout),
            ack_poll: self
                .ack_poll_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.ack_poll),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    if let Some(home) = env::var_os("HOME") {
        PathBuf::from(home)
            .join(".config")
            .join("dronenet")
            .join("config.toml")
    } else {
        PathBuf::from(".config/dronenet/config.toml")
    }
}

pub fn config_path() -> PathBuf {
    env::var("DRONENET_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path())
}

pub fn load_config() -> Result<(Config, PathBuf), ConfigError> {
    let path = config_path();
    let data = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let cfg: Config = toml::from_str(&data)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok((cfg, path))
}

/// Loads the config file if present; a missing file yields the defaults.
pub fn load_config_or_default() -> Result<(Config, PathBuf), ConfigError> {
    match load_config() {
        Err(ConfigError::Read { path, source }) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok((Config::default(), path))
        }
        other => other,
    }
}
