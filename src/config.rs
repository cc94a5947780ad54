use crate::duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, optionally loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub supervisor: SupervisorConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Output silence after which the command is killed and restarted.
    #[serde(deserialize_with = "duration::deserialize")]
    pub stall_threshold: Duration,
    /// Delay between a stall kill and the next attempt.
    #[serde(deserialize_with = "duration::deserialize")]
    pub retry_backoff: Duration,
    /// Maximum number of attempts; 0 means unbounded.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
}

/// Errors that can occur while loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Values given on the command line; each one wins over the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub stall_threshold: Option<Duration>,
    pub retry_backoff: Option<Duration>,
    pub max_attempts: Option<u32>,
}

impl Config {
    /// Load a config file. Missing sections and keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Load from `path` when given, otherwise start from defaults, then apply
    /// command-line overrides and validate the result.
    pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(t) = overrides.stall_threshold {
            self.supervisor.stall_threshold = t;
        }
        if let Some(b) = overrides.retry_backoff {
            self.supervisor.retry_backoff = b;
        }
        if let Some(n) = overrides.max_attempts {
            self.supervisor.max_attempts = n;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.supervisor.stall_threshold.is_zero() {
            return Err(ConfigError::Invalid(
                "stall_threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// --- Default implementations ---

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stall_threshold: Duration::from_secs(60),
            retry_backoff: Duration::from_secs(10),
            max_attempts: 0,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
