//! Engine configuration loaded from `amdsim-config.yaml`.
//!
//! The file names the protocol to load, the run parameters shared by all
//! replicates, and where results go. Every field has a default, so a
//! missing file runs the reference protocol with the default cohort.

use std::path::{Path, PathBuf};

use amdsim_core::RunConfig;
use amdsim_protocol::{ConfigurationError, ProtocolConfig, ProtocolParameterSet};
use serde::{Deserialize, Serialize};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "amdsim-config.yaml";

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "AMDSIM_CONFIG";

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Protocol YAML file. The reference protocol is used when absent.
    #[serde(default)]
    pub protocol: Option<PathBuf>,

    /// Run parameters; replicate `i` runs with a seed derived from
    /// `run.seed` and `i`.
    #[serde(default)]
    pub run: RunConfig,

    /// Number of independent replicate runs.
    #[serde(default = "default_replicates")]
    pub replicates: u32,

    /// Directory receiving one JSON file per replicate and a manifest.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protocol: None,
            run: RunConfig::default(),
            replicates: default_replicates(),
            output_dir: default_output_dir(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Log filter and output format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Io`] or [`ConfigurationError::Yaml`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string. An empty document yields
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Yaml`] on malformed YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigurationError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Check engine-level fields and the shared run parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.replicates == 0 {
            return Err(ConfigurationError::invalid(
                "replicates",
                "at least one replicate is required",
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigurationError::invalid(
                "output_dir",
                "output directory must not be empty",
            ));
        }
        self.run.validate()
    }

    /// Load and compile the configured protocol.
    ///
    /// A relative protocol path is resolved against `base_dir`, the
    /// directory holding the config file.
    ///
    /// # Errors
    ///
    /// Returns any [`ConfigurationError`] raised while reading or
    /// validating the protocol.
    pub fn load_protocol(&self, base_dir: &Path) -> Result<ProtocolParameterSet, ConfigurationError> {
        let raw = match &self.protocol {
            Some(path) => ProtocolConfig::from_file(&base_dir.join(path))?,
            None => ProtocolConfig::default(),
        };
        ProtocolParameterSet::from_config(&raw)
    }
}

/// Config file location: `AMDSIM_CONFIG` if set, else [`DEFAULT_CONFIG_PATH`].
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

const fn default_replicates() -> u32 {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_log_level() -> String {
    "info".to_owned()
}
