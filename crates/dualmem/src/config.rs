//! Configuration management for dualmem.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Command-line flags (`--config`, `--data-dir`)
//! 2. Environment (`DUALMEM_CONFIG`)
//! 3. Config file (platform config dir, `config.toml`)
//! 4. Default values

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use dualmem_sdk::SDKConfig;
use serde::{Deserialize, Serialize};

use crate::error::CliResult;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory the memory base path is resolved against
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Memory system settings
    #[serde(default)]
    pub memory: SDKConfig,

    /// External quality judge
    #[serde(default)]
    pub judge: JudgeConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Shell command that reads a candidate on stdin and prints verdict JSON
    pub command: Option<String>,

    /// Overrides `memory.promotion.judge_timeout_secs`
    pub timeout_secs: Option<u64>,
}

fn default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("dev", "dualmem", "dualmem") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dualmem")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            memory: SDKConfig::default(),
            judge: JudgeConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing file yields defaults. The result is validated.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        let mut config: Config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            Config::default()
        };

        if let Some(timeout) = config.judge.timeout_secs {
            config.memory.promotion.judge_timeout_secs = timeout;
        }
        config.memory.validate()?;
        Ok(config)
    }

    /// Get the config file path.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("DUALMEM_CONFIG") {
            PathBuf::from(path)
        } else if let Some(proj_dirs) = ProjectDirs::from("dev", "dualmem", "dualmem") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            default_data_dir().join("config.toml")
        }
    }

    /// Directory holding `permanent/`, `temporary/` and the metadata file.
    ///
    /// An absolute `memory.base_path` wins over `data_dir`.
    pub fn memory_dir(&self) -> PathBuf {
        self.data_dir.join(&self.memory.base_path)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> CliResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
