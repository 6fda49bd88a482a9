//! CLI Configuration
//!
//! Configuration file for the chatsync tool: logging defaults plus the engine
//! timing parameters passed to every session it builds.

use anyhow::{Context, Result};
use chatsync_protocol::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";

/// Tool configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Logging defaults, overridable from the command line
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Engine timing parameters
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON structured logs
    #[serde(default = "default_false")]
    pub json: bool,

    /// Show timestamps in logs
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: default_false(),
            timestamps: default_true(),
        }
    }
}

impl Config {
    /// Default location: `<config dir>/chatsync/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("chatsync")
            .join(CONFIG_FILE)
    }

    /// Load configuration, creating a default file if none exists
    ///
    /// An explicit `path` is used as-is; otherwise [`Config::default_path`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        let config = if config_path.exists() {
            let contents = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file {}", config_path.display())
            })?;
            let config: Config = toml::from_str(&contents).with_context(|| {
                format!("Failed to parse config file {}", config_path.display())
            })?;
            config
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            config
        };

        config
            .engine
            .validate()
            .with_context(|| format!("Invalid engine settings in {}", config_path.display()))?;

        Ok(config)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        tracing::debug!("Wrote configuration to {}", path.display());
        Ok(())
    }
}
