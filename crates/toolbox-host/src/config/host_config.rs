use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::registry::CategoryPaths;

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not determine the config directory")]
    NoConfigDir,
}

/// Auxiliary event sources to instrument besides the primary one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotReloadConfig {
    /// Whether descriptor directories are polled for changes (default: true)
    #[serde(default = "default_hot_reload")]
    pub enabled: bool,

    /// Poll interval in milliseconds (default: 1000)
    #[serde(default = "default_hot_reload_interval")]
    pub interval_ms: u64,
}

impl HotReloadConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: default_hot_reload(),
            interval_ms: default_hot_reload_interval(),
        }
    }
}

fn default_hot_reload() -> bool {
    true
}

fn default_hot_reload_interval() -> u64 {
    1000
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to a file in the data directory
    #[serde(default)]
    pub file: bool,
}

/// Remote registration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Environment variable holding the bot token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    pub application_id: u64,
}

fn default_token_env() -> String {
    "DISCORD_TOKEN".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Descriptor directories; relative paths resolve against the config file
    #[serde(default)]
    pub paths: CategoryPaths,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub hot_reload: HotReloadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub discord: Option<DiscordConfig>,
}

impl HostConfig {
    /// Default location: `<config dir>/toolbox/config.toml`
    pub fn config_path() -> Result<PathBuf, ConfigLoadError> {
        directories::ProjectDirs::from("", "", "toolbox")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigLoadError::NoConfigDir)
    }

    /// Directory for log files
    pub fn data_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "toolbox").map(|dirs| dirs.data_dir().to_path_buf())
    }

    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;
        if let Some(base) = path.parent() {
            config.paths = config.paths.resolved_against(base);
        }
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse without resolving relative paths
    pub fn parse(content: &str) -> Result<Self, ConfigLoadError> {
        Ok(toml::from_str(content)?)
    }

    /// Starter config with one directory per category next to the file
    pub fn example() -> Self {
        Self {
            paths: CategoryPaths {
                commands: Some(PathBuf::from("commands")),
                events: Some(PathBuf::from("events")),
                interactions: Some(PathBuf::from("interactions")),
                services: Some(PathBuf::from("services")),
            },
            ..Default::default()
        }
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}
