//! Daemon settings store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use matrixlink_core::PresetCollection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Remote engine settings
    #[serde(default)]
    pub vban: VbanConfig,
    /// State carried between runs
    #[serde(default)]
    pub session: SessionConfig,
    /// Presets in display order
    #[serde(default)]
    pub presets: PresetCollection,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { log_level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Remote engine endpoint and timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VbanConfig {
    /// Open the command channel at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Engine address
    #[serde(default = "default_remote_ip")]
    pub remote_ip: String,
    /// Engine UDP port; validated when the channel is opened
    #[serde(default = "default_remote_port")]
    pub remote_port: i64,
    /// VBAN stream name, at most 16 bytes
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// Seconds between RT-packet registrations
    #[serde(default = "default_resubscribe_secs")]
    pub resubscribe_secs: u64,
    /// Milliseconds between preset switch steps
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
}

impl Default for VbanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remote_ip: default_remote_ip(),
            remote_port: default_remote_port(),
            stream_name: default_stream_name(),
            resubscribe_secs: default_resubscribe_secs(),
            step_delay_ms: default_step_delay_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_remote_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_remote_port() -> i64 {
    6980
}

fn default_stream_name() -> String {
    "Command1".to_string()
}

fn default_resubscribe_secs() -> u64 {
    10
}

fn default_step_delay_ms() -> u64 {
    50
}

/// State carried between runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionConfig {
    /// Name of the preset applied last
    pub last_active_preset: Option<String>,
}

/// Load configuration from `path`, or defaults if the file does not exist.
///
/// An empty preset list is seeded with the built-in presets.
pub fn load_from(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        toml::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse config file: {path:?}"))?
    } else {
        info!(?path, "Config file not found, using defaults");
        Config::default()
    };

    if config.presets.is_empty() {
        debug!("No presets stored, seeding built-in presets");
        config.presets = PresetCollection::builtin();
    }
    Ok(config)
}

/// Write configuration to `path`, creating parent directories.
pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {parent:?}"))?;
    }
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write config file: {path:?}"))?;
    debug!(?path, "Configuration saved");
    Ok(())
}

/// Get the configuration file path.
pub fn config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "matrixlink", "MatrixLink")
        .context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}
