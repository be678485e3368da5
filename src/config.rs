//! Application configuration
//!
//! Persisted as TOML under the platform configuration directory. Every section
//! has defaults so a partial file is still valid.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub broadcast: BroadcastConfig,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Voice server endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub voice_endpoint: String,
    pub tcp_port: u16,
    pub udp_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            voice_endpoint: "127.0.0.1".to_string(),
            tcp_port: 6808,
            udp_port: 6807,
        }
    }
}

/// Audio devices and cue tones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture device name, `None` for the system default
    pub input_device: Option<String>,
    /// Headphone output device name, `None` for the system default
    pub output_device: Option<String>,
    /// Speaker output device name, `None` for the system default
    pub speaker_device: Option<String>,
    pub microphone_gain_db: f32,
    pub ptt_press_freq: f32,
    pub ptt_release_freq: f32,
    pub ptt_volume: f32,
    pub conflict_volume: f32,
    pub conflict_tone_freq: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            speaker_device: None,
            microphone_gain_db: 0.0,
            ptt_press_freq: 1500.0,
            ptt_release_freq: 1000.0,
            ptt_volume: 1.0,
            conflict_volume: 1.0,
            conflict_tone_freq: 293.66,
        }
    }
}

/// Loopback notifier for external observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            port: 49080,
        }
    }
}

/// Simulator COM-radio polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub poll_interval_ms: u64,
    pub max_failures: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_failures: 3,
        }
    }
}

impl AppConfig {
    /// Default configuration file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("com", "atc-voice", "atc-voice")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from `path`, writing defaults there when the file does not exist
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {}", path.display());
            return Ok(config);
        }

        let text = fs::read_to_string(path).map_err(ConfigError::Read)?;
        let config: Self = toml::from_str(&text)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Write the whole document to `path`
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::Write)?;
        }
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text).map_err(ConfigError::Write)
    }
}
