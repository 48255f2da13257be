//! Configuration file support.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/wellness/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub profile: ProfileConfig,

    #[serde(default)]
    pub packet: PacketConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl DataConfig {
    /// Directory holding one JSON document per user
    pub fn profiles_dir(&self) -> PathBuf {
        self.data_dir.join("profiles")
    }
}

/// Extra module definitions appended to the built-in set
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RegistryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules_file: Option<PathBuf>,
}

/// Aggregator behaviour
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ProfileConfig {
    /// Refuse to complete a module while visible required questions are unanswered.
    /// Off by default: an explicit complete always completes.
    #[serde(default)]
    pub enforce_required_on_complete: bool,
}

/// Packet assembly parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacketConfig {
    #[serde(default = "default_packet_title")]
    pub title: String,

    #[serde(default = "default_max_exercises")]
    pub max_exercises: usize,

    #[serde(default = "default_max_nutrition_items")]
    pub max_nutrition_items: usize,

    /// JSON library replacing the built-in content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_file: Option<PathBuf>,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            title: default_packet_title(),
            max_exercises: default_max_exercises(),
            max_nutrition_items: default_max_nutrition_items(),
            library_file: None,
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("wellness")
}

fn default_packet_title() -> String {
    "Personal Wellness Packet".into()
}

fn default_max_exercises() -> usize {
    6
}

fn default_max_nutrition_items() -> usize {
    4
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.check()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("wellness").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.packet.title.trim().is_empty() {
            return Err(Error::Config("packet.title must not be empty".into()));
        }
        Ok(())
    }
}
