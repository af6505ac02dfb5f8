//! Configuration
//!
//! The core settings live in a single TOML file under the ncz base
//! directory. Missing files are created with defaults, missing keys take
//! their default value.
//!
//! ```toml
//! version = 1
//! debug = false
//! message_mode = "legacy"
//!
//! [shot_tester]
//! short_click_time = 0.04
//! cooldown = 1.0
//! min_clicks = 50
//! ```

mod loader;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::hooks::MessageMode;
use crate::testers::ShotTesterConfig;

pub use loader::{configs_dir, core_config_path, gamedata_path};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Core configuration.
///
/// Loaded from `{base}/configs/core.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Enable debug logging
    pub debug: bool,

    /// User message API of the running game
    pub message_mode: MessageMode,

    pub shot_tester: ShotTesterConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            version: 1,
            debug: false,
            message_mode: MessageMode::default(),
            shot_tester: ShotTesterConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load core config from `path`, creating default if missing.
    pub fn load_from_path(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config = Self::from_toml_str(&content)?;
            tracing::debug!("Loaded core config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save_to_path(path)?;
            tracing::info!("Created default core config at {:?}", path);
            Ok(default)
        }
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save core config to `path`.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save_to_path(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved core config to {:?}", path);
        Ok(())
    }

    /// Reload core config from `path`.
    pub fn reload_from_path(&mut self, path: &Path) -> ConfigResult<()> {
        let content = std::fs::read_to_string(path)?;
        *self = Self::from_toml_str(&content)?;
        tracing::debug!("Reloaded core config from {:?}", path);
        Ok(())
    }
}
