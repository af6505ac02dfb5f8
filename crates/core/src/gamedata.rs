//! Gamedata: vtable indices loaded from JSON
//!
//! Indices are loaded from a gamedata.json file deployed with the plugin,
//! so a game update only needs a new file, not a rebuild.
//!
//! ```json
//! {
//!     "PlayerRunCommand": {
//!         "offsets": { "windows": 418, "linux": 419 }
//!     }
//! }
//! ```
//!
//! Names are matched case-insensitively, so `"playerruncommand"` finds the
//! entry above.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading gamedata
#[derive(Debug, Error)]
pub enum GamedataError {
    #[error("Failed to read gamedata file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse gamedata JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Offset not found: {0}")]
    OffsetNotFound(String),

    #[error("Invalid offset for {0}: {1}")]
    InvalidOffset(String, i64),
}

/// Platform-specific offset entry
#[derive(Debug, Clone, Deserialize)]
pub struct OffsetEntry {
    /// Windows offset value
    pub windows: Option<i64>,
    /// Linux offset value
    pub linux: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    offsets: OffsetEntry,
}

/// Loaded gamedata
#[derive(Debug, Default, Clone)]
pub struct Gamedata {
    offsets: HashMap<String, OffsetEntry>,
}

impl Gamedata {
    /// Load gamedata from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GamedataError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Load gamedata from a JSON string
    pub fn load_from_str(json: &str) -> Result<Self, GamedataError> {
        let raw: HashMap<String, RawEntry> = serde_json::from_str(json)?;

        let gamedata = Gamedata {
            offsets: raw
                .into_iter()
                .map(|(name, entry)| (name.to_ascii_lowercase(), entry.offsets))
                .collect(),
        };

        tracing::info!("Loaded gamedata: {} offsets", gamedata.offsets.len());

        Ok(gamedata)
    }

    /// Add or replace an offset for every platform
    pub fn with_offset(mut self, name: &str, offset: i64) -> Self {
        self.offsets.insert(
            name.to_ascii_lowercase(),
            OffsetEntry {
                windows: Some(offset),
                linux: Some(offset),
            },
        );
        self
    }

    /// Get an offset by name for the current platform
    pub fn get_offset(&self, name: &str) -> Result<i64, GamedataError> {
        let entry = self
            .offsets
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| GamedataError::OffsetNotFound(name.to_string()))?;

        #[cfg(target_os = "windows")]
        let offset = entry.windows;

        #[cfg(not(target_os = "windows"))]
        let offset = entry.linux;

        offset.ok_or_else(|| {
            GamedataError::OffsetNotFound(format!("{} (no offset for this platform)", name))
        })
    }

    /// Get a vtable index by name
    ///
    /// Failure means the gamedata doesn't match the running game; the
    /// hook that asked for it must not be installed.
    pub fn vfunc_index(&self, name: &str) -> Result<usize, GamedataError> {
        let offset = self.get_offset(name)?;
        usize::try_from(offset).map_err(|_| GamedataError::InvalidOffset(name.to_string(), offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAMEDATA: &str = r#"{
        "PlayerRunCommand": {
            "offsets": { "windows": 418, "linux": 419 }
        },
        "UserMessageBegin": {
            "offsets": { "windows": 43, "linux": 43 }
        },
        "Broken": {
            "offsets": { "windows": -1, "linux": -1 }
        },
        "WindowsOnly": {
            "offsets": { "windows": 7 }
        }
    }"#;

    #[test]
    fn test_vfunc_index_lookup() {
        let gd = Gamedata::load_from_str(GAMEDATA).unwrap();

        #[cfg(not(target_os = "windows"))]
        assert_eq!(gd.vfunc_index("playerruncommand").unwrap(), 419);

        #[cfg(target_os = "windows")]
        assert_eq!(gd.vfunc_index("playerruncommand").unwrap(), 418);

        assert_eq!(gd.vfunc_index("UserMessageBegin").unwrap(), 43);
    }

    #[test]
    fn test_unknown_name_is_an_error() {
        let gd = Gamedata::load_from_str(GAMEDATA).unwrap();
        assert!(matches!(
            gd.vfunc_index("messageend"),
            Err(GamedataError::OffsetNotFound(_))
        ));
    }

    #[test]
    fn test_negative_offset_is_an_error() {
        let gd = Gamedata::load_from_str(GAMEDATA).unwrap();
        assert!(matches!(
            gd.vfunc_index("broken"),
            Err(GamedataError::InvalidOffset(_, -1))
        ));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_missing_platform_is_an_error() {
        let gd = Gamedata::load_from_str(GAMEDATA).unwrap();
        assert!(gd.vfunc_index("windowsonly").is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            Gamedata::load_from_str("{ not json"),
            Err(GamedataError::ParseError(_))
        ));
    }

    #[test]
    fn test_with_offset() {
        let gd = Gamedata::default().with_offset("MessageEnd", 44);
        assert_eq!(gd.vfunc_index("messageend").unwrap(), 44);
    }
}
