//! Persistent settings.
//!
//! Settings are stored as TOML:
//!
//! ```toml
//! game_dir = "/dump/content"
//! update_dir = "/dump/update/content"
//! dlc_dir = "/dump/dlc/content/0010"
//! platform = "wiiu"
//! store_dir = "/home/user/.packweave"
//! ```

use crate::error::{Error, Result};
use crate::layout::GameLayout;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Target platform of the game dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    WiiU,
    Switch,
}

impl Platform {
    /// Root folder of base game content in a mod or output tree.
    pub fn content_root(self) -> &'static str {
        match self {
            Platform::WiiU => "content",
            Platform::Switch => "01007EF00011E000/romfs",
        }
    }

    /// Root folder of add-on content in a mod or output tree.
    pub fn aoc_root(self) -> &'static str {
        match self {
            Platform::WiiU => "aoc/0010",
            Platform::Switch => "01007EF00011F001/romfs",
        }
    }

    /// Returns `true` for the platform whose binary formats are big endian.
    pub fn is_big_endian(self) -> bool {
        matches!(self, Platform::WiiU)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::WiiU => f.write_str("wiiu"),
            Platform::Switch => f.write_str("switch"),
        }
    }
}

/// Application settings, persisted as TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Base game content directory (contains `Pack/`, `Actor/`, ...).
    pub game_dir: Utf8PathBuf,
    /// Update content directory, overlaid on top of the base game.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_dir: Option<Utf8PathBuf>,
    /// Add-on content directory (the `0010` folder).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlc_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub platform: Platform,
    /// Directory holding installed mods, the library index and the master layer.
    pub store_dir: Utf8PathBuf,
    /// Where the baseline hash table is cached. Defaults to `<store_dir>/hashes.bin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_table_cache: Option<Utf8PathBuf>,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        if !path.as_std_path().exists() {
            return Err(Error::SettingsNotFound(path.to_path_buf()));
        }
        tracing::debug!("Loading settings from {}", path);
        let content = std::fs::read_to_string(path.as_std_path())?;
        Ok(toml::from_str(&content)?)
    }

    /// Save settings to a TOML file, creating parent directories if needed.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_std_path(), content)?;
        tracing::debug!("Saved settings to {}", path);
        Ok(())
    }

    /// Check that every configured directory is usable.
    ///
    /// Called before any batch work starts so a broken dump never yields a
    /// half-finished merge.
    pub fn validate(&self) -> Result<()> {
        if self.game_dir.as_str().is_empty() {
            return Err(Error::Configuration("game directory is not set".into()));
        }
        if !self.game_dir.as_std_path().is_dir() {
            return Err(Error::Configuration(format!(
                "game directory does not exist: {}",
                self.game_dir
            )));
        }
        if !self.game_dir.join("Pack").as_std_path().is_dir() {
            return Err(Error::Configuration(format!(
                "game directory has no Pack folder: {}",
                self.game_dir
            )));
        }
        for (label, dir) in [("update", &self.update_dir), ("DLC", &self.dlc_dir)] {
            if let Some(dir) = dir {
                if !dir.as_std_path().is_dir() {
                    return Err(Error::Configuration(format!(
                        "{label} directory does not exist: {dir}"
                    )));
                }
            }
        }
        if self.store_dir.as_str().is_empty() {
            return Err(Error::Configuration("store directory is not set".into()));
        }
        Ok(())
    }

    /// Path of the cached baseline hash table.
    pub fn hash_table_cache_path(&self) -> Utf8PathBuf {
        self.hash_table_cache
            .clone()
            .unwrap_or_else(|| self.store_dir.join("hashes.bin"))
    }

    /// The game dump layout described by these settings.
    pub fn layout(&self) -> GameLayout {
        GameLayout::new(
            self.game_dir.clone(),
            self.update_dir.clone(),
            self.dlc_dir.clone(),
            self.platform,
        )
    }
}
