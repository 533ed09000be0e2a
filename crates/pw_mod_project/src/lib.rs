//! Mod descriptor (`info.json`) types.
//!
//! Every extracted mod carries an `info.json` at its root describing the mod
//! and the optional content it ships. Options live under
//! `options/<folder>/` inside the mod and mirror the same content roots as
//! the mod itself.

use camino::Utf8Path;
use pw_core::Platform;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// File name of the descriptor inside a mod directory.
pub const INFO_FILE: &str = "info.json";

/// Directory holding option subtrees inside a mod directory.
pub const OPTIONS_DIR: &str = "options";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid info.json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mod name must not be empty")]
    EmptyName,

    #[error("Option folder '{0}' is declared more than once")]
    DuplicateOption(String),

    #[error("Option folder '{0}' must be a single directory name")]
    InvalidOptionFolder(String),

    #[error("Unknown option '{0}'")]
    UnknownOption(String),

    #[error("Only one option of group '{0}' can be enabled")]
    ConflictingOptions(String),

    #[error("Group '{0}' requires one option to be enabled")]
    MissingRequiredOption(String),
}

/// Describes a mod's `info.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModInfo {
    /// Display name of the mod. The mod id is derived from it.
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, alias = "desc")]
    pub description: String,

    /// Platform the mod was built for.
    #[serde(default)]
    pub platform: Platform,

    /// Ids of mods that must be installed first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,

    #[serde(default)]
    pub options: ModOptions,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Preview image path relative to the mod directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Optional content a mod declares.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ModOptions {
    /// Independent options, any subset may be enabled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multi: Vec<ModOption>,

    /// Groups of mutually exclusive options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub single: Vec<OptionGroup>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModOption {
    pub name: String,
    #[serde(default, alias = "desc")]
    pub description: String,
    /// Directory name under `options/`.
    pub folder: String,
    #[serde(default)]
    pub default: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OptionGroup {
    pub name: String,
    #[serde(default, alias = "desc")]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    pub options: Vec<ModOption>,
}

impl ModInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            description: String::new(),
            platform: Platform::default(),
            depends: Vec::new(),
            options: ModOptions::default(),
            url: None,
            image: None,
        }
    }

    /// Read `info.json` from a mod directory.
    pub fn load(mod_dir: &Utf8Path) -> Result<Self> {
        let content = std::fs::read_to_string(mod_dir.join(INFO_FILE).as_std_path())?;
        let info: Self = serde_json::from_str(&content)?;
        info.validate()?;
        Ok(info)
    }

    /// Write `info.json` into a mod directory.
    pub fn save(&self, mod_dir: &Utf8Path) -> Result<()> {
        std::fs::create_dir_all(mod_dir.as_std_path())?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(mod_dir.join(INFO_FILE).as_std_path(), content)?;
        Ok(())
    }

    /// Stable identifier of the mod, derived from its name.
    pub fn id(&self) -> String {
        slug::slugify(&self.name)
    }

    /// Check the descriptor for structural problems.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::EmptyName);
        }

        let mut seen = HashSet::new();
        for option in self.all_options() {
            let folder = option.folder.as_str();
            if folder.is_empty() || folder.contains(['/', '\\']) || folder == "." || folder == ".." {
                return Err(Error::InvalidOptionFolder(option.folder.clone()));
            }
            if !seen.insert(folder) {
                return Err(Error::DuplicateOption(option.folder.clone()));
            }
        }
        Ok(())
    }

    /// Every declared option, independent ones first, in declaration order.
    pub fn all_options(&self) -> impl Iterator<Item = &ModOption> {
        self.options
            .multi
            .iter()
            .chain(self.options.single.iter().flat_map(|g| g.options.iter()))
    }

    /// Folder names of every declared option.
    pub fn option_folders(&self) -> Vec<String> {
        self.all_options().map(|o| o.folder.clone()).collect()
    }

    /// Options enabled when the user makes no choice.
    ///
    /// A required group without a default falls back to its first option.
    pub fn default_options(&self) -> Vec<String> {
        let mut selected: Vec<String> = self
            .options
            .multi
            .iter()
            .filter(|o| o.default)
            .map(|o| o.folder.clone())
            .collect();

        for group in &self.options.single {
            let choice = group
                .options
                .iter()
                .find(|o| o.default)
                .or_else(|| group.options.first().filter(|_| group.required));
            if let Some(option) = choice {
                selected.push(option.folder.clone());
            }
        }
        selected
    }

    /// Check a set of enabled option folders against the declared options.
    pub fn validate_selection(&self, selected: &[String]) -> Result<()> {
        let known: HashSet<&str> = self.all_options().map(|o| o.folder.as_str()).collect();
        if let Some(unknown) = selected.iter().find(|s| !known.contains(s.as_str())) {
            return Err(Error::UnknownOption(unknown.clone()));
        }

        for group in &self.options.single {
            let enabled = group
                .options
                .iter()
                .filter(|o| selected.contains(&o.folder))
                .count();
            if enabled > 1 {
                return Err(Error::ConflictingOptions(group.name.clone()));
            }
            if enabled == 0 && group.required {
                return Err(Error::MissingRequiredOption(group.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn example() -> ModInfo {
        serde_json::from_str(include_str!("../test-data/info.json")).unwrap()
    }

    #[test]
    fn test_json_parsing() {
        let info = example();
        assert_eq!(info.name, "Second Wind");
        assert_eq!(info.version, "1.9.3");
        assert_eq!(info.platform, Platform::WiiU);
        assert_eq!(info.depends, vec!["first-wind".to_string()]);
        assert_eq!(info.options.multi.len(), 1);
        assert_eq!(info.options.single[0].options.len(), 2);
        assert!(info.options.single[0].required);
        assert!(!info.options.single[0].options[1].default);
        info.validate().unwrap();
    }

    #[test]
    fn test_id_is_slug() {
        assert_eq!(example().id(), "second-wind");
    }

    #[test]
    fn test_minimal_descriptor() {
        let info: ModInfo = serde_json::from_str(r#"{ "name": "Tiny" }"#).unwrap();
        assert_eq!(info.platform, Platform::WiiU);
        assert!(info.option_folders().is_empty());
        assert!(info.default_options().is_empty());
    }

    #[test]
    fn test_default_options() {
        assert_eq!(
            example().default_options(),
            vec!["armor".to_string(), "normal".to_string()]
        );
    }

    #[test]
    fn test_required_group_without_default() {
        let mut info = example();
        info.options.single[0].options[0].default = false;
        assert_eq!(
            info.default_options(),
            vec!["armor".to_string(), "normal".to_string()]
        );
    }

    #[test]
    fn test_validate_selection() {
        let info = example();
        info.validate_selection(&["hard".to_string()]).unwrap();
        assert!(matches!(
            info.validate_selection(&["normal".to_string(), "hard".to_string()]),
            Err(Error::ConflictingOptions(_))
        ));
        assert!(matches!(
            info.validate_selection(&["armor".to_string()]),
            Err(Error::MissingRequiredOption(_))
        ));
        assert!(matches!(
            info.validate_selection(&["missing".to_string(), "hard".to_string()]),
            Err(Error::UnknownOption(_))
        ));
    }

    #[test]
    fn test_duplicate_folder_rejected() {
        let mut info = example();
        info.options.multi.push(ModOption {
            name: "Dup".to_string(),
            description: String::new(),
            folder: "hard".to_string(),
            default: false,
        });
        assert!(matches!(info.validate(), Err(Error::DuplicateOption(_))));
    }

    #[test]
    fn test_nested_folder_rejected() {
        let mut info = example();
        info.options.multi[0].folder = "a/b".to_string();
        assert!(matches!(info.validate(), Err(Error::InvalidOptionFolder(_))));
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap();
        let info = example();
        info.save(dir).unwrap();
        assert_eq!(ModInfo::load(dir).unwrap(), info);
    }
}
