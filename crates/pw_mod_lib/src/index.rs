//! The persisted library index (`library.json`) and the store lock.

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use pw_merge::{Format, ModFlags, ModRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;

pub const INDEX_FILE: &str = "library.json";
pub const MODS_DIR: &str = "mods";
pub const MASTER_DIR: &str = "master";
const LOCK_FILE: &str = ".lock";

/// First priority handed out, and the gap between consecutive installs.
pub const FIRST_PRIORITY: i32 = 100;
pub const PRIORITY_STEP: i32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryModEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub priority: i32,
    pub installed_at: DateTime<Utc>,
    /// Enabled option folders.
    #[serde(default)]
    pub options: Vec<String>,
    /// Formats the mod's enabled content has logs for.
    #[serde(default)]
    pub formats: BTreeSet<Format>,
    #[serde(default)]
    pub flags: ModFlags,
    #[serde(default)]
    pub depends: Vec<String>,
}

impl LibraryModEntry {
    pub fn mod_dir(&self, store_dir: &Utf8Path) -> Utf8PathBuf {
        store_dir.join(MODS_DIR).join(&self.id)
    }

    pub fn record(&self, store_dir: &Utf8Path) -> ModRecord {
        ModRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            priority: self.priority,
            path: self.mod_dir(store_dir),
            options: self.options.clone(),
            formats: self.formats.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryIndex {
    pub mods: Vec<LibraryModEntry>,
}

impl LibraryIndex {
    pub fn path(store_dir: &Utf8Path) -> Utf8PathBuf {
        store_dir.join(INDEX_FILE)
    }

    /// Load the index, or an empty one if the store has none yet.
    pub fn load(store_dir: &Utf8Path) -> Result<Self> {
        let path = Self::path(store_dir);
        if !path.as_std_path().exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path.as_std_path())?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, store_dir: &Utf8Path) -> Result<()> {
        std::fs::create_dir_all(store_dir.as_std_path())?;
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::path(store_dir).as_std_path(), contents)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&LibraryModEntry> {
        self.mods.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut LibraryModEntry> {
        self.mods.iter_mut().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// The mod holding `priority`, other than `except`.
    pub fn holder_of(&self, priority: i32, except: Option<&str>) -> Option<&LibraryModEntry> {
        self.mods
            .iter()
            .find(|m| m.priority == priority && Some(m.id.as_str()) != except)
    }

    pub fn next_priority(&self) -> i32 {
        self.mods
            .iter()
            .map(|m| m.priority + PRIORITY_STEP)
            .max()
            .unwrap_or(FIRST_PRIORITY)
            .max(FIRST_PRIORITY)
    }

    /// Installed mods that declare a dependency on `id`.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.mods
            .iter()
            .filter(|m| m.depends.iter().any(|d| d == id))
            .map(|m| m.id.clone())
            .collect()
    }

    pub fn records(&self, store_dir: &Utf8Path) -> Vec<ModRecord> {
        self.mods.iter().map(|m| m.record(store_dir)).collect()
    }

    /// Entries from highest to lowest priority.
    pub fn by_priority(&self) -> Vec<&LibraryModEntry> {
        let mut mods: Vec<&LibraryModEntry> = self.mods.iter().collect();
        mods.sort_by(|a, b| b.priority.cmp(&a.priority));
        mods
    }
}

/// Exclusive hold on a store. Released on drop.
pub struct StoreLock {
    file: File,
}

impl StoreLock {
    pub fn acquire(store_dir: &Utf8Path) -> Result<Self> {
        std::fs::create_dir_all(store_dir.as_std_path())?;
        let file = File::create(store_dir.join(LOCK_FILE).as_std_path())?;
        file.try_lock_exclusive()
            .map_err(|_| Error::Locked(store_dir.to_path_buf()))?;
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release store lock: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: &str, priority: i32, depends: &[&str]) -> LibraryModEntry {
        LibraryModEntry {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".to_string(),
            priority,
            installed_at: Utc::now(),
            options: Vec::new(),
            formats: BTreeSet::new(),
            flags: ModFlags::default(),
            depends: depends.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_next_priority() {
        let mut index = LibraryIndex::default();
        assert_eq!(index.next_priority(), FIRST_PRIORITY);
        index.mods.push(entry("a", 100, &[]));
        index.mods.push(entry("b", 150, &[]));
        assert_eq!(index.next_priority(), 160);
    }

    #[test]
    fn test_dependents_and_holder() {
        let mut index = LibraryIndex::default();
        index.mods.push(entry("base", 100, &[]));
        index.mods.push(entry("addon", 110, &["base"]));
        assert_eq!(index.dependents_of("base"), vec!["addon".to_string()]);
        assert!(index.dependents_of("addon").is_empty());
        assert_eq!(index.holder_of(110, None).map(|m| m.id.as_str()), Some("addon"));
        assert!(index.holder_of(110, Some("addon")).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = Utf8Path::from_path(temp.path()).unwrap();
        assert!(LibraryIndex::load(store).unwrap().mods.is_empty());

        let mut index = LibraryIndex::default();
        index.mods.push(entry("a", 100, &[]));
        index.save(store).unwrap();
        assert_eq!(LibraryIndex::load(store).unwrap(), index);
    }

    #[test]
    fn test_lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let store = Utf8Path::from_path(temp.path()).unwrap();
        let held = StoreLock::acquire(store).unwrap();
        assert!(matches!(StoreLock::acquire(store), Err(Error::Locked(_))));
        drop(held);
        assert!(StoreLock::acquire(store).is_ok());
    }
}
