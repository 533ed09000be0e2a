//! Read-only access to the unmodified game files.
//!
//! [`Baseline`] is the process-wide cache of everything the engine reads from
//! the game dump: the [`BaselineHashTable`] (built lazily on first use) and
//! decoded baseline containers. Both are safe to share across worker tasks.
//! Call [`Baseline::reset`] whenever the settings that produced the layout
//! change (switching platform or dump directories).

use crate::error::{Error, Result};
use crate::hashtable::BaselineHashTable;
use camino::Utf8PathBuf;
use parking_lot::RwLock;
use pw_core::{split_nested, GameLayout, NESTED_SEPARATOR};
use pw_formats::Archive;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Baseline {
    layout: GameLayout,
    cache_path: Option<Utf8PathBuf>,
    hash_table: RwLock<Option<Arc<BaselineHashTable>>>,
    archives: RwLock<HashMap<String, Arc<Archive>>>,
}

impl Baseline {
    /// Create a baseline over `layout`.
    ///
    /// When `cache_path` is set the hash table is loaded from (and saved to)
    /// that file instead of being rebuilt every process.
    pub fn new(layout: GameLayout, cache_path: Option<Utf8PathBuf>) -> Self {
        Self {
            layout,
            cache_path,
            hash_table: RwLock::new(None),
            archives: RwLock::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &GameLayout {
        &self.layout
    }

    /// The baseline hash table, building it on first use.
    pub fn hash_table(&self) -> Result<Arc<BaselineHashTable>> {
        if let Some(table) = self.hash_table.read().as_ref() {
            return Ok(Arc::clone(table));
        }

        let mut slot = self.hash_table.write();
        if let Some(table) = slot.as_ref() {
            return Ok(Arc::clone(table));
        }

        let table = match &self.cache_path {
            Some(path) => BaselineHashTable::load_or_build(&self.layout, path)?,
            None => BaselineHashTable::build(&self.layout)?,
        };
        let table = Arc::new(table);
        *slot = Some(Arc::clone(&table));
        Ok(table)
    }

    /// Replace the hash table, e.g. with one loaded elsewhere.
    pub fn set_hash_table(&self, table: BaselineHashTable) {
        *self.hash_table.write() = Some(Arc::new(table));
    }

    /// Drop every cached table and container.
    pub fn reset(&self) {
        tracing::debug!("Resetting baseline caches");
        *self.hash_table.write() = None;
        self.archives.write().clear();
    }

    /// Returns `true` if a baseline copy of `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.file_bytes(name).is_ok()
    }

    /// Raw bytes of the baseline copy of `name`, descending into containers
    /// for nested names.
    pub fn file_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let parts = split_nested(name);
        if parts.len() == 1 {
            let path = self.layout.locate_baseline(name)?;
            return Ok(std::fs::read(path.as_std_path())?);
        }

        let parent = parts[..parts.len() - 1].join(NESTED_SEPARATOR);
        let member = parts[parts.len() - 1];
        let archive = self.archive(&parent)?;
        archive
            .get(member)
            .map(|data| data.to_vec())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// The decoded baseline container `name`.
    pub fn archive(&self, name: &str) -> Result<Arc<Archive>> {
        if let Some(archive) = self.archives.read().get(name) {
            return Ok(Arc::clone(archive));
        }

        let bytes = self.file_bytes(name)?;
        let archive = Arc::new(Archive::read(&bytes).map_err(|e| Error::corrupt_archive(name, e))?);
        self.archives
            .write()
            .insert(name.to_string(), Arc::clone(&archive));
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;

    #[test]
    fn test_nested_file_bytes() {
        let fixture = Fixture::new();
        let actor = Fixture::archive_bytes(&[("Actor/ActorLink/Foo.bxml", b"link".to_vec())], true);
        fixture.write_game_archive("Pack/TitleBG.pack", &[("Actor/Pack/Foo.sbactorpack", actor)]);
        let baseline = fixture.baseline();

        let bytes = baseline
            .file_bytes("Pack/TitleBG.pack//Actor/Pack/Foo.sbactorpack//Actor/ActorLink/Foo.bxml")
            .unwrap();
        assert_eq!(bytes, b"link");
        assert!(matches!(
            baseline.file_bytes("Pack/TitleBG.pack//Actor/Pack/Missing.sbactorpack"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            baseline.file_bytes("Pack/Missing.pack"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_container() {
        let fixture = Fixture::new();
        fixture.write_game_file("Pack/Broken.pack", b"garbage");
        let baseline = fixture.baseline();
        assert!(matches!(
            baseline.file_bytes("Pack/Broken.pack//Actor/Foo.bxml"),
            Err(Error::CorruptArchive { .. })
        ));
    }

    #[test]
    fn test_hash_table_is_cached_until_reset() {
        let fixture = Fixture::new();
        fixture.write_game_file("Actor/ActorLink/Foo.bxml", b"link");
        let baseline = fixture.baseline();

        let first = baseline.hash_table().unwrap();
        let second = baseline.hash_table().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        baseline.reset();
        let third = baseline.hash_table().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.contains("Actor/ActorLink/Foo.bxml"));
    }
}
