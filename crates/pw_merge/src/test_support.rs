//! Fixtures shared by the unit tests: a tiny game dump in a temp directory.

use crate::baseline::Baseline;
use camino::{Utf8Path, Utf8PathBuf};
use pw_core::{GameLayout, Platform};
use pw_formats::compression::compress;
use pw_formats::Archive;
use std::sync::Arc;
use tempfile::TempDir;

pub(crate) struct Fixture {
    _temp: TempDir,
    pub root: Utf8PathBuf,
    pub layout: GameLayout,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = Utf8Path::from_path(temp.path()).unwrap().to_path_buf();
        for dir in ["game/Pack", "update", "dlc", "store"] {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        let layout = GameLayout::new(
            root.join("game"),
            Some(root.join("update")),
            Some(root.join("dlc")),
            Platform::WiiU,
        );
        Self {
            _temp: temp,
            root,
            layout,
        }
    }

    pub fn baseline(&self) -> Arc<Baseline> {
        Arc::new(Baseline::new(self.layout.clone(), None))
    }

    pub fn write(path: &Utf8Path, data: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    pub fn write_game_file(&self, name: &str, data: &[u8]) {
        Self::write(&self.root.join("game").join(name), data);
    }

    pub fn write_dlc_file(&self, name: &str, data: &[u8]) {
        Self::write(&self.root.join("dlc").join(name), data);
    }

    pub fn write_game_archive(&self, name: &str, members: &[(&str, Vec<u8>)]) {
        let compressed = pw_formats::compression::is_compressed_name(name);
        self.write_game_file(name, &Self::archive_bytes(members, compressed));
    }

    /// Encode an archive from `(member, bytes)` pairs.
    pub fn archive_bytes(members: &[(&str, Vec<u8>)], compressed: bool) -> Vec<u8> {
        let archive: Archive = members
            .iter()
            .map(|(name, data)| (name.to_string(), data.clone()))
            .collect();
        let bytes = archive.to_bytes().unwrap();
        if compressed {
            compress(&bytes).unwrap()
        } else {
            bytes
        }
    }

    /// Create an empty mod directory under the store.
    pub fn mod_dir(&self, id: &str) -> Utf8PathBuf {
        let dir = self.root.join("store/mods").join(id);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Write a file into a mod's base content root.
    pub fn write_mod_file(mod_dir: &Utf8Path, name: &str, data: &[u8]) {
        Self::write(&mod_dir.join("content").join(name), data);
    }

    pub fn write_mod_archive(mod_dir: &Utf8Path, name: &str, members: &[(&str, Vec<u8>)]) {
        let compressed = pw_formats::compression::is_compressed_name(name);
        Self::write_mod_file(mod_dir, name, &Self::archive_bytes(members, compressed));
    }
}
