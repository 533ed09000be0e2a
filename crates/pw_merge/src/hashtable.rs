//! Content-hash table of the unmodified game dump.
//!
//! The [`BaselineHashTable`] maps every canonical name in the dump, including
//! members nested inside container archives, to the xxHash3 digest of its
//! decompressed content. The Modification Detector compares a mod's files
//! against it in O(1) instead of opening the baseline copy.
//!
//! A name can carry more than one digest: the base game and the update tree
//! both contribute, so a mod built against either version counts as
//! unmodified for that file.
//!
//! Building the table reads the whole dump, so it is cached on disk as
//! MessagePack and keyed by a fingerprint of the dump's file sizes and
//! modification times.

use crate::error::Result;
use camino::{Utf8Path, Utf8PathBuf};
use pw_core::{join_nested, GameLayout};
use pw_formats::compression::decompress_if_needed;
use pw_formats::{is_archive_name, Archive};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;
use xxhash_rust::xxh3::xxh3_64;

/// Bumped whenever the cache layout or hashing scheme changes.
const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineHashTable {
    version: u32,
    fingerprint: u64,
    hashes: HashMap<String, Vec<u64>>,
}

/// Digest of a file's content, independent of whether it is stored compressed.
pub fn content_hash(data: &[u8]) -> u64 {
    match decompress_if_needed(data) {
        Ok(raw) => xxh3_64(&raw),
        Err(_) => xxh3_64(data),
    }
}

impl BaselineHashTable {
    /// An empty table for the given dump fingerprint.
    pub fn new(fingerprint: u64) -> Self {
        Self {
            version: CACHE_VERSION,
            fingerprint,
            hashes: HashMap::new(),
        }
    }

    /// Hash every file of every dump layer, recursing into containers.
    pub fn build(layout: &GameLayout) -> Result<Self> {
        let fingerprint = dump_fingerprint(layout)?;
        let mut table = Self::new(fingerprint);

        for layer in layout.layers() {
            if !layer.root.as_std_path().is_dir() {
                tracing::warn!("Baseline layer {} does not exist, skipping", layer.root);
                continue;
            }
            tracing::info!("Hashing baseline layer {}", layer.root);
            let files = list_files(&layer.root)?;

            let entries: Vec<Vec<(String, u64)>> = files
                .par_iter()
                .map(|(rel, path)| {
                    let name = format!("{}{}", layer.prefix, rel);
                    match std::fs::read(path.as_std_path()) {
                        Ok(data) => {
                            let mut out = Vec::new();
                            hash_tree(&name, &data, &mut out);
                            out
                        }
                        Err(e) => {
                            tracing::warn!("Skipping unreadable baseline file {}: {}", path, e);
                            Vec::new()
                        }
                    }
                })
                .collect();

            for (name, hash) in entries.into_iter().flatten() {
                table.insert(name, hash);
            }
        }

        tracing::info!(
            "Baseline hash table built: {} names, fingerprint {:016x}",
            table.hashes.len(),
            fingerprint
        );
        Ok(table)
    }

    /// Load the cached table if it is still valid for `layout`, otherwise
    /// rebuild it and refresh the cache.
    pub fn load_or_build(layout: &GameLayout, cache_path: &Utf8Path) -> Result<Self> {
        let fingerprint = dump_fingerprint(layout)?;
        match Self::load(cache_path) {
            Ok(Some(table)) if table.version == CACHE_VERSION && table.fingerprint == fingerprint => {
                tracing::info!("Using cached baseline hash table {}", cache_path);
                return Ok(table);
            }
            Ok(Some(_)) => tracing::info!("Baseline hash table cache is stale, rebuilding"),
            Ok(None) => {}
            Err(e) => tracing::warn!("Ignoring unreadable hash table cache: {}", e),
        }

        let table = Self::build(layout)?;
        table.save(cache_path)?;
        Ok(table)
    }

    /// Returns `Ok(None)` if the cache file doesn't exist.
    pub fn load(path: &Utf8Path) -> Result<Option<Self>> {
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path.as_std_path())?;
        Ok(Some(rmp_serde::from_slice(&bytes)?))
    }

    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())?;
        }
        std::fs::write(path.as_std_path(), rmp_serde::to_vec(self)?)?;
        Ok(())
    }

    /// Record a digest for `name`. Duplicate digests are ignored.
    pub fn insert(&mut self, name: impl Into<String>, hash: u64) {
        let hashes = self.hashes.entry(name.into()).or_default();
        if !hashes.contains(&hash) {
            hashes.push(hash);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hashes.contains_key(name)
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Decide whether `data` differs from every known baseline version of `name`.
    ///
    /// Names absent from the baseline count as modified only when
    /// `count_new` is set.
    pub fn is_modified(&self, name: &str, data: &[u8], count_new: bool) -> bool {
        match self.hashes.get(name) {
            Some(known) => !known.contains(&content_hash(data)),
            None => count_new,
        }
    }
}

/// Hash `data` under `name` and, for containers, every member below it.
fn hash_tree(name: &str, data: &[u8], out: &mut Vec<(String, u64)>) {
    out.push((name.to_string(), content_hash(data)));

    if !is_archive_name(name) {
        return;
    }
    match Archive::read(data) {
        Ok(archive) => {
            for (member, bytes) in archive.iter() {
                hash_tree(&join_nested(name, member), bytes, out);
            }
        }
        Err(e) => tracing::warn!("Skipping corrupt baseline archive {}: {}", name, e),
    }
}

/// All regular files under `root` as `(forward-slash relative path, full path)`, sorted.
fn list_files(root: &Utf8Path) -> Result<Vec<(String, Utf8PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root.as_std_path()).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.into_path()) else {
            continue;
        };
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let rel = rel.as_str().replace('\\', "/");
        files.push((rel, path));
    }
    Ok(files)
}

/// Fingerprint of the dump derived from file names, sizes and modification times.
///
/// Changes when the dump is patched or a layer directory is swapped.
pub fn dump_fingerprint(layout: &GameLayout) -> Result<u64> {
    let mut buf = Vec::new();
    buf.extend_from_slice(layout.platform().to_string().as_bytes());

    for layer in layout.layers() {
        buf.extend_from_slice(layer.prefix.as_bytes());
        if !layer.root.as_std_path().is_dir() {
            continue;
        }
        for (rel, path) in list_files(&layer.root)? {
            let metadata = std::fs::metadata(path.as_std_path())?;
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            buf.extend_from_slice(rel.as_bytes());
            buf.extend_from_slice(&metadata.len().to_le_bytes());
            buf.extend_from_slice(&modified.to_le_bytes());
        }
    }

    Ok(xxh3_64(&buf))
}
