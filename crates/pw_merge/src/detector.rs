//! Modification Detector.
//!
//! Walks an extracted mod tree and finds every file whose content differs
//! from the baseline, descending into container archives to find modified
//! members at any depth.
//!
//! # Algorithm
//!
//! 1. Walk the tree, skipping the mod's own `info.json`, `logs/` and `options/`.
//! 2. Map each path to its canonical name. Paths outside every content root are
//!    recorded as ignored.
//! 3. In parallel, hash each file and compare it with the [`BaselineHashTable`].
//!    Unchanged files stop there.
//! 4. A changed container is opened and each member is checked the same way
//!    under its nested name (`parent//member`). The container itself is
//!    reported after its members, so every level that holds a change shows up.
//! 5. Results are merged into one key-unique map, so scheduling order has no
//!    effect on the outcome.
//!
//! A corrupt top-level container becomes an item failure. A corrupt nested
//! container is logged and reported as a plain modified leaf.

use crate::baseline::Baseline;
use crate::error::{Error, Result};
use crate::hashtable::BaselineHashTable;
use crate::pool::{run_batch, ItemFailure};
use camino::{Utf8Path, Utf8PathBuf};
use pw_core::{canonicalize, join_nested, split_nested};
use pw_formats::{is_archive_name, Archive};
use pw_mod_project::{INFO_FILE, OPTIONS_DIR};
use std::collections::BTreeMap;
use walkdir::WalkDir;

/// Top-level entries of a mod directory that never hold game content.
const SKIPPED_ROOTS: &[&str] = &["logs", OPTIONS_DIR, INFO_FILE];

/// A file (or nested member) that differs from the baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedFile {
    pub canonical: String,
    /// The top-level physical file in the mod holding this entry.
    pub source: Utf8PathBuf,
    /// `true` if the entry lives inside a container.
    pub nested: bool,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    /// Modified entries keyed by canonical name.
    pub modified: BTreeMap<String, ModifiedFile>,
    /// Files outside every known content root.
    pub ignored: Vec<Utf8PathBuf>,
    pub failures: Vec<ItemFailure>,
}

impl ScanResult {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty()
    }
}

pub struct Detector<'a> {
    baseline: &'a Baseline,
    count_new: bool,
}

impl<'a> Detector<'a> {
    pub fn new(baseline: &'a Baseline) -> Self {
        Self {
            baseline,
            count_new: true,
        }
    }

    /// Whether files absent from the baseline count as modified (default `true`).
    pub fn count_new(mut self, count_new: bool) -> Self {
        self.count_new = count_new;
        self
    }

    /// Scan every file under `root`.
    pub fn scan_tree(&self, root: &Utf8Path) -> Result<ScanResult> {
        if !root.as_std_path().is_dir() {
            return Err(Error::InvalidModDir(root.to_path_buf()));
        }
        let table = self.baseline.hash_table()?;

        let mut result = ScanResult::default();
        let mut candidates = Vec::new();
        for entry in WalkDir::new(root.as_std_path()).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = match Utf8PathBuf::from_path_buf(entry.into_path()) {
                Ok(p) => p,
                Err(p) => {
                    tracing::warn!("Skipping non-UTF-8 path: {}", p.display());
                    continue;
                }
            };
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            let rel = rel.as_str().replace('\\', "/");
            let first = rel.split('/').next().unwrap_or_default();
            if SKIPPED_ROOTS.contains(&first) {
                continue;
            }

            match canonicalize(&rel) {
                Some(canonical) => candidates.push((canonical, path)),
                None => {
                    tracing::debug!("Ignoring file outside content roots: {}", rel);
                    result.ignored.push(path);
                }
            }
        }

        tracing::info!("Scanning {} files under {}", candidates.len(), root);

        let batch = run_batch(
            candidates,
            |(canonical, _)| canonical.clone(),
            |(canonical, path)| {
                let data = std::fs::read(path.as_std_path())?;
                let names = self.scan_buffer(&canonical, &data, &table)?;
                Ok((path, names))
            },
        )?;

        for (path, names) in batch.successes {
            for name in names {
                let nested = name.contains(pw_core::NESTED_SEPARATOR);
                result.modified.insert(
                    name.clone(),
                    ModifiedFile {
                        canonical: name,
                        source: path.clone(),
                        nested,
                    },
                );
            }
        }
        result.failures = batch.failures;

        tracing::info!(
            "Found {} modified entries, {} ignored files, {} failures",
            result.modified.len(),
            result.ignored.len(),
            result.failures.len()
        );
        Ok(result)
    }

    /// Canonical names of `data` and every modified member below it.
    ///
    /// Returns an empty list if the buffer is unchanged.
    pub fn scan_buffer(
        &self,
        name: &str,
        data: &[u8],
        table: &BaselineHashTable,
    ) -> Result<Vec<String>> {
        let mut out = Vec::new();
        self.scan_into(name, data, table, &mut out)?;
        Ok(out)
    }

    fn scan_into(
        &self,
        name: &str,
        data: &[u8],
        table: &BaselineHashTable,
        out: &mut Vec<String>,
    ) -> Result<()> {
        if !table.is_modified(name, data, self.count_new) {
            return Ok(());
        }

        if is_archive_name(name) {
            match Archive::read(data) {
                Ok(archive) => {
                    for (member, bytes) in archive.iter() {
                        self.scan_into(&join_nested(name, member), bytes, table, out)?;
                    }
                }
                Err(e) if name.contains(pw_core::NESTED_SEPARATOR) => {
                    tracing::warn!("Treating unreadable nested archive {} as a leaf: {}", name, e);
                }
                Err(e) => return Err(Error::corrupt_archive(name, e)),
            }
        }

        out.push(name.to_string());
        Ok(())
    }
}

/// Read the bytes of a (possibly nested) canonical entry from the top-level file `source`.
pub fn read_nested(source: &Utf8Path, canonical: &str) -> Result<Vec<u8>> {
    let data = std::fs::read(source.as_std_path())?;
    extract_nested(data, canonical)
}

/// Descend from the bytes of the top-level file of `canonical` to the entry itself.
pub fn extract_nested(top: Vec<u8>, canonical: &str) -> Result<Vec<u8>> {
    let parts = split_nested(canonical);
    let mut data = top;
    let mut current = parts[0].to_string();
    for member in &parts[1..] {
        let archive = Archive::read(&data).map_err(|e| Error::corrupt_archive(&current, e))?;
        current = join_nested(&current, member);
        data = archive
            .get(member)
            .map(|d| d.to_vec())
            .ok_or_else(|| Error::NotFound(current.clone()))?;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;

    #[test]
    fn test_unchanged_mod_is_empty() {
        let fixture = Fixture::new();
        fixture.write_game_file("Actor/ActorLink/Foo.bxml", b"link");
        let mod_dir = fixture.mod_dir("same");
        Fixture::write_mod_file(&mod_dir, "Actor/ActorLink/Foo.bxml", b"link");

        let baseline = fixture.baseline();
        let result = Detector::new(&baseline).scan_tree(&mod_dir).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_modified_and_new_and_ignored() {
        let fixture = Fixture::new();
        fixture.write_game_file("Actor/ActorLink/Foo.bxml", b"link");
        let mod_dir = fixture.mod_dir("changed");
        Fixture::write_mod_file(&mod_dir, "Actor/ActorLink/Foo.bxml", b"changed");
        Fixture::write_mod_file(&mod_dir, "Actor/ActorLink/New.bxml", b"new");
        Fixture::write(&mod_dir.join("readme.txt"), b"hello");
        Fixture::write(&mod_dir.join("info.json"), b"{}");
        Fixture::write(&mod_dir.join("logs/packs.json"), b"{}");

        let baseline = fixture.baseline();
        let result = Detector::new(&baseline).scan_tree(&mod_dir).unwrap();
        let names: Vec<_> = result.modified.keys().cloned().collect();
        assert_eq!(
            names,
            vec!["Actor/ActorLink/Foo.bxml", "Actor/ActorLink/New.bxml"]
        );
        assert_eq!(result.ignored.len(), 1);

        let strict = Detector::new(&baseline)
            .count_new(false)
            .scan_tree(&mod_dir)
            .unwrap();
        assert_eq!(strict.modified.len(), 1);
    }

    #[test]
    fn test_nested_recursion_chains_names() {
        let fixture = Fixture::new();
        let inner = Fixture::archive_bytes(&[("Actor/ActorLink/Foo.bxml", b"link".to_vec())], true);
        fixture.write_game_archive(
            "Pack/TitleBG.pack",
            &[
                ("Actor/Pack/Foo.sbactorpack", inner),
                ("Actor/Other.bxml", b"other".to_vec()),
            ],
        );

        let mod_dir = fixture.mod_dir("nested");
        let modded_inner =
            Fixture::archive_bytes(&[("Actor/ActorLink/Foo.bxml", b"changed".to_vec())], true);
        Fixture::write_mod_archive(
            &mod_dir,
            "Pack/TitleBG.pack",
            &[
                ("Actor/Pack/Foo.sbactorpack", modded_inner),
                ("Actor/Other.bxml", b"other".to_vec()),
            ],
        );

        let baseline = fixture.baseline();
        let result = Detector::new(&baseline).scan_tree(&mod_dir).unwrap();
        let names: Vec<_> = result.modified.keys().cloned().collect();
        assert_eq!(
            names,
            vec![
                "Pack/TitleBG.pack",
                "Pack/TitleBG.pack//Actor/Pack/Foo.sbactorpack",
                "Pack/TitleBG.pack//Actor/Pack/Foo.sbactorpack//Actor/ActorLink/Foo.bxml",
            ]
        );
        let leaf = &result.modified
            ["Pack/TitleBG.pack//Actor/Pack/Foo.sbactorpack//Actor/ActorLink/Foo.bxml"];
        assert!(leaf.nested);
        assert_eq!(
            read_nested(&leaf.source, &leaf.canonical).unwrap(),
            b"changed"
        );
    }

    #[test]
    fn test_corrupt_archive_is_item_failure() {
        let fixture = Fixture::new();
        fixture.write_game_file("Actor/ActorLink/Foo.bxml", b"link");
        let mod_dir = fixture.mod_dir("corrupt");
        Fixture::write_mod_file(&mod_dir, "Pack/Broken.pack", b"garbage");
        Fixture::write_mod_file(&mod_dir, "Actor/ActorLink/Foo.bxml", b"changed");

        let baseline = fixture.baseline();
        let result = Detector::new(&baseline).scan_tree(&mod_dir).unwrap();
        assert_eq!(result.modified.len(), 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].item, "Pack/Broken.pack");
    }

    #[test]
    fn test_missing_mod_dir() {
        let fixture = Fixture::new();
        let baseline = fixture.baseline();
        let result = Detector::new(&baseline).scan_tree(&fixture.root.join("nope"));
        assert!(matches!(result, Err(Error::InvalidModDir(_))));
    }
}
