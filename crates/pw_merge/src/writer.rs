//! Writes merged files into the master layer.
//!
//! Mergers hand over `(canonical name, bytes)` pairs. Top-level names are
//! written as files at their physical location for the target platform.
//! Nested names are written back into the master copy of their enclosing
//! container, which is taken from the master layer if it already holds one,
//! otherwise from the baseline. A master container that fails to parse is
//! rebuilt from the baseline.
//!
//! A top-level file whose final bytes equal the baseline copy is removed
//! from the master layer instead of being written.

use crate::baseline::Baseline;
use crate::detector::extract_nested;
use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use pw_core::{join_nested, physical_path, split_nested, top_level, Platform};
use pw_formats::compression::encode_for_name;
use pw_formats::Archive;
use std::collections::BTreeMap;

pub struct MasterWriter<'a> {
    root: Utf8PathBuf,
    baseline: &'a Baseline,
    platform: Platform,
}

impl<'a> MasterWriter<'a> {
    pub fn new(root: Utf8PathBuf, baseline: &'a Baseline) -> Self {
        let platform = baseline.layout().platform();
        Self {
            root,
            baseline,
            platform,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn baseline(&self) -> &Baseline {
        self.baseline
    }

    /// Filesystem path of a top-level canonical file inside the master layer.
    pub fn path_of(&self, name: &str) -> Utf8PathBuf {
        self.root.join(physical_path(name, self.platform))
    }

    /// Current bytes of `name`: the master copy if present, otherwise the baseline.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let top = top_level(name);
        let path = self.path_of(top);
        if path.as_std_path().is_file() {
            let data = std::fs::read(path.as_std_path())?;
            match extract_nested(data, name) {
                Ok(bytes) => return Ok(bytes),
                Err(Error::CorruptArchive { .. }) => {
                    tracing::warn!("Master copy of {} is corrupt, reading baseline", top);
                }
                Err(e) => return Err(e),
            }
        }
        self.baseline.file_bytes(name)
    }

    /// Write every `(canonical, bytes)` pair.
    ///
    /// Returns the top-level files that changed on disk.
    pub fn put_many(&self, items: Vec<(String, Vec<u8>)>) -> Result<Vec<String>> {
        self.apply(items.into_iter().map(|(n, d)| (n, Some(d))).collect())
    }

    pub fn put(&self, name: &str, data: Vec<u8>) -> Result<Vec<String>> {
        self.put_many(vec![(name.to_string(), data)])
    }

    /// Revert the given names to their baseline content.
    ///
    /// Top-level names are removed from the master layer. Nested names get
    /// their baseline member back, or are dropped from their container if the
    /// baseline has no such member.
    pub fn restore(&self, names: &[String]) -> Result<Vec<String>> {
        let mut items = Vec::new();
        for name in names {
            if !name.contains(pw_core::NESTED_SEPARATOR) {
                self.remove_top(name)?;
                continue;
            }
            match self.baseline.file_bytes(name) {
                Ok(data) => items.push((name.clone(), Some(data))),
                Err(Error::NotFound(_)) => items.push((name.clone(), None)),
                Err(e) => return Err(e),
            }
        }
        self.apply(items)
    }

    /// Delete a top-level file from the master layer if present.
    pub fn remove_top(&self, name: &str) -> Result<()> {
        let path = self.path_of(name);
        if path.as_std_path().is_file() {
            tracing::debug!("Removing {} from master", name);
            std::fs::remove_file(path.as_std_path())?;
        }
        Ok(())
    }

    fn apply(&self, items: Vec<(String, Option<Vec<u8>>)>) -> Result<Vec<String>> {
        let mut groups: BTreeMap<String, Vec<(String, Option<Vec<u8>>)>> = BTreeMap::new();
        for (name, data) in items {
            groups
                .entry(top_level(&name).to_string())
                .or_default()
                .push((name, data));
        }

        let mut written = Vec::new();
        for (top, entries) in groups {
            let mut top_data: Option<Vec<u8>> = None;
            let mut nested = Vec::new();
            for (name, data) in entries {
                if name == top {
                    top_data = data;
                } else {
                    nested.push((name, data));
                }
            }

            let bytes = if nested.is_empty() {
                match top_data {
                    Some(bytes) => bytes,
                    None => {
                        self.remove_top(&top)?;
                        continue;
                    }
                }
            } else {
                let mut container = match top_data {
                    Some(bytes) => {
                        Archive::read(&bytes).map_err(|e| Error::corrupt_archive(&top, e))?
                    }
                    None => self.load_container(&top)?,
                };
                for (name, data) in nested {
                    let parts = split_nested(&name);
                    set_member(&mut container, &top, &parts[1..], data)?;
                }
                encode_for_name(&top, container.to_bytes()?)?
            };

            if self.write_top(&top, bytes)? {
                written.push(top);
            }
        }
        Ok(written)
    }

    /// The container to write nested members into.
    fn load_container(&self, top: &str) -> Result<Archive> {
        let path = self.path_of(top);
        if path.as_std_path().is_file() {
            let data = std::fs::read(path.as_std_path())?;
            match Archive::read(&data) {
                Ok(archive) => return Ok(archive),
                Err(e) => {
                    tracing::warn!("Master copy of {} is corrupt ({}), rebuilding from baseline", top, e);
                }
            }
        }

        match self.baseline.file_bytes(top) {
            Ok(data) => Archive::read(&data).map_err(|e| Error::corrupt_archive(top, e)),
            Err(Error::NotFound(_)) => Ok(Archive::new()),
            Err(e) => Err(e),
        }
    }

    /// Write a top-level file. Returns `false` if it equals the baseline and was removed.
    fn write_top(&self, name: &str, bytes: Vec<u8>) -> Result<bool> {
        if let Ok(base) = self.baseline.file_bytes(name) {
            if base == bytes {
                tracing::debug!("{} matches baseline, leaving it out of master", name);
                self.remove_top(name)?;
                return Ok(false);
            }
        }

        let path = self.path_of(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())?;
        }
        std::fs::write(path.as_std_path(), bytes)?;
        Ok(true)
    }
}

/// Set (or remove, for `None`) the member at `path` below `archive`.
fn set_member(
    archive: &mut Archive,
    archive_name: &str,
    path: &[&str],
    data: Option<Vec<u8>>,
) -> Result<()> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(());
    };

    if rest.is_empty() {
        match data {
            Some(bytes) => {
                archive.insert(*first, bytes);
            }
            None => {
                archive.remove(first);
            }
        }
        return Ok(());
    }

    let child_name = join_nested(archive_name, first);
    let mut child = match archive.get(first) {
        Some(bytes) => Archive::read(bytes).map_err(|e| Error::corrupt_archive(&child_name, e))?,
        None if data.is_none() => return Ok(()),
        None => Archive::new(),
    };
    set_member(&mut child, &child_name, rest, data)?;
    archive.insert(*first, encode_for_name(first, child.to_bytes()?)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;

    fn setup() -> (Fixture, std::sync::Arc<Baseline>) {
        let fixture = Fixture::new();
        let inner = Fixture::archive_bytes(&[("/page_0.bgdata", b"base".to_vec())], true);
        fixture.write_game_archive(
            "Pack/Bootup.pack",
            &[
                ("GameData/gamedata.ssarc", inner),
                ("Actor/Other.bxml", b"other".to_vec()),
            ],
        );
        let baseline = fixture.baseline();
        (fixture, baseline)
    }

    #[test]
    fn test_nested_write_back_into_baseline_container() {
        let (fixture, baseline) = setup();
        let writer = MasterWriter::new(fixture.root.join("master"), &baseline);

        let name = "Pack/Bootup.pack//GameData/gamedata.ssarc///page_0.bgdata";
        let written = writer.put(name, b"merged".to_vec()).unwrap();
        assert_eq!(written, vec!["Pack/Bootup.pack".to_string()]);

        assert!(writer.path_of("Pack/Bootup.pack").ends_with("content/Pack/Bootup.pack"));
        assert_eq!(writer.read(name).unwrap(), b"merged");
        assert_eq!(
            writer.read("Pack/Bootup.pack//Actor/Other.bxml").unwrap(),
            b"other"
        );
    }

    #[test]
    fn test_restore_to_baseline_removes_file() {
        let (fixture, baseline) = setup();
        let writer = MasterWriter::new(fixture.root.join("master"), &baseline);

        let name = "Pack/Bootup.pack//GameData/gamedata.ssarc///page_0.bgdata";
        writer.put(name, b"merged".to_vec()).unwrap();
        assert!(writer.path_of("Pack/Bootup.pack").as_std_path().exists());

        let written = writer.restore(&[name.to_string()]).unwrap();
        assert!(written.is_empty());
        assert!(!writer.path_of("Pack/Bootup.pack").as_std_path().exists());
    }

    #[test]
    fn test_corrupt_master_container_rebuilt_from_baseline() {
        let (fixture, baseline) = setup();
        let writer = MasterWriter::new(fixture.root.join("master"), &baseline);
        Fixture::write(&writer.path_of("Pack/Bootup.pack"), b"garbage");

        writer
            .put("Pack/Bootup.pack//Actor/Other.bxml", b"changed".to_vec())
            .unwrap();
        assert_eq!(
            writer.read("Pack/Bootup.pack//Actor/Other.bxml").unwrap(),
            b"changed"
        );
        assert_eq!(
            writer
                .read("Pack/Bootup.pack//GameData/gamedata.ssarc///page_0.bgdata")
                .unwrap(),
            b"base"
        );
    }

    #[test]
    fn test_new_nested_member_without_baseline() {
        let (fixture, baseline) = setup();
        let writer = MasterWriter::new(fixture.root.join("master"), &baseline);
        writer
            .put("Pack/New.pack//Actor/New.bxml", b"new".to_vec())
            .unwrap();
        assert_eq!(writer.read("Pack/New.pack//Actor/New.bxml").unwrap(), b"new");
    }

    #[test]
    fn test_top_level_write_and_identical_skip() {
        let (fixture, baseline) = setup();
        fixture.write_game_file("Actor/ActorLink/Foo.bxml", b"link");
        let writer = MasterWriter::new(fixture.root.join("master"), &baseline);

        assert_eq!(
            writer.put("Actor/ActorLink/Foo.bxml", b"changed".to_vec()).unwrap(),
            vec!["Actor/ActorLink/Foo.bxml".to_string()]
        );
        assert!(writer
            .put("Actor/ActorLink/Foo.bxml", b"link".to_vec())
            .unwrap()
            .is_empty());
        assert!(!writer.path_of("Actor/ActorLink/Foo.bxml").as_std_path().exists());
    }
}
