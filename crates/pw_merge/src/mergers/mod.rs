//! Per-format differencers, consolidators and mergers.
//!
//! Every supported record family implements [`FormatMerger`]. The set is
//! closed: [`Format::ALL`] lists every format in the order the pipeline
//! merges them, and the pipeline dispatches on [`Format`] with a `match`.
//!
//! A merger participates in two phases:
//!
//! - **Install time**: [`FormatMerger::diff`] turns the modified files of one
//!   mod (or one mod option) into that format's diff, which is persisted as a
//!   log by the [`logs`](crate::logs) store.
//! - **Merge time**: the logs of every installed mod are read back, and
//!   [`FormatMerger::merge`] consolidates them and writes the result into the
//!   master layer through the [`MasterWriter`].

pub mod deepmerge;
pub mod keyed;
pub mod maps;
pub mod packs;
pub mod rstb;
pub mod sizecalc;

use crate::baseline::Baseline;
use crate::detector::ModifiedFile;
use crate::error::Result;
use crate::pool::ItemFailure;
use crate::writer::MasterWriter;
use camino::{Utf8Path, Utf8PathBuf};
use pw_core::Platform;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A record family the engine knows how to diff and merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Format {
    /// Container archives.
    Packs,
    /// Game-data flag tables.
    GameData,
    /// Save-data entry tables.
    SaveData,
    /// Parameter trees.
    DeepMerge,
    /// Map placement units.
    Maps,
    /// The resource size table.
    SizeTable,
}

impl Format {
    /// Every format, in merge order.
    pub const ALL: [Format; 6] = [
        Format::Packs,
        Format::GameData,
        Format::SaveData,
        Format::DeepMerge,
        Format::Maps,
        Format::SizeTable,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Format::Packs => "packs",
            Format::GameData => "gamedata",
            Format::SaveData => "savedata",
            Format::DeepMerge => "deepmerge",
            Format::Maps => "maps",
            Format::SizeTable => "rstb",
        }
    }

    /// File name of this format's log inside a `logs/` directory.
    pub fn log_file(&self) -> &'static str {
        match self {
            Format::Packs => "packs.json",
            Format::GameData => "gamedata.json",
            Format::SaveData => "savedata.json",
            Format::DeepMerge => "deepmerge.bin",
            Format::Maps => "map.json",
            Format::SizeTable => "rstb.csv",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-mod switches for the size table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModFlags {
    /// Keep entries the mod would otherwise delete with an unknown size.
    pub leave: bool,
    /// Allow the mod to reduce existing entries.
    pub shrink: bool,
}

/// What a differencer needs to know about the tree it is diffing.
pub struct DiffContext<'a> {
    pub baseline: &'a Baseline,
    /// Install directory of the mod. Paths in logs are relative to it.
    pub mod_root: &'a Utf8Path,
}

impl DiffContext<'_> {
    pub fn platform(&self) -> Platform {
        self.baseline.layout().platform()
    }

    /// Bytes of a modified entry as the mod ships it.
    pub fn modded_bytes(&self, file: &ModifiedFile) -> Result<Vec<u8>> {
        crate::detector::read_nested(&file.source, &file.canonical)
    }
}

/// One mod's diff for one format, as read back from its logs.
#[derive(Debug, Clone)]
pub struct ModDiff<D> {
    pub mod_id: String,
    pub priority: i32,
    pub flags: ModFlags,
    pub mod_root: Utf8PathBuf,
    pub diff: D,
}

pub struct MergeContext<'a> {
    pub baseline: &'a Baseline,
    pub writer: &'a MasterWriter<'a>,
}

impl MergeContext<'_> {
    pub fn platform(&self) -> Platform {
        self.baseline.layout().platform()
    }

    /// Root of the master layer being written.
    pub fn master_root(&self) -> &Utf8Path {
        self.writer.root()
    }
}

/// What one format merge produced.
#[derive(Debug, Default)]
pub struct FormatReport {
    /// Canonical names written into the master layer.
    pub outputs: Vec<String>,
    /// Size-table entries for the written files, keyed by canonical name.
    pub sizes: Vec<(String, u32)>,
    pub failures: Vec<ItemFailure>,
}

pub trait FormatMerger: Sync {
    type Diff: Serialize + DeserializeOwned + Clone + Default + Send + Sync;

    fn format(&self) -> Format;

    /// Compute this format's diff for the modified entries of one tree.
    fn diff(
        &self,
        ctx: &DiffContext<'_>,
        modified: &BTreeMap<String, ModifiedFile>,
    ) -> Result<Self::Diff>;

    fn is_empty(diff: &Self::Diff) -> bool;

    /// Combine diffs given in ascending priority into one.
    ///
    /// Also used to layer a mod's enabled options over its base diff.
    fn consolidate(&self, diffs: Vec<Self::Diff>) -> Self::Diff;

    /// Consolidate every mod's diff and write the result.
    fn merge(&self, ctx: &MergeContext<'_>, mods: Vec<ModDiff<Self::Diff>>) -> Result<FormatReport>;

    fn encode_log(diff: &Self::Diff) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(diff)?)
    }

    fn decode_log(data: &[u8]) -> Result<Self::Diff> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Record the size of a merged output if the size table tracks it.
pub(crate) fn record_size(report: &mut FormatReport, name: &str, data: &[u8], platform: Platform) {
    if sizecalc::is_exempt(name) {
        return;
    }
    let size = sizecalc::calculate_size(name, data, platform);
    report.sizes.push((name.to_string(), size));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_order() {
        assert_eq!(Format::ALL[0], Format::Packs);
        assert_eq!(Format::ALL[5], Format::SizeTable);
        let mut sorted = Format::ALL;
        sorted.sort();
        assert_eq!(sorted, Format::ALL);
    }

    #[test]
    fn test_log_names_unique() {
        let mut names: Vec<_> = Format::ALL.iter().map(|f| f.log_file()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Format::ALL.len());
    }

    #[test]
    fn test_serialized_as_map_key() {
        let mut map = BTreeMap::new();
        map.insert(Format::GameData, 1);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"gameData":1}"#);
    }
}
