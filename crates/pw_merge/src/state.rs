//! Merge state persistence.
//!
//! After a successful merge a [`MergeState`] is written to
//! `logs/merge.json` inside the master layer. It records which mods fed the
//! merge, a fingerprint of their logs, a fingerprint of the game dump and the
//! files each format wrote. A full merge whose inputs match the saved state
//! reuses the master layer as is. An incremental merge uses the recorded
//! outputs to revert the files a format wrote last time before merging it
//! again.

use crate::error::Result;
use crate::logs::LOGS_DIR;
use crate::mergers::Format;
use crate::pipeline::ModRecord;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const STATE_FILE: &str = "merge.json";
const STATE_VERSION: u32 = 1;

/// A mod as it took part in a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedMod {
    pub id: String,
    pub priority: i32,
    #[serde(default)]
    pub options: Vec<String>,
}

impl From<&ModRecord> for MergedMod {
    fn from(record: &ModRecord) -> Self {
        Self {
            id: record.id.clone(),
            priority: record.priority,
            options: record.options.clone(),
        }
    }
}

/// Snapshot of the inputs and outputs of the last merge.
///
/// # JSON format
///
/// ```json
/// {
///   "version": 1,
///   "mods": [{ "id": "mod-a", "priority": 100, "options": [] }],
///   "logsFingerprint": 1234567890,
///   "gameFingerprint": 987654321,
///   "outputs": { "gameData": ["Pack/Bootup.pack//GameData/gamedata.ssarc"] }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeState {
    pub version: u32,
    /// Mods in ascending priority.
    pub mods: Vec<MergedMod>,
    pub logs_fingerprint: u64,
    pub game_fingerprint: u64,
    #[serde(default)]
    pub outputs: BTreeMap<Format, BTreeSet<String>>,
}

impl Default for MergeState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            mods: Vec::new(),
            logs_fingerprint: 0,
            game_fingerprint: 0,
            outputs: BTreeMap::new(),
        }
    }
}

/// Mods of a merge in the order the state stores them.
fn merged_mods(mods: &[ModRecord]) -> Vec<MergedMod> {
    let mut out: Vec<MergedMod> = mods.iter().map(MergedMod::from).collect();
    out.sort_by_key(|m| m.priority);
    out
}

impl MergeState {
    pub fn new(mods: &[ModRecord], logs_fingerprint: u64, game_fingerprint: u64) -> Self {
        Self {
            version: STATE_VERSION,
            mods: merged_mods(mods),
            logs_fingerprint,
            game_fingerprint,
            outputs: BTreeMap::new(),
        }
    }

    pub fn path(master_root: &Utf8Path) -> Utf8PathBuf {
        master_root.join(LOGS_DIR).join(STATE_FILE)
    }

    /// Load the state file.
    ///
    /// Returns `Ok(None)` if it doesn't exist.
    pub fn load(path: &Utf8Path) -> Result<Option<Self>> {
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path.as_std_path())?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())?;
        }
        std::fs::write(path.as_std_path(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Returns `true` if a merge of `mods` would reproduce this state.
    pub fn matches(&self, mods: &[ModRecord], logs_fingerprint: u64, game_fingerprint: u64) -> bool {
        self.version == STATE_VERSION
            && self.mods == merged_mods(mods)
            && self.logs_fingerprint == logs_fingerprint
            && self.game_fingerprint == game_fingerprint
    }

    /// Files `format` wrote in the recorded merge.
    pub fn outputs_of(&self, format: Format) -> Vec<String> {
        self.outputs
            .get(&format)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_outputs(&mut self, format: Format, outputs: impl IntoIterator<Item = String>) {
        let outputs: BTreeSet<String> = outputs.into_iter().collect();
        if outputs.is_empty() {
            self.outputs.remove(&format);
        } else {
            self.outputs.insert(format, outputs);
        }
    }
}
