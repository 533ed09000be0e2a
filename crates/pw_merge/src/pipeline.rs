//! Merge pipeline.
//!
//! The [`MergeEngine`] owns the two halves of the engine:
//!
//! - [`process_mod`](MergeEngine::process_mod) runs once per installed mod:
//!   it scans the mod's base content and each option against the baseline,
//!   computes every format's diff and writes the logs.
//! - [`merge_all`](MergeEngine::merge_all) and [`merge`](MergeEngine::merge)
//!   read those logs back and rebuild the master layer.
//!
//! # Merge Algorithm
//!
//! 1. Compute the game fingerprint and the fingerprint of every mod's logs.
//! 2. For a full merge, if the saved [`MergeState`] matches and the master
//!    layer exists, reuse it and stop.
//! 3. Prepare a staging directory next to the master layer: empty for a full
//!    rebuild, a copy of the current master for an incremental merge.
//! 4. For each format in merge order (packs first, size table last):
//!    - incremental only: revert the files the format wrote last time
//!    - read every mod's log in ascending priority and merge
//!    - record the sizes of the written files in the master size log
//! 5. Save the new state into staging and swap staging in for the master.
//!
//! A fatal error at any point removes the staging directory and leaves the
//! previous master layer untouched. Non-fatal failures are collected and
//! reported as a [`MergeOutcome::Partial`] result.

use crate::baseline::Baseline;
use crate::detector::{Detector, ModifiedFile};
use crate::error::Result;
use crate::hashtable::dump_fingerprint;
use crate::logs;
use crate::mergers::deepmerge::DeepMerger;
use crate::mergers::keyed::{KeyedMerger, TableKind};
use crate::mergers::maps::MapMerger;
use crate::mergers::packs::PackMerger;
use crate::mergers::rstb::{record_sizes, SizeTableMerger};
use crate::mergers::{DiffContext, Format, FormatMerger, FormatReport, MergeContext};
use crate::pool::ItemFailure;
use crate::state::MergeState;
use crate::writer::MasterWriter;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// An installed mod as the merge sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModRecord {
    pub id: String,
    pub name: String,
    /// Higher priority wins conflicts.
    pub priority: i32,
    /// Root of the mod inside the store.
    pub path: Utf8PathBuf,
    /// Enabled option folders, in the order they are layered.
    #[serde(default)]
    pub options: Vec<String>,
    /// Formats the mod has logs for.
    #[serde(default)]
    pub formats: BTreeSet<Format>,
}

/// Progress information emitted while processing or merging.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeProgress {
    pub stage: MergeStage,
    /// The tree being scanned or the format being diffed or merged.
    pub current_file: Option<String>,
    pub current: u32,
    pub total: u32,
}

/// Stages, emitted in order: `Scanning` -> `Diffing` (install only) or
/// `Merging` (repeated) -> `Writing` -> `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStage {
    Scanning,
    Diffing,
    Merging,
    Writing,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Complete,
    /// The master layer was written but some items failed.
    Partial { failures: Vec<ItemFailure> },
}

/// Summary returned after a merge.
#[derive(Debug)]
pub struct MergeResult {
    pub master_root: Utf8PathBuf,
    pub outcome: MergeOutcome,
    pub formats_merged: Vec<Format>,
    /// Canonical names written into the master layer.
    pub files_written: Vec<String>,
    /// `true` if the existing master layer was reused without merging.
    pub reused: bool,
    pub build_time: Duration,
}

/// Summary of scanning and diffing one mod.
#[derive(Debug, Default)]
pub struct ProcessResult {
    /// Formats the mod (base content or any option) has logs for.
    pub formats: BTreeSet<Format>,
    pub modified: usize,
    pub ignored: Vec<Utf8PathBuf>,
    pub failures: Vec<ItemFailure>,
}

type ProgressCallback = Arc<dyn Fn(MergeProgress) + Send + Sync>;

pub struct MergeEngine {
    baseline: Arc<Baseline>,
    master_root: Utf8PathBuf,
    progress_callback: Option<ProgressCallback>,
}

impl MergeEngine {
    pub fn new(baseline: Arc<Baseline>, master_root: Utf8PathBuf) -> Self {
        Self {
            baseline,
            master_root,
            progress_callback: None,
        }
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(MergeProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    pub fn master_root(&self) -> &Utf8Path {
        &self.master_root
    }

    pub fn baseline(&self) -> &Arc<Baseline> {
        &self.baseline
    }

    /// Scan a mod and write its logs.
    ///
    /// Every existing log of the mod and of the listed options is replaced.
    /// Size-table marker files are left alone.
    pub fn process_mod(&self, mod_root: &Utf8Path, options: &[String]) -> Result<ProcessResult> {
        tracing::info!("Processing mod {}", mod_root);
        let mut trees = vec![(mod_root.to_path_buf(), logs::log_dir(mod_root))];
        for folder in options {
            trees.push((
                logs::option_dir(mod_root, folder),
                logs::option_log_dir(mod_root, folder),
            ));
        }

        let mut result = ProcessResult::default();
        let total = trees.len() as u32;
        for (idx, (tree, log_dir)) in trees.into_iter().enumerate() {
            logs::clear_logs(&log_dir)?;
            if !tree.as_std_path().is_dir() {
                tracing::warn!("Option directory {} is missing, skipping", tree);
                continue;
            }

            self.emit_progress(MergeProgress {
                stage: MergeStage::Scanning,
                current_file: Some(tree.to_string()),
                current: idx as u32 + 1,
                total,
            });
            let scan = Detector::new(&self.baseline).scan_tree(&tree)?;
            result.modified += scan.modified.len();
            result.ignored.extend(scan.ignored);
            result.failures.extend(scan.failures);
            if scan.modified.is_empty() {
                tracing::info!("No modified files under {}", tree);
                continue;
            }

            let ctx = DiffContext {
                baseline: &self.baseline,
                mod_root,
            };
            for (fidx, format) in Format::ALL.into_iter().enumerate() {
                self.emit_progress(MergeProgress {
                    stage: MergeStage::Diffing,
                    current_file: Some(format.name().to_string()),
                    current: fidx as u32 + 1,
                    total: Format::ALL.len() as u32,
                });
                match diff_format(format, &ctx, &scan.modified, &log_dir) {
                    Ok(true) => tracing::debug!("Wrote {} log for {}", format, tree),
                    Ok(false) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::warn!("Diffing {} for {} failed: {}", format, tree, e);
                        result.failures.push(ItemFailure::new(format.name(), &e));
                    }
                }
            }
        }

        result.formats = logs::formats_present(mod_root, options);
        tracing::info!(
            "Processed mod {}: {} modified entries, formats {:?}",
            mod_root,
            result.modified,
            result.formats
        );
        self.emit_progress(MergeProgress {
            stage: MergeStage::Complete,
            current_file: None,
            current: 0,
            total: 0,
        });
        Ok(result)
    }

    /// Merge every format, reusing the master layer if nothing changed.
    pub fn merge_all(&self, mods: &[ModRecord]) -> Result<MergeResult> {
        let start = Instant::now();
        let game_fingerprint = dump_fingerprint(self.baseline.layout())?;
        let logs_fingerprint = logs::logs_fingerprint(mods)?;

        if let Some(state) = MergeState::load(&MergeState::path(&self.master_root))? {
            if state.matches(mods, logs_fingerprint, game_fingerprint)
                && self.master_root.as_std_path().is_dir()
            {
                tracing::info!("Master layer is up to date, reusing it");
                self.emit_progress(MergeProgress {
                    stage: MergeStage::Complete,
                    current_file: None,
                    current: 0,
                    total: 0,
                });
                return Ok(MergeResult {
                    master_root: self.master_root.clone(),
                    outcome: MergeOutcome::Complete,
                    formats_merged: Vec::new(),
                    files_written: Vec::new(),
                    reused: true,
                    build_time: start.elapsed(),
                });
            }
        }

        self.rebuild(mods, logs_fingerprint, game_fingerprint, start)
    }

    /// Merge every format from scratch, ignoring the saved state.
    pub fn rebuild_all(&self, mods: &[ModRecord]) -> Result<MergeResult> {
        let start = Instant::now();
        let game_fingerprint = dump_fingerprint(self.baseline.layout())?;
        let logs_fingerprint = logs::logs_fingerprint(mods)?;
        self.rebuild(mods, logs_fingerprint, game_fingerprint, start)
    }

    /// Re-merge only `formats` (the size table is always included).
    ///
    /// Falls back to a full rebuild when packs are involved or there is no
    /// usable previous merge to start from.
    pub fn merge(&self, mods: &[ModRecord], formats: &BTreeSet<Format>) -> Result<MergeResult> {
        let start = Instant::now();
        let game_fingerprint = dump_fingerprint(self.baseline.layout())?;
        let logs_fingerprint = logs::logs_fingerprint(mods)?;

        let previous = MergeState::load(&MergeState::path(&self.master_root))?;
        let previous = match previous {
            Some(state)
                if state.game_fingerprint == game_fingerprint
                    && self.master_root.as_std_path().is_dir() =>
            {
                state
            }
            _ => {
                tracing::info!("No usable previous merge, rebuilding everything");
                return self.rebuild(mods, logs_fingerprint, game_fingerprint, start);
            }
        };
        if formats.contains(&Format::Packs) {
            tracing::info!("Packs changed, rebuilding everything");
            return self.rebuild(mods, logs_fingerprint, game_fingerprint, start);
        }
        if let Some(name) = output_inside_packs(&previous, formats) {
            tracing::info!("{} lives in a merged pack, rebuilding everything", name);
            return self.rebuild(mods, logs_fingerprint, game_fingerprint, start);
        }

        let mut selected: Vec<Format> = formats.iter().copied().collect();
        selected.push(Format::SizeTable);
        selected.sort();
        selected.dedup();
        tracing::info!("Merging formats {:?}", selected);

        let staging = self.staging_root();
        reset_dir(&staging)?;
        if let Err(e) = copy_tree(&self.master_root, &staging) {
            remove_dir_if_exists(&staging)?;
            return Err(e);
        }

        let mut state = previous;
        state.mods = MergeState::new(mods, logs_fingerprint, game_fingerprint).mods;
        state.logs_fingerprint = logs_fingerprint;
        self.finish(staging, mods, &selected, state, true, start)
    }

    fn rebuild(
        &self,
        mods: &[ModRecord],
        logs_fingerprint: u64,
        game_fingerprint: u64,
        start: Instant,
    ) -> Result<MergeResult> {
        tracing::info!("Rebuilding master layer from {} mods", mods.len());
        let staging = self.staging_root();
        reset_dir(&staging)?;
        let state = MergeState::new(mods, logs_fingerprint, game_fingerprint);
        self.finish(staging, mods, &Format::ALL, state, false, start)
    }

    /// Merge `formats` into `staging`, then swap it in.
    fn finish(
        &self,
        staging: Utf8PathBuf,
        mods: &[ModRecord],
        formats: &[Format],
        mut state: MergeState,
        incremental: bool,
        start: Instant,
    ) -> Result<MergeResult> {
        let merged = self
            .merge_formats(&staging, mods, formats, &mut state, incremental)
            .and_then(|report| {
                self.emit_progress(MergeProgress {
                    stage: MergeStage::Writing,
                    current_file: None,
                    current: 0,
                    total: 0,
                });
                state.save(&MergeState::path(&staging))?;
                self.swap_in(&staging)?;
                Ok(report)
            });
        let (files_written, failures) = match merged {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Merge aborted: {}", e);
                remove_dir_if_exists(&staging)?;
                return Err(e);
            }
        };

        let outcome = if failures.is_empty() {
            MergeOutcome::Complete
        } else {
            tracing::warn!("Merge finished with {} failures", failures.len());
            MergeOutcome::Partial { failures }
        };
        self.emit_progress(MergeProgress {
            stage: MergeStage::Complete,
            current_file: None,
            current: formats.len() as u32,
            total: formats.len() as u32,
        });

        let build_time = start.elapsed();
        tracing::info!(
            "Merge complete: {} files written in {:.2}s",
            files_written.len(),
            build_time.as_secs_f64()
        );
        Ok(MergeResult {
            master_root: self.master_root.clone(),
            outcome,
            formats_merged: formats.to_vec(),
            files_written,
            reused: false,
            build_time,
        })
    }

    fn merge_formats(
        &self,
        staging: &Utf8Path,
        mods: &[ModRecord],
        formats: &[Format],
        state: &mut MergeState,
        incremental: bool,
    ) -> Result<(Vec<String>, Vec<ItemFailure>)> {
        let writer = MasterWriter::new(staging.to_path_buf(), &self.baseline);
        let ctx = MergeContext {
            baseline: &self.baseline,
            writer: &writer,
        };

        let mut written = Vec::new();
        let mut failures = Vec::new();
        let total = formats.len() as u32;
        for (idx, format) in formats.iter().copied().enumerate() {
            self.emit_progress(MergeProgress {
                stage: MergeStage::Merging,
                current_file: Some(format.name().to_string()),
                current: idx as u32 + 1,
                total,
            });

            if incremental && format != Format::SizeTable {
                let previous = state.outputs_of(format);
                tracing::debug!("Reverting {} previous {} outputs", previous.len(), format);
                writer.restore(&previous)?;
            }

            let report = match merge_format(format, &ctx, mods) {
                Ok(report) => report,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("Merging {} failed: {}", format, e);
                    failures.push(ItemFailure::new(format.name(), &e));
                    FormatReport::default()
                }
            };
            tracing::info!("Merged {}: {} outputs", format, report.outputs.len());

            if format != Format::SizeTable {
                record_sizes(staging, format, &report.sizes)?;
            }
            written.extend(report.outputs.iter().cloned());
            failures.extend(report.failures);
            state.set_outputs(format, report.outputs);
        }
        Ok((written, failures))
    }

    fn staging_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}.staging", self.master_root))
    }

    /// Replace the master layer with `staging`.
    fn swap_in(&self, staging: &Utf8Path) -> Result<()> {
        let retired = Utf8PathBuf::from(format!("{}.old", self.master_root));
        remove_dir_if_exists(&retired)?;
        if self.master_root.as_std_path().exists() {
            std::fs::rename(self.master_root.as_std_path(), retired.as_std_path())?;
        }
        std::fs::rename(staging.as_std_path(), self.master_root.as_std_path())?;
        remove_dir_if_exists(&retired)?;
        Ok(())
    }

    fn emit_progress(&self, progress: MergeProgress) {
        if let Some(callback) = &self.progress_callback {
            callback(progress);
        }
    }
}

/// Diff one format and write its log. Returns `true` if a log was written.
fn diff_format(
    format: Format,
    ctx: &DiffContext<'_>,
    modified: &BTreeMap<String, ModifiedFile>,
    log_dir: &Utf8Path,
) -> Result<bool> {
    fn run<M: FormatMerger>(
        merger: &M,
        ctx: &DiffContext<'_>,
        modified: &BTreeMap<String, ModifiedFile>,
        log_dir: &Utf8Path,
    ) -> Result<bool> {
        let diff = merger.diff(ctx, modified)?;
        if M::is_empty(&diff) {
            return Ok(false);
        }
        logs::write_log(log_dir, merger.format(), &M::encode_log(&diff)?)?;
        Ok(true)
    }

    match format {
        Format::Packs => run(&PackMerger, ctx, modified, log_dir),
        Format::GameData => run(&KeyedMerger::new(TableKind::GameData), ctx, modified, log_dir),
        Format::SaveData => run(&KeyedMerger::new(TableKind::SaveData), ctx, modified, log_dir),
        Format::DeepMerge => run(&DeepMerger, ctx, modified, log_dir),
        Format::Maps => run(&MapMerger, ctx, modified, log_dir),
        Format::SizeTable => run(&SizeTableMerger, ctx, modified, log_dir),
    }
}

/// Read every mod's log for one format and merge them.
///
/// Formats without any log are skipped, except the size table which is
/// regenerated on every merge.
fn merge_format(format: Format, ctx: &MergeContext<'_>, mods: &[ModRecord]) -> Result<FormatReport> {
    fn run<M: FormatMerger>(
        merger: &M,
        ctx: &MergeContext<'_>,
        mods: &[ModRecord],
    ) -> Result<FormatReport> {
        let diffs = logs::read_all_logs(merger, mods)?;
        if diffs.is_empty() && merger.format() != Format::SizeTable {
            return Ok(FormatReport::default());
        }
        merger.merge(ctx, diffs)
    }

    match format {
        Format::Packs => run(&PackMerger, ctx, mods),
        Format::GameData => run(&KeyedMerger::new(TableKind::GameData), ctx, mods),
        Format::SaveData => run(&KeyedMerger::new(TableKind::SaveData), ctx, mods),
        Format::DeepMerge => run(&DeepMerger, ctx, mods),
        Format::Maps => run(&MapMerger, ctx, mods),
        Format::SizeTable => run(&SizeTableMerger, ctx, mods),
    }
}

/// A previous output of `formats` nested in a container the pack merger wrote.
///
/// Reverting such a file restores the game copy instead of the merged pack's
/// member, so these formats cannot be re-merged in place.
fn output_inside_packs(previous: &MergeState, formats: &BTreeSet<Format>) -> Option<String> {
    let packs: BTreeSet<String> = previous.outputs_of(Format::Packs).into_iter().collect();
    if packs.is_empty() {
        return None;
    }
    formats
        .iter()
        .filter(|f| **f != Format::SizeTable)
        .flat_map(|f| previous.outputs_of(*f))
        .find(|name| {
            name.contains(pw_core::NESTED_SEPARATOR) && packs.contains(pw_core::top_level(name))
        })
}

fn remove_dir_if_exists(dir: &Utf8Path) -> Result<()> {
    if dir.as_std_path().exists() {
        std::fs::remove_dir_all(dir.as_std_path())?;
    }
    Ok(())
}

fn reset_dir(dir: &Utf8Path) -> Result<()> {
    remove_dir_if_exists(dir)?;
    std::fs::create_dir_all(dir.as_std_path())?;
    Ok(())
}

/// Copy every file under `src` into `dst`, keeping relative paths and mtimes.
fn copy_tree(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    for entry in WalkDir::new(src.as_std_path()) {
        let entry = entry.map_err(std::io::Error::from)?;
        let Ok(rel) = entry.path().strip_prefix(src.as_std_path()) else {
            continue;
        };
        let target = dst.as_std_path().join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
            let modified = std::fs::metadata(entry.path())?.modified()?;
            std::fs::File::options()
                .write(true)
                .open(&target)?
                .set_modified(modified)?;
        }
    }
    Ok(())
}
