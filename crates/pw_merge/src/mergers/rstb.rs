//! Resource size table maintenance.
//!
//! The size table lives at [`SIZE_TABLE`] and maps resource names to the
//! memory the game reserves for them. Every mod keeps a CSV log of the sizes
//! its files need, one `name,size,origin` row per entry, where `origin` is
//! the canonical file the size was computed from (or `table` when the mod
//! shipped its own size table).
//!
//! # Algorithm
//!
//! The master table is always regenerated from scratch:
//!
//! 1. Start from the baseline table
//! 2. Apply each mod's entries in ascending priority:
//!    - size `0` (unpredictable) removes the entry, unless the mod is marked `leave`
//!    - a size below the current entry is ignored, unless the mod is marked `shrink`
//! 3. Replay the master size log, the sizes of files the other mergers wrote.
//!    Each row follows the same rules, using the flags of the mods that log
//!    a size for that resource (grow-only when none does)
//! 4. Write the table into the master layer

use crate::baseline::Baseline;
use crate::detector::ModifiedFile;
use crate::error::{Error, Result};
use crate::logs::LOGS_DIR;
use crate::mergers::sizecalc::{calculate_size, is_exempt};
use crate::mergers::{
    DiffContext, Format, FormatMerger, FormatReport, MergeContext, ModDiff, ModFlags,
};
use crate::pool::run_batch;
use camino::{Utf8Path, Utf8PathBuf};
use pw_core::{resource_name, AOC_PREFIX};
use pw_formats::compression::encode_for_name;
use pw_formats::SizeTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SIZE_TABLE: &str = "System/Resource/ResourceSizeTable.product.srsizetable";
const TABLE_ORIGIN: &str = "table";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeEntry {
    pub size: u32,
    pub origin: String,
}

/// Resource name to the size a mod needs for it.
pub type SizeDiff = BTreeMap<String, SizeEntry>;

/// One row of a size log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeRow {
    pub name: String,
    pub size: u32,
    pub origin: String,
}

pub struct SizeTableMerger;

pub fn is_size_table(name: &str) -> bool {
    name.strip_prefix(AOC_PREFIX).unwrap_or(name) == SIZE_TABLE
}

fn baseline_table(baseline: &Baseline) -> Result<Option<SizeTable>> {
    match baseline.file_bytes(SIZE_TABLE) {
        Ok(bytes) => Ok(Some(
            SizeTable::read(&bytes).map_err(|e| Error::format_mismatch(SIZE_TABLE, e))?,
        )),
        Err(Error::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Apply one mod's entry, honoring its flags. Returns `true` if the table changed.
pub fn apply_entry(table: &mut SizeTable, name: &str, size: u32, flags: ModFlags) -> bool {
    if size == 0 {
        if flags.leave {
            return false;
        }
        return table.remove(name).is_some();
    }
    match table.get(name) {
        Some(current) if current == size => false,
        Some(current) if size < current && !flags.shrink => {
            tracing::debug!("Keeping {} at {} (requested {})", name, current, size);
            false
        }
        _ => {
            table.set(name, size);
            true
        }
    }
}

pub fn write_rows(rows: &[SizeRow]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for row in rows {
        let size = row.size.to_string();
        writer.write_record([row.name.as_str(), size.as_str(), row.origin.as_str()])?;
    }
    writer.into_inner().map_err(|e| Error::Io(e.into_error()))
}

/// Parse a size log. The origin column is optional.
pub fn read_rows(data: &[u8]) -> Result<Vec<SizeRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let (Some(name), Some(size)) = (record.get(0), record.get(1)) else {
            tracing::warn!("Skipping short size log row: {:?}", record);
            continue;
        };
        let size = size
            .trim()
            .parse::<u32>()
            .map_err(|e| Error::Consistency(format!("bad size '{}' for {}: {}", size, name, e)))?;
        rows.push(SizeRow {
            name: name.to_string(),
            size,
            origin: record.get(2).unwrap_or_default().to_string(),
        });
    }
    Ok(rows)
}

pub fn master_log_path(master_root: &Utf8Path) -> Utf8PathBuf {
    master_root.join(LOGS_DIR).join(Format::SizeTable.log_file())
}

/// Rows of the master size log, or none if it does not exist yet.
pub fn read_master_log(master_root: &Utf8Path) -> Result<Vec<SizeRow>> {
    let path = master_log_path(master_root);
    if !path.as_std_path().is_file() {
        return Ok(Vec::new());
    }
    read_rows(&std::fs::read(path.as_std_path())?)
}

/// Replace the master size log rows of `format` with `sizes`.
///
/// `sizes` holds `(canonical name, size)` pairs as the mergers report them.
pub fn record_sizes(master_root: &Utf8Path, format: Format, sizes: &[(String, u32)]) -> Result<()> {
    let mut rows = read_master_log(master_root)?;
    rows.retain(|row| row.origin != format.name());
    rows.extend(sizes.iter().map(|(canonical, size)| SizeRow {
        name: resource_name(canonical),
        size: *size,
        origin: format.name().to_string(),
    }));
    rows.sort_by(|a, b| (&a.name, &a.origin).cmp(&(&b.name, &b.origin)));

    let path = master_log_path(master_root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent.as_std_path())?;
    }
    tracing::debug!("Recording {} {} sizes in {}", sizes.len(), format, path);
    std::fs::write(path.as_std_path(), write_rows(&rows)?)?;
    Ok(())
}

impl FormatMerger for SizeTableMerger {
    type Diff = SizeDiff;

    fn format(&self) -> Format {
        Format::SizeTable
    }

    fn diff(
        &self,
        ctx: &DiffContext<'_>,
        modified: &BTreeMap<String, ModifiedFile>,
    ) -> Result<SizeDiff> {
        let base = baseline_table(ctx.baseline)?;
        let base_size = |name: &str| base.as_ref().and_then(|t| t.get(name));

        let candidates: Vec<&ModifiedFile> = modified
            .values()
            .filter(|f| !is_size_table(&f.canonical) && !is_exempt(&f.canonical))
            .collect();
        let platform = ctx.platform();
        let batch = run_batch(
            candidates,
            |f| f.canonical.clone(),
            |file| {
                let data = ctx.modded_bytes(file)?;
                Ok((file.canonical.clone(), calculate_size(&file.canonical, &data, platform)))
            },
        )?;

        let mut diff = SizeDiff::new();
        for (canonical, size) in batch.successes {
            let name = resource_name(&canonical);
            if base_size(&name) == Some(size) {
                continue;
            }
            diff.insert(
                name,
                SizeEntry {
                    size,
                    origin: canonical,
                },
            );
        }

        if let Some(file) = modified.values().find(|f| is_size_table(&f.canonical)) {
            let shipped = SizeTable::read(&ctx.modded_bytes(file)?)
                .map_err(|e| Error::format_mismatch(&file.canonical, e))?;
            for (name, size) in shipped.iter() {
                if diff.contains_key(name) || base_size(name) == Some(size) {
                    continue;
                }
                diff.insert(
                    name.to_string(),
                    SizeEntry {
                        size,
                        origin: TABLE_ORIGIN.to_string(),
                    },
                );
            }
        }
        Ok(diff)
    }

    fn is_empty(diff: &SizeDiff) -> bool {
        diff.is_empty()
    }

    fn consolidate(&self, diffs: Vec<SizeDiff>) -> SizeDiff {
        diffs.into_iter().flatten().collect()
    }

    fn merge(&self, ctx: &MergeContext<'_>, mods: Vec<ModDiff<SizeDiff>>) -> Result<FormatReport> {
        let mut report = FormatReport::default();
        let master_rows = read_master_log(ctx.master_root())?;
        let Some(mut table) = baseline_table(ctx.baseline)? else {
            if !mods.is_empty() || !master_rows.is_empty() {
                tracing::warn!("Game dump has no {}, sizes left unapplied", SIZE_TABLE);
            }
            return Ok(report);
        };

        tracing::info!(
            "Generating size table from {} mods and {} master entries",
            mods.len(),
            master_rows.len()
        );
        let mut changed = 0usize;
        let mut touched: BTreeMap<&str, ModFlags> = BTreeMap::new();
        for m in &mods {
            for (name, entry) in &m.diff {
                let flags = touched.entry(name.as_str()).or_default();
                flags.leave |= m.flags.leave;
                flags.shrink |= m.flags.shrink;
                if apply_entry(&mut table, name, entry.size, m.flags) {
                    changed += 1;
                }
            }
        }
        for row in &master_rows {
            let flags = touched.get(row.name.as_str()).copied().unwrap_or_default();
            if apply_entry(&mut table, &row.name, row.size, flags) {
                changed += 1;
            }
        }
        tracing::debug!("{} size table updates", changed);

        let bytes = encode_for_name(SIZE_TABLE, table.to_bytes()?)?;
        ctx.writer.put(SIZE_TABLE, bytes)?;
        report.outputs.push(SIZE_TABLE.to_string());
        Ok(report)
    }

    fn encode_log(diff: &SizeDiff) -> Result<Vec<u8>> {
        let rows: Vec<SizeRow> = diff
            .iter()
            .map(|(name, entry)| SizeRow {
                name: name.clone(),
                size: entry.size,
                origin: entry.origin.clone(),
            })
            .collect();
        write_rows(&rows)
    }

    fn decode_log(data: &[u8]) -> Result<SizeDiff> {
        Ok(read_rows(data)?
            .into_iter()
            .map(|row| {
                (
                    row.name,
                    SizeEntry {
                        size: row.size,
                        origin: row.origin,
                    },
                )
            })
            .collect())
    }
}
