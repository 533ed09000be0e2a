//! Container archive merging.
//!
//! A mod's pack diff lists every top-level container it ships that differs
//! from the baseline, together with the canonical names of the members (at
//! any depth) that differ. Members a mod ships unchanged are not listed, so
//! they never override another mod's change.
//!
//! # Algorithm
//!
//! For each container, starting from the baseline copy:
//!
//! 1. Collect the members touched by any mod.
//! 2. A member touched by a single mod takes that mod's bytes.
//! 3. A container member touched by several mods is merged recursively with
//!    the same rules, innermost first, and re-embedded in its parent.
//! 4. A plain member touched by several mods takes the highest-priority bytes.
//!
//! Members only the baseline holds are kept; absence from a mod is never a
//! delete. The rebuilt container is written to the master layer, which
//! leaves it out if it ends up identical to the baseline.

use crate::detector::ModifiedFile;
use crate::error::{Error, Result};
use crate::mergers::{DiffContext, Format, FormatMerger, FormatReport, MergeContext, ModDiff};
use crate::pool::run_batch;
use camino::Utf8PathBuf;
use pw_core::join_nested;
use pw_formats::compression::encode_for_name;
use pw_formats::{is_archive_name, Archive};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One mod's copy of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackEntry {
    /// Path of the container file, relative to the mod root.
    pub path: Utf8PathBuf,
    /// Canonical names of the modified members below it.
    pub members: BTreeSet<String>,
}

/// Top-level container name to the copies that modify it, lowest priority first.
pub type PackDiff = BTreeMap<String, Vec<PackEntry>>;

pub struct PackMerger;

type Layer<'a> = (Archive, &'a BTreeSet<String>);

/// Merge one container level. `layers` are in ascending priority.
fn merge_level(name: &str, base: Option<&Archive>, layers: &[Layer<'_>]) -> Result<Archive> {
    let mut out = base.cloned().unwrap_or_default();

    let mut touched: BTreeSet<&str> = BTreeSet::new();
    for (archive, members) in layers {
        for member in archive.names() {
            if members.contains(&join_nested(name, member)) {
                touched.insert(member);
            }
        }
    }

    for member in touched {
        let child = join_nested(name, member);
        let touching: Vec<&Layer<'_>> = layers
            .iter()
            .filter(|(archive, members)| archive.contains(member) && members.contains(&child))
            .collect();

        if touching.len() > 1 && is_archive_name(member) {
            let mut sub_layers: Vec<Layer<'_>> = Vec::with_capacity(touching.len());
            for (archive, members) in &touching {
                let bytes = archive.get(member).unwrap_or_default();
                match Archive::read(bytes) {
                    Ok(sub) => sub_layers.push((sub, *members)),
                    Err(e) => {
                        tracing::warn!("Cannot open {} for merging: {}", child, e);
                        break;
                    }
                }
            }

            if sub_layers.len() == touching.len() {
                let base_child = base
                    .and_then(|b| b.get(member))
                    .and_then(|bytes| Archive::read(bytes).ok());
                let merged = merge_level(&child, base_child.as_ref(), &sub_layers)?;
                out.insert(member, encode_for_name(member, merged.to_bytes()?)?);
                continue;
            }
        }

        if let Some((archive, _)) = touching.last() {
            if let Some(bytes) = archive.get(member) {
                out.insert(member, bytes.to_vec());
            }
        }
    }

    Ok(out)
}

impl FormatMerger for PackMerger {
    type Diff = PackDiff;

    fn format(&self) -> Format {
        Format::Packs
    }

    fn diff(
        &self,
        ctx: &DiffContext<'_>,
        modified: &BTreeMap<String, ModifiedFile>,
    ) -> Result<PackDiff> {
        let mut diff = PackDiff::new();
        for (name, file) in modified {
            if file.nested || !is_archive_name(name) {
                continue;
            }
            let prefix = join_nested(name, "");
            let members: BTreeSet<String> = modified
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.clone())
                .collect();
            let path = file
                .source
                .strip_prefix(ctx.mod_root)
                .map_err(|_| {
                    Error::Other(format!("{} is outside mod root {}", file.source, ctx.mod_root))
                })?
                .to_path_buf();

            diff.entry(name.clone())
                .or_default()
                .push(PackEntry { path, members });
        }
        Ok(diff)
    }

    fn is_empty(diff: &PackDiff) -> bool {
        diff.is_empty()
    }

    fn consolidate(&self, diffs: Vec<PackDiff>) -> PackDiff {
        let mut out = PackDiff::new();
        for diff in diffs {
            for (name, entries) in diff {
                out.entry(name).or_default().extend(entries);
            }
        }
        out
    }

    fn merge(&self, ctx: &MergeContext<'_>, mods: Vec<ModDiff<PackDiff>>) -> Result<FormatReport> {
        let mut report = FormatReport::default();

        let mut packs: BTreeMap<String, Vec<(Utf8PathBuf, BTreeSet<String>)>> = BTreeMap::new();
        for m in mods {
            for (name, entries) in m.diff {
                let layers = packs.entry(name).or_default();
                for entry in entries {
                    layers.push((m.mod_root.join(&entry.path), entry.members));
                }
            }
        }
        if packs.is_empty() {
            return Ok(report);
        }
        tracing::info!("Merging {} containers", packs.len());

        let baseline = ctx.baseline;
        let batch = run_batch(
            packs.into_iter().collect(),
            |(name, _)| name.clone(),
            |(name, sources)| {
                let mut layers = Vec::with_capacity(sources.len());
                for (path, members) in &sources {
                    let data = std::fs::read(path.as_std_path())?;
                    let archive =
                        Archive::read(&data).map_err(|e| Error::corrupt_archive(path.as_str(), e))?;
                    layers.push((archive, members));
                }

                let base = match baseline.archive(&name) {
                    Ok(archive) => Some(archive),
                    Err(Error::NotFound(_)) => None,
                    Err(Error::CorruptArchive { reason, .. }) => {
                        tracing::warn!("Baseline {} is corrupt ({}), merging without it", name, reason);
                        None
                    }
                    Err(e) => return Err(e),
                };

                let merged = merge_level(&name, base.as_deref(), &layers)?;
                let bytes = encode_for_name(&name, merged.to_bytes()?)?;
                Ok((name, bytes))
            },
        )?;

        for (name, bytes) in batch.successes {
            tracing::debug!("Writing merged container {}", name);
            ctx.writer.put(&name, bytes)?;
            report.outputs.push(name);
        }
        report.failures = batch.failures;
        Ok(report)
    }
}
