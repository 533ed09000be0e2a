//! Parameter-tree merging.
//!
//! A parameter-tree diff holds, per canonical file, the subset of the tree
//! that differs from the baseline: new lists and objects whole, changed
//! parameters only. Merging overlays the consolidated diff onto the baseline
//! tree.
//!
//! Some lists are unordered collections whose children are numbered
//! positionally (`ASDefine_0`, `ASDefine_1`, ...). They are compared by
//! content: the diff holds the children the baseline lacks, and merging
//! appends them after the existing children with fresh numbers.
//!
//! A patch that cannot be applied (a parameter changes type) fails only that
//! file. The attempted diff is written to `logs/failures/` in the master layer
//! and the file keeps its previous bytes.

use crate::detector::ModifiedFile;
use crate::error::{Error, Result};
use crate::mergers::{
    record_size, DiffContext, Format, FormatMerger, FormatReport, MergeContext, ModDiff,
};
use crate::pool::{run_batch, ItemFailure};
use pw_core::leaf_name;
use pw_formats::compression::{encode_for_name, uncompressed_extension};
use pw_formats::{ParameterIo, ParameterList, ParameterObject};
use serde::Serialize;
use std::collections::BTreeMap;

/// Extensions of parameter-tree files.
pub const PARAMETER_EXTENSIONS: &[&str] = &[
    "bxml", "bgparamlist", "bdrop", "bshop", "brecipe", "bphysics", "bas", "baslist", "baiprog",
    "bmodellist", "baglblm", "baglccr", "baglclwd", "baglcube", "bagldof", "baglenv", "baglenvset",
    "baglfila", "bagllmap", "bagllref", "baglmf", "baglshpp", "baglsky", "bawareness", "bbonectrl",
    "bchemical", "bchmres", "bdgnenv", "bdmgparam", "bgapkginfo", "bgapkglist", "blifecondition",
    "blod", "bumii", "bxmlgenvb",
];

/// Lists whose children form an unordered set.
const SET_LISTS: &[(&str, &str)] = &[
    ("ASDefines", "ASDefine_"),
    ("CFDefines", "CFDefine_"),
    ("AddReses", "AddRes_"),
];

/// Canonical file name to the part of its tree that changed.
pub type DeepDiff = BTreeMap<String, ParameterList>;

pub struct DeepMerger;

pub fn is_parameter_file(name: &str) -> bool {
    PARAMETER_EXTENSIONS.contains(&uncompressed_extension(leaf_name(name)).as_str())
}

fn set_prefix(list_name: &str) -> Option<&'static str> {
    SET_LISTS
        .iter()
        .find(|(name, _)| *name == list_name)
        .map(|(_, prefix)| *prefix)
}

fn diff_object(base: &ParameterObject, modded: &ParameterObject) -> ParameterObject {
    let params = modded
        .params
        .iter()
        .filter(|(name, param)| base.params.get(*name) != Some(param))
        .map(|(name, param)| (name.clone(), param.clone()))
        .collect();
    ParameterObject { params }
}

/// Children of `modded` the baseline set lacks, keyed as in `modded`.
fn diff_set(base: &ParameterList, modded: &ParameterList) -> ParameterList {
    let mut out = ParameterList::new();
    for (name, object) in &modded.objects {
        if !base.objects.values().any(|o| o == object) {
            out.objects.insert(name.clone(), object.clone());
        }
    }
    for (name, list) in &modded.lists {
        if !base.lists.values().any(|l| l == list) {
            out.lists.insert(name.clone(), list.clone());
        }
    }
    out
}

/// The part of `modded` that differs from `base`.
pub fn diff_lists(base: &ParameterList, modded: &ParameterList) -> ParameterList {
    let mut out = ParameterList::new();

    for (name, object) in &modded.objects {
        match base.objects.get(name) {
            None => {
                out.objects.insert(name.clone(), object.clone());
            }
            Some(base_object) => {
                let changed = diff_object(base_object, object);
                if !changed.is_empty() {
                    out.objects.insert(name.clone(), changed);
                }
            }
        }
    }

    for (name, list) in &modded.lists {
        let changed = match base.lists.get(name) {
            None => list.clone(),
            Some(base_list) if set_prefix(name).is_some() => diff_set(base_list, list),
            Some(base_list) => diff_lists(base_list, list),
        };
        if !changed.is_empty() {
            out.lists.insert(name.clone(), changed);
        }
    }

    out
}

/// Append set children that are not already present, numbering them after
/// the existing ones.
fn append_set(target: &mut ParameterList, diff: &ParameterList, prefix: &str) {
    let mut next = target.objects.len() + target.lists.len();
    for object in diff.objects.values() {
        if target.objects.values().any(|o| o == object) {
            continue;
        }
        while target.objects.contains_key(&format!("{prefix}{next}")) {
            next += 1;
        }
        target.objects.insert(format!("{prefix}{next}"), object.clone());
        next += 1;
    }
    for list in diff.lists.values() {
        if target.lists.values().any(|l| l == list) {
            continue;
        }
        while target.lists.contains_key(&format!("{prefix}{next}")) {
            next += 1;
        }
        target.lists.insert(format!("{prefix}{next}"), list.clone());
        next += 1;
    }
}

/// Overlay `diff` onto `target`. A parameter changing type is an error.
fn overlay(target: &mut ParameterList, diff: &ParameterList, path: &str) -> Result<()> {
    for (name, object) in &diff.objects {
        let slot = target.objects.entry(name.clone()).or_default();
        for (param_name, param) in &object.params {
            if let Some(existing) = slot.params.get(param_name) {
                if !existing.same_type(param) {
                    return Err(Error::format_mismatch(
                        path,
                        format!(
                            "{name}.{param_name} is {} but the patch holds {}",
                            existing.type_name(),
                            param.type_name()
                        ),
                    ));
                }
            }
            slot.params.insert(param_name.clone(), param.clone());
        }
    }

    for (name, list) in &diff.lists {
        let slot = target.lists.entry(name.clone()).or_default();
        match set_prefix(name) {
            Some(prefix) => append_set(slot, list, prefix),
            None => overlay(slot, list, &format!("{path}/{name}"))?,
        }
    }
    Ok(())
}

/// Overlay one diff onto another. The later diff wins outright.
fn layer(target: &mut ParameterList, diff: &ParameterList) {
    for (name, object) in &diff.objects {
        let slot = target.objects.entry(name.clone()).or_default();
        for (param_name, param) in &object.params {
            slot.params.insert(param_name.clone(), param.clone());
        }
    }

    for (name, list) in &diff.lists {
        let slot = target.lists.entry(name.clone()).or_default();
        match set_prefix(name) {
            Some(prefix) => append_set(slot, list, prefix),
            None => layer(slot, list),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureReport<'a> {
    file: &'a str,
    error: String,
    diff: &'a ParameterList,
}

fn write_failure_report(ctx: &MergeContext<'_>, name: &str, error: &Error, diff: &ParameterList) -> Result<()> {
    let dir = ctx.master_root().join("logs").join("failures");
    std::fs::create_dir_all(dir.as_std_path())?;
    let file_name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    let report = FailureReport {
        file: name,
        error: error.to_string(),
        diff,
    };
    let path = dir.join(format!("{file_name}.json"));
    std::fs::write(path.as_std_path(), serde_json::to_vec_pretty(&report)?)?;
    tracing::warn!("Wrote failed patch for {} to {}", name, path);
    Ok(())
}

impl FormatMerger for DeepMerger {
    type Diff = DeepDiff;

    fn format(&self) -> Format {
        Format::DeepMerge
    }

    fn diff(
        &self,
        ctx: &DiffContext<'_>,
        modified: &BTreeMap<String, ModifiedFile>,
    ) -> Result<DeepDiff> {
        let candidates: Vec<&ModifiedFile> = modified
            .values()
            .filter(|f| is_parameter_file(&f.canonical))
            .collect();

        let batch = run_batch(
            candidates,
            |f| f.canonical.clone(),
            |file| {
                let base = match ctx.baseline.file_bytes(&file.canonical) {
                    Ok(bytes) => bytes,
                    Err(Error::NotFound(_)) => {
                        tracing::debug!(
                            "{} has no baseline copy, served as shipped by the mod",
                            file.canonical
                        );
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                };
                let base = ParameterIo::from_binary(&base)
                    .map_err(|e| Error::format_mismatch(&file.canonical, e))?;
                let modded = ParameterIo::from_binary(&ctx.modded_bytes(file)?)
                    .map_err(|e| Error::format_mismatch(&file.canonical, e))?;
                let changed = diff_lists(&base.root, &modded.root);
                Ok((!changed.is_empty()).then(|| (file.canonical.clone(), changed)))
            },
        )?;

        Ok(batch.successes.into_iter().flatten().collect())
    }

    fn is_empty(diff: &DeepDiff) -> bool {
        diff.is_empty()
    }

    fn consolidate(&self, diffs: Vec<DeepDiff>) -> DeepDiff {
        let mut out = DeepDiff::new();
        for diff in diffs {
            for (name, tree) in diff {
                layer(out.entry(name).or_default(), &tree);
            }
        }
        out
    }

    fn merge(&self, ctx: &MergeContext<'_>, mods: Vec<ModDiff<DeepDiff>>) -> Result<FormatReport> {
        let mut report = FormatReport::default();
        if mods.is_empty() {
            return Ok(report);
        }
        let diff = self.consolidate(mods.into_iter().map(|m| m.diff).collect());
        tracing::info!("Merging {} parameter files", diff.len());

        let baseline = ctx.baseline;
        let items: Vec<(String, ParameterList)> = diff.into_iter().collect();
        let outcomes = run_batch(
            items,
            |(name, _)| name.clone(),
            |(name, tree)| {
                let base = baseline.file_bytes(&name)?;
                let mut doc = ParameterIo::from_binary(&base)
                    .map_err(|e| Error::format_mismatch(&name, e))?;
                match overlay(&mut doc.root, &tree, &name) {
                    Ok(()) => {
                        let bytes = encode_for_name(leaf_name(&name), doc.to_binary()?)?;
                        Ok((name, Ok(bytes)))
                    }
                    Err(e) => Ok((name, Err((e, tree)))),
                }
            },
        )?;
        report.failures = outcomes.failures;

        let mut outputs = Vec::new();
        for (name, outcome) in outcomes.successes {
            match outcome {
                Ok(bytes) => {
                    record_size(&mut report, &name, &bytes, ctx.platform());
                    outputs.push((name, bytes));
                }
                Err((error, tree)) => {
                    write_failure_report(ctx, &name, &error, &tree)?;
                    report.failures.push(ItemFailure::new(name, &error));
                }
            }
        }

        report.outputs = outputs.iter().map(|(n, _)| n.clone()).collect();
        ctx.writer.put_many(outputs)?;
        Ok(report)
    }

    fn encode_log(diff: &DeepDiff) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(diff)?)
    }

    fn decode_log(data: &[u8]) -> Result<DeepDiff> {
        Ok(rmp_serde::from_slice(data)?)
    }
}
