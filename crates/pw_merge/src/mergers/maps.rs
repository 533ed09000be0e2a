//! Map placement merging.
//!
//! A map unit (`Map/MainField/<section>/<section>_Static.smubin` or
//! `_Dynamic.smubin`) is a document whose `Objs` array holds placed objects,
//! each identified by its `HashId`. Objects link to each other through
//! `LinksToObj[].DestUnitHashId`.
//!
//! Deleting an object that a surviving object still links to would leave a
//! dangling reference, so such deletes are dropped both when diffing and
//! again when merging, against the rebuilt object list.

use crate::detector::ModifiedFile;
use crate::error::{Error, Result};
use crate::mergers::{
    record_size, DiffContext, Format, FormatMerger, FormatReport, MergeContext, ModDiff,
};
use crate::pool::run_batch;
use pw_core::AOC_PREFIX;
use pw_formats::compression::encode_for_name;
use pw_formats::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const OBJS: &str = "Objs";
const HASH_ID: &str = "HashId";
const LINKS: &str = "LinksToObj";
const LINK_TARGET: &str = "DestUnitHashId";

/// Changes to one map unit, by object id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapUnitDiff {
    #[serde(default)]
    pub add: BTreeMap<u32, Value>,
    #[serde(default, rename = "mod")]
    pub modify: BTreeMap<u32, Value>,
    #[serde(default)]
    pub del: BTreeSet<u32>,
}

impl MapUnitDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.modify.is_empty() && self.del.is_empty()
    }
}

/// Canonical map unit name to its changes.
pub type MapDiff = BTreeMap<String, MapUnitDiff>;

pub struct MapMerger;

/// Returns `true` for top-level main field map units.
pub fn is_map_unit(name: &str) -> bool {
    let name = name.strip_prefix(AOC_PREFIX).unwrap_or(name);
    if name.contains(pw_core::NESTED_SEPARATOR) || !name.starts_with("Map/MainField/") {
        return false;
    }
    name.ends_with("_Static.smubin") || name.ends_with("_Dynamic.smubin")
}

fn object_id(obj: &Value) -> Option<u32> {
    obj.get(HASH_ID).and_then(Value::as_u32)
}

fn link_targets(obj: &Value) -> impl Iterator<Item = u32> + '_ {
    obj.get(LINKS)
        .and_then(Value::as_array)
        .unwrap_or_default()
        .iter()
        .filter_map(|link| link.get(LINK_TARGET).and_then(Value::as_u32))
}

/// Objects of a unit by id.
fn read_objects(name: &str, doc: &Value) -> Result<BTreeMap<u32, Value>> {
    let objs = doc
        .get(OBJS)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::format_mismatch(name, "map unit has no Objs array"))?;
    let mut out = BTreeMap::new();
    for obj in objs {
        match object_id(obj) {
            Some(id) => {
                out.insert(id, obj.clone());
            }
            None => tracing::warn!("{}: skipping object without {}", name, HASH_ID),
        }
    }
    Ok(out)
}

pub fn diff_unit(name: &str, base: &Value, modded: &Value) -> Result<MapUnitDiff> {
    let base = read_objects(name, base)?;
    let modded = read_objects(name, modded)?;
    let linked: BTreeSet<u32> = modded.values().flat_map(link_targets).collect();

    let mut diff = MapUnitDiff::default();
    for (id, obj) in &modded {
        match base.get(id) {
            None => {
                diff.add.insert(*id, obj.clone());
            }
            Some(base_obj) if base_obj != obj => {
                diff.modify.insert(*id, obj.clone());
            }
            Some(_) => {}
        }
    }
    for id in base.keys() {
        if !modded.contains_key(id) && !linked.contains(id) {
            diff.del.insert(*id);
        }
    }
    Ok(diff)
}

/// Apply a consolidated unit diff to the baseline unit document.
pub fn apply_unit(name: &str, base: &Value, diff: &MapUnitDiff) -> Result<Value> {
    let mut objects = read_objects(name, base)?;
    for (id, obj) in diff.modify.iter().chain(&diff.add) {
        objects.insert(*id, obj.clone());
    }

    // Drop deletes that a surviving object links to, until nothing changes.
    let mut pending: BTreeSet<u32> = diff
        .del
        .iter()
        .copied()
        .filter(|id| objects.contains_key(id))
        .collect();
    loop {
        let linked: BTreeSet<u32> = objects
            .iter()
            .filter(|(id, _)| !pending.contains(id))
            .flat_map(|(_, obj)| link_targets(obj))
            .collect();
        let before = pending.len();
        pending.retain(|id| !linked.contains(id));
        if pending.len() == before {
            break;
        }
    }
    for id in &pending {
        objects.remove(id);
    }

    let mut doc = base.clone();
    let hash = doc
        .as_hash_mut()
        .ok_or_else(|| Error::format_mismatch(name, "map unit is not a hash"))?;
    hash.insert(OBJS.to_string(), Value::Array(objects.into_values().collect()));
    Ok(doc)
}

impl FormatMerger for MapMerger {
    type Diff = MapDiff;

    fn format(&self) -> Format {
        Format::Maps
    }

    fn diff(
        &self,
        ctx: &DiffContext<'_>,
        modified: &BTreeMap<String, ModifiedFile>,
    ) -> Result<MapDiff> {
        let units: Vec<&ModifiedFile> = modified
            .values()
            .filter(|f| is_map_unit(&f.canonical))
            .collect();

        let batch = run_batch(
            units,
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
                let base = Value::from_binary(&base)
                    .map_err(|e| Error::format_mismatch(&file.canonical, e))?;
                let modded = Value::from_binary(&ctx.modded_bytes(file)?)
                    .map_err(|e| Error::format_mismatch(&file.canonical, e))?;
                let diff = diff_unit(&file.canonical, &base, &modded)?;
                Ok((!diff.is_empty()).then(|| (file.canonical.clone(), diff)))
            },
        )?;
        Ok(batch.successes.into_iter().flatten().collect())
    }

    fn is_empty(diff: &MapDiff) -> bool {
        diff.values().all(MapUnitDiff::is_empty)
    }

    fn consolidate(&self, diffs: Vec<MapDiff>) -> MapDiff {
        let mut out = MapDiff::new();
        for diff in diffs {
            for (name, unit) in diff {
                let slot = out.entry(name).or_default();
                for (id, obj) in unit.add {
                    slot.del.remove(&id);
                    slot.modify.remove(&id);
                    slot.add.insert(id, obj);
                }
                for (id, obj) in unit.modify {
                    slot.del.remove(&id);
                    slot.add.remove(&id);
                    slot.modify.insert(id, obj);
                }
                for id in unit.del {
                    slot.add.remove(&id);
                    slot.modify.remove(&id);
                    slot.del.insert(id);
                }
            }
        }
        out
    }

    fn merge(&self, ctx: &MergeContext<'_>, mods: Vec<ModDiff<MapDiff>>) -> Result<FormatReport> {
        let mut report = FormatReport::default();
        if mods.is_empty() {
            return Ok(report);
        }
        let diff = self.consolidate(mods.into_iter().map(|m| m.diff).collect());
        tracing::info!("Merging {} map units", diff.len());

        let baseline = ctx.baseline;
        let batch = run_batch(
            diff.into_iter().collect::<Vec<_>>(),
            |(name, _)| name.clone(),
            |(name, unit)| {
                let base = baseline.file_bytes(&name)?;
                let base =
                    Value::from_binary(&base).map_err(|e| Error::format_mismatch(&name, e))?;
                let merged = apply_unit(&name, &base, &unit)?;
                let bytes = encode_for_name(&name, merged.to_binary()?)?;
                Ok((name, bytes))
            },
        )?;
        report.failures = batch.failures;

        for (name, bytes) in &batch.successes {
            record_size(&mut report, name, bytes, ctx.platform());
        }
        report.outputs = batch.successes.iter().map(|(n, _)| n.clone()).collect();
        ctx.writer.put_many(batch.successes)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mergers::ModFlags;
    use crate::test_support::Fixture;
    use crate::writer::MasterWriter;
    use pretty_assertions::assert_eq;

    const UNIT: &str = "Map/MainField/A-1/A-1_Static.smubin";

    fn obj(id: u32, name: &str, links: &[u32]) -> Value {
        let links: Vec<Value> = links
            .iter()
            .map(|l| Value::hash([(LINK_TARGET, Value::UInt(*l))]))
            .collect();
        Value::hash([
            (HASH_ID, Value::UInt(id)),
            ("UnitConfigName", Value::from(name)),
            (LINKS, Value::Array(links)),
        ])
    }

    fn unit(objs: Vec<Value>) -> Value {
        Value::hash([(OBJS, Value::Array(objs)), ("LocationPosX", Value::Float(1.0))])
    }

    fn ids(doc: &Value) -> Vec<u32> {
        doc.get(OBJS)
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .map(|o| object_id(o).unwrap())
            .collect()
    }

    #[test]
    fn test_map_unit_names() {
        assert!(is_map_unit(UNIT));
        assert!(is_map_unit("Aoc/0010/Map/MainField/A-1/A-1_Dynamic.smubin"));
        assert!(!is_map_unit("Map/CDungeon/Dungeon000/Dungeon000_Static.smubin"));
        assert!(!is_map_unit("Pack/Foo.pack//Map/MainField/A-1/A-1_Static.smubin"));
    }

    #[test]
    fn test_diff_add_mod_del_and_linked_kept() {
        let base = unit(vec![obj(1, "A", &[]), obj(2, "B", &[]), obj(3, "C", &[]), obj(4, "D", &[])]);
        // 2 modified, 3 removed, 4 removed but still linked from 5
        let modded = unit(vec![obj(1, "A", &[]), obj(2, "B2", &[]), obj(5, "E", &[4])]);
        let diff = diff_unit(UNIT, &base, &modded).unwrap();
        assert_eq!(diff.add.keys().copied().collect::<Vec<_>>(), vec![5]);
        assert_eq!(diff.modify.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(diff.del.iter().copied().collect::<Vec<_>>(), vec![3]);

        assert!(diff_unit(UNIT, &base, &base).unwrap().is_empty());
    }

    #[test]
    fn test_link_preserving_delete() {
        let base = unit(vec![obj(5, "X", &[]), obj(6, "Y", &[5]), obj(7, "Z", &[])]);
        let diff = MapUnitDiff {
            del: BTreeSet::from([5, 7]),
            ..Default::default()
        };
        let merged = apply_unit(UNIT, &base, &diff).unwrap();
        assert_eq!(ids(&merged), vec![5, 6]);
    }

    #[test]
    fn test_chained_links_resolve_to_fixed_point() {
        // 7 links to 6 which links to 5; deleting 6 and 7 frees 5 as well
        let base = unit(vec![obj(5, "X", &[]), obj(6, "Y", &[5]), obj(7, "Z", &[6])]);
        let diff = MapUnitDiff {
            del: BTreeSet::from([5, 6, 7]),
            ..Default::default()
        };
        let merged = apply_unit(UNIT, &base, &diff).unwrap();
        assert!(ids(&merged).is_empty());

        let keep = MapUnitDiff {
            del: BTreeSet::from([5, 6]),
            ..Default::default()
        };
        assert_eq!(ids(&apply_unit(UNIT, &base, &keep).unwrap()), vec![5, 6, 7]);
    }

    #[test]
    fn test_consolidate_readd_after_delete() {
        let a = MapDiff::from([(
            UNIT.to_string(),
            MapUnitDiff {
                del: BTreeSet::from([9]),
                ..Default::default()
            },
        )]);
        let b = MapDiff::from([(
            UNIT.to_string(),
            MapUnitDiff {
                modify: BTreeMap::from([(9, obj(9, "Back", &[]))]),
                ..Default::default()
            },
        )]);
        let merged = MapMerger.consolidate(vec![a, b]);
        assert!(merged[UNIT].del.is_empty());
        assert_eq!(merged[UNIT].modify[&9], obj(9, "Back", &[]));
    }

    #[test]
    fn test_merge_sorts_by_id_and_is_idempotent() {
        let fixture = Fixture::new();
        let base = unit(vec![obj(30, "C", &[]), obj(10, "A", &[])]);
        let bytes = pw_formats::compression::compress(&base.to_binary().unwrap()).unwrap();
        fixture.write_game_file(UNIT, &bytes);
        let baseline = fixture.baseline();
        let writer = MasterWriter::new(fixture.root.join("master"), &baseline);
        let ctx = MergeContext {
            baseline: &baseline,
            writer: &writer,
        };

        let diff = MapDiff::from([(
            UNIT.to_string(),
            MapUnitDiff {
                add: BTreeMap::from([(20, obj(20, "B", &[]))]),
                ..Default::default()
            },
        )]);
        let mods = vec![ModDiff {
            mod_id: "a".into(),
            priority: 100,
            flags: ModFlags::default(),
            mod_root: Default::default(),
            diff,
        }];
        let report = MapMerger.merge(&ctx, mods.clone()).unwrap();
        assert_eq!(report.outputs, vec![UNIT.to_string()]);
        assert_eq!(report.sizes.len(), 1);

        let first = writer.read(UNIT).unwrap();
        let merged = Value::from_binary(&first).unwrap();
        assert_eq!(ids(&merged), vec![10, 20, 30]);
        assert_eq!(merged.get("LocationPosX"), Some(&Value::Float(1.0)));

        MapMerger.merge(&ctx, mods).unwrap();
        assert_eq!(writer.read(UNIT).unwrap(), first);
    }

    #[test]
    fn test_unit_without_baseline_is_left_to_the_mod() {
        let fixture = Fixture::new();
        let compress = |doc: &Value| pw_formats::compression::compress(&doc.to_binary().unwrap()).unwrap();
        fixture.write_game_file(UNIT, &compress(&unit(vec![obj(1, "A", &[])])));
        let baseline = fixture.baseline();

        let new_unit = "Map/MainField/B-9/B-9_Static.smubin";
        let mod_dir = fixture.mod_dir("a");
        Fixture::write_mod_file(&mod_dir, UNIT, &compress(&unit(vec![obj(1, "A2", &[])])));
        Fixture::write_mod_file(&mod_dir, new_unit, &compress(&unit(vec![obj(5, "N", &[])])));

        let scan = crate::detector::Detector::new(&baseline).scan_tree(&mod_dir).unwrap();
        assert!(scan.modified.contains_key(new_unit));
        let ctx = DiffContext {
            baseline: &baseline,
            mod_root: &mod_dir,
        };
        let diff = MapMerger.diff(&ctx, &scan.modified).unwrap();
        assert_eq!(diff.keys().collect::<Vec<_>>(), vec![UNIT]);
    }
}
