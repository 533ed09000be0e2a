//! Keyed-hash-table merging for game-data flags and save-data entries.
//!
//! Both tables live in `Pack/Bootup.pack` as archives of record pages. Each
//! record is a hash keyed by its `DataName`. Records are grouped by type:
//!
//! - game data: one page family per flag type, `/<type>_<n>.bgdata`, each page
//!   a document `{<type>: [record, ...]}` holding at most 4096 records
//! - save data: `/saveformat_<n>.bgsvdata`, each page a document
//!   `{file_list: [header, [record, ...]], save_info: [...]}` holding at most
//!   8192 records. Only pages whose header names `game_data.sav` are merged;
//!   other pages are carried over unchanged.
//!
//! # Consolidation
//!
//! Unlike every other format, mods are visited from the highest priority
//! down and the first operation seen for a key wins. A delete therefore only
//! survives if no higher-priority mod adds the key back.

use crate::detector::ModifiedFile;
use crate::error::{Error, Result};
use crate::mergers::{
    record_size, DiffContext, Format, FormatMerger, FormatReport, MergeContext, ModDiff,
};
use pw_formats::compression::encode_for_name;
use pw_formats::{Archive, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub const GAMEDATA: &str = "Pack/Bootup.pack//GameData/gamedata.ssarc";
pub const SAVEDATA: &str = "Pack/Bootup.pack//GameData/savedataformat.ssarc";

/// Save-data pages with this header file name hold the merged records.
const SAVE_FILE: &str = "game_data.sav";
const KEY_FIELD: &str = "DataName";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    GameData,
    SaveData,
}

impl TableKind {
    pub fn archive_name(&self) -> &'static str {
        match self {
            TableKind::GameData => GAMEDATA,
            TableKind::SaveData => SAVEDATA,
        }
    }

    pub fn page_capacity(&self) -> usize {
        match self {
            TableKind::GameData => 4096,
            TableKind::SaveData => 8192,
        }
    }

    fn format(&self) -> Format {
        match self {
            TableKind::GameData => Format::GameData,
            TableKind::SaveData => Format::SaveData,
        }
    }
}

/// Changes to the records of one type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDiff {
    /// Records to add or replace, by key.
    #[serde(default)]
    pub add: BTreeMap<String, Value>,
    /// Keys to remove.
    #[serde(default)]
    pub del: BTreeSet<String>,
}

impl TypeDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.del.is_empty()
    }
}

/// Record type to its changes.
pub type KeyedDiff = BTreeMap<String, TypeDiff>;

/// Records of a table, by type, in page order.
#[derive(Debug, Clone, Default)]
struct Table {
    types: BTreeMap<String, Vec<Value>>,
    /// First merged save-data page, reused as the template for rebuilt pages.
    template: Option<Value>,
    /// Save-data pages that are not merged.
    passthrough: Vec<Value>,
}

pub struct KeyedMerger {
    kind: TableKind,
    page_capacity: usize,
}

impl KeyedMerger {
    pub fn new(kind: TableKind) -> Self {
        Self {
            kind,
            page_capacity: kind.page_capacity(),
        }
    }

    /// Override the page capacity.
    pub fn with_page_capacity(mut self, capacity: usize) -> Self {
        self.page_capacity = capacity.max(1);
        self
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    fn read_table(&self, data: &[u8]) -> Result<Table> {
        let name = self.kind.archive_name();
        let archive = Archive::read(data).map_err(|e| Error::corrupt_archive(name, e))?;

        let mut pages: Vec<((String, usize), Value)> = Vec::new();
        for (member, bytes) in archive.iter() {
            let Some(order) = page_order(member) else {
                tracing::warn!("Skipping unexpected member {} in {}", member, name);
                continue;
            };
            let doc = Value::from_binary(bytes)
                .map_err(|e| Error::format_mismatch(format!("{name}//{member}"), e))?;
            pages.push((order, doc));
        }
        pages.sort_by(|a, b| a.0.cmp(&b.0));

        let mut table = Table::default();
        for ((_, _), doc) in pages {
            match self.kind {
                TableKind::GameData => {
                    let hash = doc
                        .as_hash()
                        .ok_or_else(|| Error::format_mismatch(name, "page is not a hash"))?;
                    for (ty, records) in hash {
                        let records = records.as_array().ok_or_else(|| {
                            Error::format_mismatch(name, format!("{ty} is not an array"))
                        })?;
                        table
                            .types
                            .entry(ty.clone())
                            .or_default()
                            .extend(records.iter().cloned());
                    }
                }
                TableKind::SaveData => {
                    let (file_name, records) = save_page_parts(&doc)
                        .ok_or_else(|| Error::format_mismatch(name, "malformed save page"))?;
                    if file_name != SAVE_FILE {
                        table.passthrough.push(doc);
                        continue;
                    }
                    table
                        .types
                        .entry(SAVE_FILE.to_string())
                        .or_default()
                        .extend(records.iter().cloned());
                    if table.template.is_none() {
                        table.template = Some(doc);
                    }
                }
            }
        }
        Ok(table)
    }

    fn write_table(&self, table: Table) -> Result<Archive> {
        let mut archive = Archive::new();
        match self.kind {
            TableKind::GameData => {
                for (ty, records) in &table.types {
                    let mut chunks: Vec<&[Value]> = records.chunks(self.page_capacity).collect();
                    if chunks.is_empty() {
                        chunks.push(&[]);
                    }
                    for (n, chunk) in chunks.into_iter().enumerate() {
                        let page = Value::hash([(ty.as_str(), Value::Array(chunk.to_vec()))]);
                        archive.insert(format!("/{ty}_{n}.bgdata"), page.to_binary()?);
                    }
                }
            }
            TableKind::SaveData => {
                let template = table.template.ok_or_else(|| {
                    Error::Consistency(format!("{} has no {} page", SAVEDATA, SAVE_FILE))
                })?;
                let records = table.types.get(SAVE_FILE).cloned().unwrap_or_default();
                let mut n = 0;
                for chunk in records.chunks(self.page_capacity) {
                    let page = with_save_records(&template, chunk.to_vec())?;
                    archive.insert(format!("/saveformat_{n}.bgsvdata"), page.to_binary()?);
                    n += 1;
                }
                if n == 0 {
                    let page = with_save_records(&template, Vec::new())?;
                    archive.insert(format!("/saveformat_{n}.bgsvdata"), page.to_binary()?);
                    n += 1;
                }
                for page in table.passthrough {
                    archive.insert(format!("/saveformat_{n}.bgsvdata"), page.to_binary()?);
                    n += 1;
                }
            }
        }
        Ok(archive)
    }

    fn baseline_table(&self, baseline: &crate::baseline::Baseline) -> Result<Table> {
        let name = self.kind.archive_name();
        match baseline.file_bytes(name) {
            Ok(data) => self.read_table(&data),
            Err(Error::NotFound(_)) => Err(Error::Configuration(format!(
                "baseline {} is missing from the game dump",
                name
            ))),
            Err(e) => Err(e),
        }
    }
}

/// Sort key of a page member: `/bool_data_12.bgdata` is `("bool_data", 12)`.
fn page_order(member: &str) -> Option<(String, usize)> {
    let stem = member.trim_start_matches('/');
    let stem = stem.rsplit_once('.').map(|(s, _)| s).unwrap_or(stem);
    let (ty, n) = stem.rsplit_once('_')?;
    Some((ty.to_string(), n.parse().ok()?))
}

fn save_page_parts(doc: &Value) -> Option<(&str, &[Value])> {
    let file_list = doc.get("file_list")?.as_array()?;
    let file_name = file_list.first()?.get("file_name")?.as_str()?;
    let records = file_list.get(1)?.as_array()?;
    Some((file_name, records))
}

fn with_save_records(template: &Value, records: Vec<Value>) -> Result<Value> {
    let mut page = template.clone();
    let slot = page
        .as_hash_mut()
        .and_then(|h| h.get_mut("file_list"))
        .and_then(Value::as_array_mut)
        .and_then(|list| list.get_mut(1))
        .ok_or_else(|| Error::format_mismatch(SAVEDATA, "malformed save page template"))?;
    *slot = Value::Array(records);
    Ok(page)
}

fn record_key(record: &Value) -> Option<&str> {
    record.get(KEY_FIELD).and_then(Value::as_str)
}

fn diff_tables(base: &Table, modded: &Table) -> KeyedDiff {
    let mut diff = KeyedDiff::new();
    let empty = Vec::new();
    let types: BTreeSet<&String> = base.types.keys().chain(modded.types.keys()).collect();

    for ty in types {
        let base_records = base.types.get(ty).unwrap_or(&empty);
        let mod_records = modded.types.get(ty).unwrap_or(&empty);
        let base_index: HashMap<&str, &Value> = base_records
            .iter()
            .filter_map(|r| record_key(r).map(|k| (k, r)))
            .collect();
        let mod_keys: HashSet<&str> = mod_records.iter().filter_map(record_key).collect();

        let mut type_diff = TypeDiff::default();
        for record in mod_records {
            let Some(key) = record_key(record) else {
                continue;
            };
            if base_index.get(key) != Some(&record) {
                type_diff.add.insert(key.to_string(), record.clone());
            }
        }
        for key in base_index.keys() {
            if !mod_keys.contains(key) {
                type_diff.del.insert(key.to_string());
            }
        }
        if !type_diff.is_empty() {
            diff.insert(ty.clone(), type_diff);
        }
    }
    diff
}

fn apply_diff(table: &mut Table, diff: &KeyedDiff, name: &str) {
    for (ty, type_diff) in diff {
        let records = table.types.entry(ty.clone()).or_default();
        let mut index: HashMap<String, usize> = records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| record_key(r).map(|k| (k.to_string(), i)))
            .collect();

        for (key, record) in &type_diff.add {
            match index.get(key) {
                Some(&i) => records[i] = record.clone(),
                None => {
                    index.insert(key.clone(), records.len());
                    records.push(record.clone());
                }
            }
        }

        for key in &type_diff.del {
            if !index.contains_key(key) {
                let err = Error::Consistency(format!("{name}: cannot delete missing {ty} record {key}"));
                tracing::warn!("{}", err);
            }
        }
        if !type_diff.del.is_empty() {
            records.retain(|r| record_key(r).map_or(true, |k| !type_diff.del.contains(k)));
        }
    }
}

impl FormatMerger for KeyedMerger {
    type Diff = KeyedDiff;

    fn format(&self) -> Format {
        self.kind.format()
    }

    fn diff(
        &self,
        ctx: &DiffContext<'_>,
        modified: &BTreeMap<String, ModifiedFile>,
    ) -> Result<KeyedDiff> {
        let name = self.kind.archive_name();
        let Some(file) = modified.get(name) else {
            return Ok(KeyedDiff::new());
        };
        let modded = self.read_table(&ctx.modded_bytes(file)?)?;
        let base = self.baseline_table(ctx.baseline)?;
        let diff = diff_tables(&base, &modded);
        tracing::debug!("{}: {} record types changed", name, diff.len());
        Ok(diff)
    }

    fn is_empty(diff: &KeyedDiff) -> bool {
        diff.values().all(TypeDiff::is_empty)
    }

    fn consolidate(&self, diffs: Vec<KeyedDiff>) -> KeyedDiff {
        let mut out = KeyedDiff::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for diff in diffs.into_iter().rev() {
            for (ty, type_diff) in diff {
                let entry = out.entry(ty.clone()).or_default();
                for (key, record) in type_diff.add {
                    if seen.insert((ty.clone(), key.clone())) {
                        entry.add.insert(key, record);
                    }
                }
                for key in type_diff.del {
                    if seen.insert((ty.clone(), key.clone())) {
                        entry.del.insert(key);
                    }
                }
            }
        }
        out.retain(|_, d| !d.is_empty());
        out
    }

    fn merge(&self, ctx: &MergeContext<'_>, mods: Vec<ModDiff<KeyedDiff>>) -> Result<FormatReport> {
        let mut report = FormatReport::default();
        if mods.is_empty() {
            return Ok(report);
        }
        let name = self.kind.archive_name();
        tracing::info!("Merging {} from {} mods", name, mods.len());

        let diff = self.consolidate(mods.into_iter().map(|m| m.diff).collect());
        let mut table = self.baseline_table(ctx.baseline)?;
        apply_diff(&mut table, &diff, name);

        let archive = self.write_table(table)?;
        let bytes = encode_for_name(name, archive.to_bytes()?)?;
        record_size(&mut report, name, &bytes, ctx.platform());
        ctx.writer.put(name, bytes)?;
        report.outputs.push(name.to_string());
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

    fn flag(name: &str, value: i32) -> Value {
        Value::hash([
            ("DataName", Value::from(name)),
            ("InitValue", Value::Int(value)),
        ])
    }

    fn gamedata_bytes(pages: &[(&str, Vec<Value>)]) -> Vec<u8> {
        let members: Vec<(String, Vec<u8>)> = pages
            .iter()
            .enumerate()
            .map(|(n, (ty, records))| {
                let page = Value::hash([(*ty, Value::Array(records.clone()))]);
                (format!("/{ty}_{n}.bgdata"), page.to_binary().unwrap())
            })
            .collect();
        let refs: Vec<(&str, Vec<u8>)> =
            members.iter().map(|(n, d)| (n.as_str(), d.clone())).collect();
        Fixture::archive_bytes(&refs, true)
    }

    fn setup(records: Vec<Value>) -> (Fixture, std::sync::Arc<crate::baseline::Baseline>) {
        let fixture = Fixture::new();
        fixture.write_game_archive(
            "Pack/Bootup.pack",
            &[("GameData/gamedata.ssarc", gamedata_bytes(&[("bool_data", records)]))],
        );
        let baseline = fixture.baseline();
        (fixture, baseline)
    }

    fn mod_diff(id: &str, priority: i32, diff: KeyedDiff) -> ModDiff<KeyedDiff> {
        ModDiff {
            mod_id: id.to_string(),
            priority,
            flags: ModFlags::default(),
            mod_root: Default::default(),
            diff,
        }
    }

    fn adds(records: &[Value]) -> KeyedDiff {
        let mut td = TypeDiff::default();
        for r in records {
            td.add.insert(record_key(r).unwrap().to_string(), r.clone());
        }
        KeyedDiff::from([("bool_data".to_string(), td)])
    }

    fn dels(keys: &[&str]) -> KeyedDiff {
        let td = TypeDiff {
            add: BTreeMap::new(),
            del: keys.iter().map(|k| k.to_string()).collect(),
        };
        KeyedDiff::from([("bool_data".to_string(), td)])
    }

    #[test]
    fn test_diff_against_baseline() {
        let (fixture, baseline) = setup(vec![flag("A", 0), flag("B", 0), flag("C", 0)]);
        let mod_dir = fixture.mod_dir("flags");
        Fixture::write_mod_archive(
            &mod_dir,
            "Pack/Bootup.pack",
            &[(
                "GameData/gamedata.ssarc",
                gamedata_bytes(&[("bool_data", vec![flag("A", 0), flag("B", 1), flag("D", 0)])]),
            )],
        );

        let scan = crate::detector::Detector::new(&baseline)
            .scan_tree(&mod_dir)
            .unwrap();
        let ctx = DiffContext {
            baseline: &baseline,
            mod_root: &mod_dir,
        };
        let merger = KeyedMerger::new(TableKind::GameData);
        let diff = merger.diff(&ctx, &scan.modified).unwrap();

        let td = &diff["bool_data"];
        assert_eq!(td.add.keys().collect::<Vec<_>>(), vec!["B", "D"]);
        assert_eq!(td.del.iter().collect::<Vec<_>>(), vec!["C"]);
    }

    #[test]
    fn test_identical_table_is_empty_diff() {
        let records = vec![flag("A", 0), flag("B", 0)];
        let table = Table {
            types: BTreeMap::from([("bool_data".to_string(), records)]),
            ..Default::default()
        };
        assert!(KeyedMerger::is_empty(&diff_tables(&table, &table)));
    }

    #[test]
    fn test_reverse_priority_first_add_wins() {
        let merger = KeyedMerger::new(TableKind::GameData);
        let a = adds(&[flag("K", 1)]);
        let b = adds(&[flag("K", 2)]);
        let merged = merger.consolidate(vec![a, b]);
        assert_eq!(merged["bool_data"].add["K"], flag("K", 2));
    }

    #[test]
    fn test_delete_then_readd() {
        let merger = KeyedMerger::new(TableKind::GameData);
        let merged = merger.consolidate(vec![dels(&["K"]), adds(&[flag("K", 5)])]);
        assert_eq!(merged["bool_data"].add["K"], flag("K", 5));
        assert!(merged["bool_data"].del.is_empty());

        let deleted = merger.consolidate(vec![adds(&[flag("K", 5)]), dels(&["K"])]);
        assert!(deleted["bool_data"].add.is_empty());
        assert!(deleted["bool_data"].del.contains("K"));
    }

    #[test]
    fn test_merge_rechunks_and_is_idempotent() {
        let (fixture, baseline) = setup(vec![flag("A", 0), flag("B", 0), flag("C", 0)]);
        let writer = MasterWriter::new(fixture.root.join("master"), &baseline);
        let ctx = MergeContext {
            baseline: &baseline,
            writer: &writer,
        };
        let merger = KeyedMerger::new(TableKind::GameData).with_page_capacity(2);

        let mods = vec![
            mod_diff("a", 100, adds(&[flag("D", 1)])),
            mod_diff("b", 110, dels(&["B"])),
            mod_diff("c", 120, adds(&[flag("A", 7)])),
        ];
        let report = merger.merge(&ctx, mods.clone()).unwrap();
        assert_eq!(report.outputs, vec![GAMEDATA.to_string()]);
        assert_eq!(report.sizes.len(), 1);

        let first = writer.read(GAMEDATA).unwrap();
        let archive = Archive::read(&first).unwrap();
        assert_eq!(
            archive.names().collect::<Vec<_>>(),
            vec!["/bool_data_0.bgdata", "/bool_data_1.bgdata"]
        );
        let table = merger.read_table(&first).unwrap();
        assert_eq!(
            table.types["bool_data"],
            vec![flag("A", 7), flag("C", 0), flag("D", 1)]
        );

        merger.merge(&ctx, mods).unwrap();
        assert_eq!(writer.read(GAMEDATA).unwrap(), first);
    }

    #[test]
    fn test_savedata_pages_keep_header() {
        let fixture = Fixture::new();
        let header = Value::hash([
            ("file_name", Value::from(SAVE_FILE)),
            ("IsCommon", Value::Bool(false)),
        ]);
        let page = |file: Value, records: Vec<Value>| {
            Value::hash([
                ("file_list", Value::Array(vec![file, Value::Array(records)])),
                ("save_info", Value::Array(vec![Value::hash([("revision", Value::Int(3))])])),
            ])
        };
        let caption = Value::hash([("file_name", Value::from("caption.sav"))]);
        let members = vec![
            (
                "/saveformat_0.bgsvdata",
                page(header.clone(), vec![flag("A", 0)]).to_binary().unwrap(),
            ),
            (
                "/saveformat_1.bgsvdata",
                page(caption.clone(), vec![flag("Pic", 0)]).to_binary().unwrap(),
            ),
        ];
        fixture.write_game_archive(
            "Pack/Bootup.pack",
            &[("GameData/savedataformat.ssarc", Fixture::archive_bytes(&members, true))],
        );
        let baseline = fixture.baseline();
        let writer = MasterWriter::new(fixture.root.join("master"), &baseline);
        let ctx = MergeContext {
            baseline: &baseline,
            writer: &writer,
        };

        let merger = KeyedMerger::new(TableKind::SaveData).with_page_capacity(1);
        let mut td = TypeDiff::default();
        td.add.insert("B".to_string(), flag("B", 1));
        let diff = KeyedDiff::from([(SAVE_FILE.to_string(), td)]);
        merger.merge(&ctx, vec![mod_diff("a", 100, diff)]).unwrap();

        let archive = Archive::read(&writer.read(SAVEDATA).unwrap()).unwrap();
        assert_eq!(archive.len(), 3);
        let second = Value::from_binary(archive.get("/saveformat_1.bgsvdata").unwrap()).unwrap();
        assert_eq!(second, page(header, vec![flag("B", 1)]));
        let last = Value::from_binary(archive.get("/saveformat_2.bgsvdata").unwrap()).unwrap();
        assert_eq!(last, page(caption, vec![flag("Pic", 0)]));
    }

    #[test]
    fn test_page_order() {
        assert_eq!(page_order("/bool_data_12.bgdata"), Some(("bool_data".into(), 12)));
        assert_eq!(page_order("/saveformat_0.bgsvdata"), Some(("saveformat".into(), 0)));
        assert_eq!(page_order("/readme"), None);
    }
}
