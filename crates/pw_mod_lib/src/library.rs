//! Library operations.
//!
//! Every operation takes the store lock, updates the mod store, re-merges the
//! formats it affects and only then persists `library.json`. A failed merge
//! leaves the index as it was.

use crate::error::{Error, Result};
use crate::index::{LibraryIndex, LibraryModEntry, StoreLock, MASTER_DIR, MODS_DIR};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use pw_core::Settings;
use pw_merge::logs::{self, LOGS_DIR};
use pw_merge::{Baseline, Format, MergeEngine, MergeProgress, MergeResult, ModFlags};
use pw_mod_project::ModInfo;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use walkdir::WalkDir;

/// Choices made when installing a mod.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Enabled option folders. `None` uses the descriptor's defaults.
    pub options: Option<Vec<String>>,
    /// Explicit priority. `None` places the mod above every installed one.
    pub priority: Option<i32>,
    pub flags: ModFlags,
}

/// A mod as shown to the user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledMod {
    pub id: String,
    pub name: String,
    pub version: String,
    pub priority: i32,
    pub installed_at: chrono::DateTime<Utc>,
    pub options: Vec<String>,
    pub formats: Vec<Format>,
    pub mod_dir: Utf8PathBuf,
}

impl InstalledMod {
    fn from_entry(entry: &LibraryModEntry, store_dir: &Utf8Path) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            version: entry.version.clone(),
            priority: entry.priority,
            installed_at: entry.installed_at,
            options: entry.options.clone(),
            formats: entry.formats.iter().copied().collect(),
            mod_dir: entry.mod_dir(store_dir),
        }
    }
}

#[derive(Debug)]
pub struct InstallResult {
    pub installed: InstalledMod,
    pub merge: MergeResult,
}

pub struct ModLibrary {
    store_dir: Utf8PathBuf,
    engine: MergeEngine,
}

impl ModLibrary {
    /// Open the library described by `settings`.
    ///
    /// Fails with a configuration error before touching anything if the
    /// game dump is unusable.
    pub fn open(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let baseline = Arc::new(Baseline::new(
            settings.layout(),
            Some(settings.hash_table_cache_path()),
        ));
        let store_dir = settings.store_dir.clone();
        std::fs::create_dir_all(store_dir.join(MODS_DIR).as_std_path())?;
        let engine = MergeEngine::new(baseline, store_dir.join(MASTER_DIR));
        Ok(Self { store_dir, engine })
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(MergeProgress) + Send + Sync + 'static,
    {
        self.engine = self.engine.with_progress(callback);
        self
    }

    pub fn store_dir(&self) -> &Utf8Path {
        &self.store_dir
    }

    pub fn master_dir(&self) -> &Utf8Path {
        self.engine.master_root()
    }

    /// Installed mods, highest priority first.
    pub fn list(&self) -> Result<Vec<InstalledMod>> {
        let index = LibraryIndex::load(&self.store_dir)?;
        Ok(index
            .by_priority()
            .into_iter()
            .map(|entry| InstalledMod::from_entry(entry, &self.store_dir))
            .collect())
    }

    /// Install an extracted mod from `source` and merge the formats it touches.
    pub fn install(&self, source: &Utf8Path, choice: InstallOptions) -> Result<InstallResult> {
        if !source.as_std_path().is_dir() {
            return Err(Error::InvalidSource(source.to_path_buf()));
        }
        let _lock = StoreLock::acquire(&self.store_dir)?;
        let mut index = LibraryIndex::load(&self.store_dir)?;

        let info = ModInfo::load(source)?;
        let id = info.id();
        if index.contains(&id) {
            return Err(Error::AlreadyInstalled(id));
        }
        if let Some(dependency) = info.depends.iter().find(|d| !index.contains(d)) {
            return Err(Error::MissingDependency {
                id,
                dependency: dependency.clone(),
            });
        }
        let options = choice.options.unwrap_or_else(|| info.default_options());
        info.validate_selection(&options)?;

        let priority = choice.priority.unwrap_or_else(|| index.next_priority());
        if let Some(holder) = index.holder_of(priority, None) {
            return Err(Error::PriorityTaken {
                priority,
                holder: holder.id.clone(),
            });
        }

        tracing::info!("Installing mod {} at priority {}", id, priority);
        let entry = LibraryModEntry {
            id: id.clone(),
            name: info.name.clone(),
            version: info.version.clone(),
            priority,
            installed_at: Utc::now(),
            options,
            formats: BTreeSet::new(),
            flags: choice.flags,
            depends: info.depends.clone(),
        };
        let mod_dir = entry.mod_dir(&self.store_dir);
        if mod_dir.as_std_path().exists() {
            tracing::warn!("Removing leftover directory {}", mod_dir);
            std::fs::remove_dir_all(mod_dir.as_std_path())?;
        }

        match self.install_into(&mut index, entry, source, &info) {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::error!("Installing {} failed: {}", id, e);
                if mod_dir.as_std_path().exists() {
                    std::fs::remove_dir_all(mod_dir.as_std_path())?;
                }
                Err(e)
            }
        }
    }

    fn install_into(
        &self,
        index: &mut LibraryIndex,
        mut entry: LibraryModEntry,
        source: &Utf8Path,
        info: &ModInfo,
    ) -> Result<InstallResult> {
        let mod_dir = entry.mod_dir(&self.store_dir);
        copy_mod_tree(source, &mod_dir)?;
        logs::write_flags(&mod_dir, entry.flags)?;

        let processed = self.engine.process_mod(&mod_dir, &info.option_folders())?;
        for failure in &processed.failures {
            tracing::warn!("{}: {} ({})", entry.id, failure.item, failure.error);
        }
        entry.formats = logs::formats_present(&mod_dir, &entry.options);

        let formats = entry.formats.clone();
        index.mods.push(entry.clone());
        let merge = self.engine.merge(&index.records(&self.store_dir), &formats)?;
        index.save(&self.store_dir)?;

        Ok(InstallResult {
            installed: InstalledMod::from_entry(&entry, &self.store_dir),
            merge,
        })
    }

    /// Remove a mod and re-merge the formats it had touched.
    pub fn uninstall(&self, id: &str) -> Result<MergeResult> {
        let _lock = StoreLock::acquire(&self.store_dir)?;
        let mut index = LibraryIndex::load(&self.store_dir)?;
        let Some(entry) = index.get(id).cloned() else {
            return Err(Error::NotInstalled(id.to_string()));
        };
        let dependents = index.dependents_of(id);
        if !dependents.is_empty() {
            return Err(Error::HasDependents {
                id: id.to_string(),
                dependents,
            });
        }

        tracing::info!("Uninstalling mod {}", id);
        index.mods.retain(|m| m.id != id);
        let merge = self
            .engine
            .merge(&index.records(&self.store_dir), &entry.formats)?;
        index.save(&self.store_dir)?;

        let mod_dir = entry.mod_dir(&self.store_dir);
        if mod_dir.as_std_path().exists() {
            std::fs::remove_dir_all(mod_dir.as_std_path())?;
        }
        Ok(merge)
    }

    /// Move a mod to a free priority and re-merge the formats it touches.
    pub fn reorder(&self, id: &str, priority: i32) -> Result<MergeResult> {
        let _lock = StoreLock::acquire(&self.store_dir)?;
        let mut index = LibraryIndex::load(&self.store_dir)?;
        if let Some(holder) = index.holder_of(priority, Some(id)) {
            return Err(Error::PriorityTaken {
                priority,
                holder: holder.id.clone(),
            });
        }
        let entry = index
            .get_mut(id)
            .ok_or_else(|| Error::NotInstalled(id.to_string()))?;
        tracing::info!("Moving mod {} from {} to {}", id, entry.priority, priority);
        entry.priority = priority;
        let formats = entry.formats.clone();

        let merge = self.engine.merge(&index.records(&self.store_dir), &formats)?;
        index.save(&self.store_dir)?;
        Ok(merge)
    }

    /// Change a mod's enabled options.
    ///
    /// Re-merges every format the old or new selection touches.
    pub fn set_options(&self, id: &str, options: Vec<String>) -> Result<MergeResult> {
        let _lock = StoreLock::acquire(&self.store_dir)?;
        let mut index = LibraryIndex::load(&self.store_dir)?;
        let entry = index
            .get_mut(id)
            .ok_or_else(|| Error::NotInstalled(id.to_string()))?;
        let mod_dir = entry.mod_dir(&self.store_dir);
        ModInfo::load(&mod_dir)?.validate_selection(&options)?;

        tracing::info!("Setting options of {} to {:?}", id, options);
        let new_formats = logs::formats_present(&mod_dir, &options);
        let formats: BTreeSet<Format> = entry.formats.union(&new_formats).copied().collect();
        entry.options = options;
        entry.formats = new_formats;

        let merge = self.engine.merge(&index.records(&self.store_dir), &formats)?;
        index.save(&self.store_dir)?;
        Ok(merge)
    }

    /// Rebuild the whole master layer from every installed mod's logs.
    pub fn remerge_all(&self) -> Result<MergeResult> {
        let _lock = StoreLock::acquire(&self.store_dir)?;
        let index = LibraryIndex::load(&self.store_dir)?;
        tracing::info!("Re-merging {} mods", index.mods.len());
        Ok(self.engine.rebuild_all(&index.records(&self.store_dir))?)
    }
}

/// Copy an extracted mod into the store. Stale logs in the source are skipped.
fn copy_mod_tree(source: &Utf8Path, dest: &Utf8Path) -> Result<()> {
    for entry in WalkDir::new(source.as_std_path()) {
        let entry = entry.map_err(std::io::Error::from)?;
        let Ok(rel) = entry.path().strip_prefix(source.as_std_path()) else {
            continue;
        };
        if rel.components().next().is_some_and(|c| c.as_os_str() == LOGS_DIR) {
            continue;
        }
        let target = dest.as_std_path().join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pw_core::Platform;
    use pw_formats::compression::compress;
    use pw_formats::{Parameter, ParameterIo, ParameterList, ParameterObject, Value};
    use pw_merge::writer::MasterWriter;
    use pw_mod_project::{ModOption, ModOptions};
    use tempfile::TempDir;

    const UNIT: &str = "Map/MainField/A-1/A-1_Static.smubin";

    fn unit_bytes(names: &[(u32, &str)]) -> Vec<u8> {
        let objs = names
            .iter()
            .map(|(id, name)| {
                Value::hash([
                    ("HashId", Value::UInt(*id)),
                    ("UnitConfigName", Value::from(*name)),
                ])
            })
            .collect();
        let doc = Value::hash([("Objs", Value::Array(objs))]);
        compress(&doc.to_binary().unwrap()).unwrap()
    }

    fn write(path: &Utf8Path, data: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    struct Env {
        _temp: TempDir,
        root: Utf8PathBuf,
        library: ModLibrary,
    }

    impl Env {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let root = Utf8Path::from_path(temp.path()).unwrap().to_path_buf();
            std::fs::create_dir_all(root.join("game/Pack")).unwrap();
            write(&root.join("game").join(UNIT), &unit_bytes(&[(1, "A"), (2, "B")]));
            let settings = Settings {
                game_dir: root.join("game"),
                platform: Platform::WiiU,
                store_dir: root.join("store"),
                ..Default::default()
            };
            let library = ModLibrary::open(&settings).unwrap();
            Self {
                _temp: temp,
                root,
                library,
            }
        }

        /// Write an extracted mod that replaces the map unit.
        fn source(&self, name: &str, depends: &[&str], objs: &[(u32, &str)]) -> Utf8PathBuf {
            let dir = self.root.join("incoming").join(name);
            let mut info = ModInfo::new(name);
            info.depends = depends.iter().map(|s| s.to_string()).collect();
            info.save(&dir).unwrap();
            write(&dir.join("content").join(UNIT), &unit_bytes(objs));
            dir
        }

        fn master_names(&self) -> Vec<String> {
            let baseline = self.library.engine.baseline();
            let writer = MasterWriter::new(self.library.master_dir().to_path_buf(), baseline);
            let doc = Value::from_binary(&writer.read(UNIT).unwrap()).unwrap();
            doc.get("Objs")
                .and_then(Value::as_array)
                .unwrap()
                .iter()
                .map(|o| o.get("UnitConfigName").and_then(Value::as_str).unwrap().to_string())
                .collect()
        }
    }

    #[test]
    fn test_install_assigns_priorities_and_merges() {
        let env = Env::new();
        let a = env.source("Mod A", &[], &[(1, "A1"), (2, "B")]);
        let b = env.source("Mod B", &[], &[(1, "A2"), (2, "B"), (3, "C")]);

        let first = env.library.install(&a, InstallOptions::default()).unwrap();
        assert_eq!(first.installed.id, "mod-a");
        assert_eq!(first.installed.priority, 100);
        assert!(first.installed.formats.contains(&Format::Maps));

        let second = env.library.install(&b, InstallOptions::default()).unwrap();
        assert_eq!(second.installed.priority, 110);
        assert_eq!(env.master_names(), vec!["A2", "B", "C"]);

        let listed: Vec<_> = env.library.list().unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(listed, vec!["mod-b", "mod-a"]);
        assert!(matches!(
            env.library.install(&a, InstallOptions::default()),
            Err(Error::AlreadyInstalled(_))
        ));
    }

    #[test]
    fn test_missing_dependency_leaves_store_clean() {
        let env = Env::new();
        let addon = env.source("Addon", &["base-mod"], &[(1, "X")]);
        let result = env.library.install(&addon, InstallOptions::default());
        assert!(matches!(result, Err(Error::MissingDependency { .. })));
        assert!(!env.library.store_dir().join("mods/addon").as_std_path().exists());
        assert!(env.library.list().unwrap().is_empty());
    }

    #[test]
    fn test_uninstall_reverts_master() {
        let env = Env::new();
        let base = env.source("Base Mod", &[], &[(1, "A1"), (2, "B")]);
        let addon = env.source("Addon", &["base-mod"], &[(1, "A"), (2, "B"), (4, "D")]);
        env.library.install(&base, InstallOptions::default()).unwrap();
        env.library.install(&addon, InstallOptions::default()).unwrap();
        assert_eq!(env.master_names(), vec!["A1", "B", "D"]);

        assert!(matches!(
            env.library.uninstall("base-mod"),
            Err(Error::HasDependents { .. })
        ));

        env.library.uninstall("addon").unwrap();
        assert_eq!(env.master_names(), vec!["A1", "B"]);
        env.library.uninstall("base-mod").unwrap();
        assert_eq!(env.master_names(), vec!["A", "B"]);
        assert!(!env.library.store_dir().join("mods/base-mod").as_std_path().exists());
        assert!(matches!(env.library.uninstall("base-mod"), Err(Error::NotInstalled(_))));
    }

    #[test]
    fn test_reorder_changes_winner() {
        let env = Env::new();
        let a = env.source("Mod A", &[], &[(1, "A1"), (2, "B")]);
        let b = env.source("Mod B", &[], &[(1, "A2"), (2, "B")]);
        env.library.install(&a, InstallOptions::default()).unwrap();
        env.library.install(&b, InstallOptions::default()).unwrap();
        assert_eq!(env.master_names(), vec!["A2", "B"]);

        assert!(matches!(
            env.library.reorder("mod-a", 110),
            Err(Error::PriorityTaken { priority: 110, .. })
        ));
        env.library.reorder("mod-a", 200).unwrap();
        assert_eq!(env.master_names(), vec!["A1", "B"]);
    }

    #[test]
    fn test_reorder_leaves_other_formats_alone() {
        const LINK: &str = "Actor/ActorLink/Foo.bxml";
        let link = |life: i32| {
            let root = ParameterList::new().with_object(
                "LinkTarget",
                ParameterObject::new().with("Life", Parameter::Int(life)),
            );
            ParameterIo::new("xml", root).to_binary().unwrap()
        };

        let env = Env::new();
        write(&env.root.join("game").join(LINK), &link(10));
        let a = env.source("Mod A", &[], &[(1, "A1"), (2, "B")]);
        let b = env.source("Mod B", &[], &[(1, "A2"), (2, "B")]);
        write(&b.join("content").join(LINK), &link(20));
        env.library.install(&a, InstallOptions::default()).unwrap();
        let installed = env.library.install(&b, InstallOptions::default()).unwrap();
        assert!(installed.installed.formats.contains(&Format::DeepMerge));

        let writer = MasterWriter::new(
            env.library.master_dir().to_path_buf(),
            env.library.engine.baseline(),
        );
        let before = std::fs::read(writer.path_of(LINK)).unwrap();
        let modified = || {
            std::fs::metadata(writer.path_of(LINK))
                .unwrap()
                .modified()
                .unwrap()
        };
        let modified_before = modified();

        let result = env.library.reorder("mod-a", 200).unwrap();
        assert_eq!(result.formats_merged, vec![Format::Maps, Format::SizeTable]);
        assert_eq!(env.master_names(), vec!["A1", "B"]);
        assert_eq!(std::fs::read(writer.path_of(LINK)).unwrap(), before);
        assert_eq!(modified(), modified_before);

        let doc = ParameterIo::from_binary(&before).unwrap();
        assert_eq!(
            doc.root.objects["LinkTarget"].get("Life"),
            Some(&Parameter::Int(20))
        );
    }

    #[test]
    fn test_set_options() {
        let env = Env::new();
        let dir = env.source("Optional", &[], &[(1, "A1"), (2, "B")]);
        let mut info = ModInfo::load(&dir).unwrap();
        info.options = ModOptions {
            multi: vec![ModOption {
                name: "Extra".to_string(),
                description: String::new(),
                folder: "extra".to_string(),
                default: false,
            }],
            single: Vec::new(),
        };
        info.save(&dir).unwrap();
        write(
            &dir.join("options/extra/content").join(UNIT),
            &unit_bytes(&[(1, "A"), (2, "B"), (5, "E")]),
        );

        env.library.install(&dir, InstallOptions::default()).unwrap();
        assert_eq!(env.master_names(), vec!["A1", "B"]);

        env.library
            .set_options("optional", vec!["extra".to_string()])
            .unwrap();
        assert_eq!(env.master_names(), vec!["A1", "B", "E"]);

        assert!(env
            .library
            .set_options("optional", vec!["missing".to_string()])
            .is_err());

        env.library.set_options("optional", Vec::new()).unwrap();
        assert_eq!(env.master_names(), vec!["A1", "B"]);
    }

    #[test]
    fn test_remerge_all() {
        let env = Env::new();
        let a = env.source("Mod A", &[], &[(1, "A1"), (2, "B")]);
        env.library.install(&a, InstallOptions::default()).unwrap();
        std::fs::remove_dir_all(env.library.master_dir().as_std_path()).unwrap();

        let result = env.library.remerge_all().unwrap();
        assert!(!result.reused);
        assert_eq!(env.master_names(), vec!["A1", "B"]);
    }
}
