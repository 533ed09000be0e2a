//! Diff Log Store.
//!
//! Each installed mod keeps one log per participating format under its
//! `logs/` directory, and one more set per option under
//! `options/<folder>/logs/`. Logs are written once at install time and are
//! the only input of a merge: installed mods are never diffed again.
//!
//! Two empty marker files next to the logs carry the mod's size-table
//! switches: `.leave` and `.shrink` (see [`ModFlags`]).

use crate::error::Result;
use crate::mergers::{Format, FormatMerger, ModDiff, ModFlags};
use crate::pipeline::ModRecord;
use camino::{Utf8Path, Utf8PathBuf};
use pw_mod_project::OPTIONS_DIR;
use std::collections::BTreeSet;
use xxhash_rust::xxh3::Xxh3;

pub const LOGS_DIR: &str = "logs";
const LEAVE_MARKER: &str = ".leave";
const SHRINK_MARKER: &str = ".shrink";

/// Log directory of a mod's base content.
pub fn log_dir(mod_root: &Utf8Path) -> Utf8PathBuf {
    mod_root.join(LOGS_DIR)
}

/// Root of a mod option's content.
pub fn option_dir(mod_root: &Utf8Path, folder: &str) -> Utf8PathBuf {
    mod_root.join(OPTIONS_DIR).join(folder)
}

/// Log directory of one of a mod's options.
pub fn option_log_dir(mod_root: &Utf8Path, folder: &str) -> Utf8PathBuf {
    option_dir(mod_root, folder).join(LOGS_DIR)
}

pub fn write_log(dir: &Utf8Path, format: Format, data: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir.as_std_path())?;
    let path = dir.join(format.log_file());
    tracing::debug!("Writing {} log {}", format, path);
    std::fs::write(path.as_std_path(), data)?;
    Ok(())
}

/// Raw log bytes, or `None` if the directory holds no log for `format`.
pub fn read_log(dir: &Utf8Path, format: Format) -> Result<Option<Vec<u8>>> {
    let path = dir.join(format.log_file());
    if !path.as_std_path().is_file() {
        return Ok(None);
    }
    Ok(Some(std::fs::read(path.as_std_path())?))
}

pub fn has_log(dir: &Utf8Path, format: Format) -> bool {
    dir.join(format.log_file()).as_std_path().is_file()
}

/// Delete every format log in `dir`. Marker files are kept.
pub fn clear_logs(dir: &Utf8Path) -> Result<()> {
    for format in Format::ALL {
        let path = dir.join(format.log_file());
        if path.as_std_path().is_file() {
            std::fs::remove_file(path.as_std_path())?;
        }
    }
    Ok(())
}

/// The mod's diff for `M`: its base log with the logs of the enabled options
/// layered on top.
pub fn read_mod_diff<M: FormatMerger>(
    merger: &M,
    mod_root: &Utf8Path,
    options: &[String],
) -> Result<Option<M::Diff>> {
    let mut diffs = Vec::new();
    if let Some(data) = read_log(&log_dir(mod_root), merger.format())? {
        diffs.push(M::decode_log(&data)?);
    }
    for folder in options {
        if let Some(data) = read_log(&option_log_dir(mod_root, folder), merger.format())? {
            diffs.push(M::decode_log(&data)?);
        }
    }

    match diffs.len() {
        0 => Ok(None),
        1 => Ok(diffs.pop()),
        _ => Ok(Some(merger.consolidate(diffs))),
    }
}

/// Every mod's diff for `M`, in ascending priority.
pub fn read_all_logs<M: FormatMerger>(
    merger: &M,
    mods: &[ModRecord],
) -> Result<Vec<ModDiff<M::Diff>>> {
    let mut ordered: Vec<&ModRecord> = mods.iter().collect();
    ordered.sort_by_key(|m| m.priority);

    let mut out = Vec::new();
    for record in ordered {
        let Some(diff) = read_mod_diff(merger, &record.path, &record.options)? else {
            continue;
        };
        out.push(ModDiff {
            mod_id: record.id.clone(),
            priority: record.priority,
            flags: read_flags(&record.path),
            mod_root: record.path.clone(),
            diff,
        });
    }
    Ok(out)
}

/// Formats with a log for the mod's base content or any of the given options.
pub fn formats_present(mod_root: &Utf8Path, options: &[String]) -> BTreeSet<Format> {
    let mut dirs = vec![log_dir(mod_root)];
    dirs.extend(options.iter().map(|o| option_log_dir(mod_root, o)));

    Format::ALL
        .into_iter()
        .filter(|format| dirs.iter().any(|dir| has_log(dir, *format)))
        .collect()
}

pub fn read_flags(mod_root: &Utf8Path) -> ModFlags {
    let dir = log_dir(mod_root);
    ModFlags {
        leave: dir.join(LEAVE_MARKER).as_std_path().exists(),
        shrink: dir.join(SHRINK_MARKER).as_std_path().exists(),
    }
}

pub fn write_flags(mod_root: &Utf8Path, flags: ModFlags) -> Result<()> {
    let dir = log_dir(mod_root);
    std::fs::create_dir_all(dir.as_std_path())?;
    for (marker, set) in [(LEAVE_MARKER, flags.leave), (SHRINK_MARKER, flags.shrink)] {
        let path = dir.join(marker);
        if set {
            std::fs::write(path.as_std_path(), b"")?;
        } else if path.as_std_path().exists() {
            std::fs::remove_file(path.as_std_path())?;
        }
    }
    Ok(())
}

/// Digest over the logs that feed a merge of `mods`.
///
/// Covers every mod's id, priority, enabled options, markers and the bytes of
/// each log that would be read.
pub fn logs_fingerprint(mods: &[ModRecord]) -> Result<u64> {
    let mut ordered: Vec<&ModRecord> = mods.iter().collect();
    ordered.sort_by_key(|m| m.priority);

    let mut hasher = Xxh3::new();
    for record in ordered {
        hasher.update(record.id.as_bytes());
        hasher.update(&record.priority.to_le_bytes());
        let flags = read_flags(&record.path);
        hasher.update(&[u8::from(flags.leave), u8::from(flags.shrink)]);

        let mut dirs = vec![log_dir(&record.path)];
        for folder in &record.options {
            hasher.update(folder.as_bytes());
            dirs.push(option_log_dir(&record.path, folder));
        }
        for dir in dirs {
            for format in Format::ALL {
                if let Some(data) = read_log(&dir, format)? {
                    hasher.update(format.log_file().as_bytes());
                    hasher.update(&(data.len() as u64).to_le_bytes());
                    hasher.update(&data);
                }
            }
        }
    }
    Ok(hasher.digest())
}
