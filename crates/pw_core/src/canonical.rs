//! Canonical file names.
//!
//! A canonical name identifies a game resource independently of which mod or
//! physical layer provides it. Top-level files are named relative to the
//! content root (`Pack/Bootup.pack`); add-on content carries the
//! [`AOC_PREFIX`] (`Aoc/0010/Map/MainField/...`). Members of container
//! archives are chained with `//`:
//!
//! ```text
//! Pack/Bootup.pack//GameData/gamedata.ssarc///bool_data_0.bgdata
//! ```
//!
//! Member names may themselves start with `/`, so a separator is always the
//! *first* two slashes of a run, never the last two.

use crate::settings::Platform;
use camino::Utf8PathBuf;
use pw_formats::compression::is_compressed_name;

/// Prefix of canonical names that live in the add-on content layer.
pub const AOC_PREFIX: &str = "Aoc/0010/";

/// Separator between nesting levels.
pub const NESTED_SEPARATOR: &str = "//";

/// Known content roots in extracted mod trees and what they map to.
///
/// Longer prefixes come first so that the first match is the right one.
const ROOTS: &[(&str, &str)] = &[
    ("01007EF00011E000/romfs/", ""),
    ("01007EF00011E001/romfs/", AOC_PREFIX),
    ("01007EF00011E002/romfs/", AOC_PREFIX),
    ("01007EF00011F001/romfs/", AOC_PREFIX),
    ("01007EF00011F002/romfs/", AOC_PREFIX),
    ("aoc/content/0010/", AOC_PREFIX),
    ("aoc/0010/content/", AOC_PREFIX),
    ("aoc/0010/", AOC_PREFIX),
    ("content/", ""),
    ("romfs/", ""),
];

/// Homebrew loader folders some mods are distributed in.
const LOADER_PREFIXES: &[&str] = &["atmosphere/contents/", "atmosphere/titles/"];

/// Map a path relative to an extracted mod root to its canonical name.
///
/// Returns `None` for paths outside any known content root (mod metadata,
/// readme files, unrecognized folders).
pub fn canonicalize(rel_path: &str) -> Option<String> {
    let normalized = rel_path.replace('\\', "/");
    let mut path = normalized.trim_start_matches('/');

    for prefix in LOADER_PREFIXES {
        if let Some(rest) = path.strip_prefix(prefix) {
            path = rest;
            break;
        }
    }

    for (root, replacement) in ROOTS {
        if let Some(rest) = path.strip_prefix(root) {
            if rest.is_empty() || rest.ends_with('/') {
                return None;
            }
            return Some(format!("{replacement}{rest}"));
        }
    }

    None
}

/// Canonical name of `member` inside the container `parent`.
pub fn join_nested(parent: &str, member: &str) -> String {
    format!("{parent}{NESTED_SEPARATOR}{member}")
}

/// Split a canonical name into its nesting levels, outermost first.
pub fn split_nested(name: &str) -> Vec<&str> {
    name.split(NESTED_SEPARATOR).collect()
}

/// The outermost physical file of a canonical name.
pub fn top_level(name: &str) -> &str {
    name.split(NESTED_SEPARATOR).next().unwrap_or(name)
}

/// The canonical name of the container directly holding `name`, if nested.
pub fn parent(name: &str) -> Option<String> {
    let parts = split_nested(name);
    if parts.len() < 2 {
        return None;
    }
    Some(parts[..parts.len() - 1].join(NESTED_SEPARATOR))
}

/// Name of the innermost level: the member name inside its container, or
/// the full canonical name for top-level files.
pub fn leaf_name(name: &str) -> &str {
    name.split(NESTED_SEPARATOR).last().unwrap_or(name)
}

/// The name the resource size table uses for a canonical file.
///
/// The size table is keyed by the innermost name with the compressed form
/// of the extension dropped (`Actor/Pack/Foo.sbactorpack` becomes
/// `Actor/Pack/Foo.bactorpack`).
pub fn resource_name(name: &str) -> String {
    let leaf = leaf_name(name).trim_start_matches('/');
    if !is_compressed_name(leaf) {
        return leaf.to_string();
    }
    match leaf.rfind('.') {
        Some(dot) => format!("{}.{}", &leaf[..dot], &leaf[dot + 2..]),
        None => leaf.to_string(),
    }
}

/// Path of a top-level canonical file inside an output tree for `platform`.
pub fn physical_path(name: &str, platform: Platform) -> Utf8PathBuf {
    let top = top_level(name);
    match top.strip_prefix(AOC_PREFIX) {
        Some(rest) => Utf8PathBuf::from(platform.aoc_root()).join(rest),
        None => Utf8PathBuf::from(platform.content_root()).join(top),
    }
}
