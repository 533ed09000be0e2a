//! Resource size prediction.
//!
//! The game reserves memory for every resource according to the size table.
//! The exact size is the 32-byte aligned decompressed length, plus a fixed
//! per-platform allocator overhead, plus the size of the resource class that
//! loads the file. Classes whose footprint depends on the content (models,
//! parameter trees) have no fixed class size; for those a piecewise-linear
//! estimate over the raw length is used as the last resort.
//!
//! A size of `0` means the size is unknown.

use pw_core::{resource_name, Platform};
use pw_formats::compression::{decompress_if_needed, uncompressed_extension};

/// Extensions the size table never tracks.
pub const EXEMPT_EXTENSIONS: &[&str] = &[
    "pack", "bgdata", "txt", "bgsvdata", "yml", "msbt", "bat", "ini", "png", "bfstm", "py", "sh",
];

/// Allocator overhead added to every resource.
fn base_overhead(platform: Platform) -> u32 {
    match platform {
        Platform::WiiU => 0xE4,
        Platform::Switch => 0x168,
    }
}

/// Resource class sizes as `(extension, wiiu, switch)`.
///
/// A class size of zero marks a class whose footprint must be estimated.
const CLASS_SIZES: &[(&str, u32, u32)] = &[
    ("sarc", 0x68, 0xB0),
    ("bfarc", 0x68, 0xB0),
    ("blarc", 0x68, 0xB0),
    ("bactorpack", 0x68, 0xB0),
    ("beventpack", 0x68, 0xB0),
    ("stera", 0x68, 0xB0),
    ("byml", 0x14, 0x20),
    ("bgsvdata", 0x14, 0x20),
    ("mubin", 0x14, 0x20),
    ("bgyml", 0x14, 0x20),
    ("bquestpack", 0x14, 0x20),
    ("bfevfl", 0x20, 0x40),
    ("bfevtm", 0x20, 0x40),
    ("bfsha", 0x24, 0x40),
    ("bfstp", 0x238, 0x3F8),
    ("bflim", 0x16C, 0x240),
    ("bflyt", 0x40, 0x78),
    ("bflan", 0x40, 0x78),
    ("bcamanim", 0x50, 0x68),
    ("baniminfo", 0x30, 0x48),
    ("bxml", 0x0, 0x0),
    ("bgparamlist", 0x0, 0x0),
    ("bdrop", 0x0, 0x0),
    ("bshop", 0x0, 0x0),
    ("brecipe", 0x0, 0x0),
    ("bphysics", 0x0, 0x0),
    ("bas", 0x0, 0x0),
    ("baslist", 0x0, 0x0),
    ("baiprog", 0x0, 0x0),
    ("bmodellist", 0x0, 0x0),
    ("bfres", 0x0, 0x0),
];

/// Piecewise estimates as `(extension, [(upper bound of raw length, multiplier)])`.
///
/// The first bound the raw length does not exceed selects the multiplier; the
/// last entry applies above every bound.
type Pieces = &'static [(u32, f32)];

const WIIU_ESTIMATES: &[(&str, Pieces)] = &[
    (
        "bfres",
        &[
            (500, 7.0),
            (750, 5.0),
            (1250, 4.0),
            (2500, 3.5),
            (50_000, 2.25),
            (100_000, 1.8),
            (800_000, 1.5),
            (2_000_000, 1.25),
            (3_000_000, 1.15),
            (u32::MAX, 1.1),
        ],
    ),
    ("bxml", &[(u32::MAX, 1.5)]),
    ("bgparamlist", &[(u32::MAX, 1.15)]),
    ("bdrop", &[(u32::MAX, 1.4)]),
    ("bshop", &[(u32::MAX, 1.4)]),
    ("brecipe", &[(u32::MAX, 1.4)]),
    ("bphysics", &[(u32::MAX, 1.6)]),
    ("bas", &[(1_000, 2.0), (u32::MAX, 1.5)]),
    ("baslist", &[(u32::MAX, 1.8)]),
    ("baiprog", &[(1_000, 2.4), (u32::MAX, 1.6)]),
    ("bmodellist", &[(u32::MAX, 1.3)]),
];

const SWITCH_ESTIMATES: &[(&str, Pieces)] = &[
    (
        "bfres",
        &[
            (1250, 9.5),
            (2500, 6.0),
            (25_000, 4.0),
            (400_000, 3.5),
            (3_000_000, 2.25),
            (5_000_000, 1.75),
            (u32::MAX, 1.5),
        ],
    ),
    ("bxml", &[(u32::MAX, 2.0)]),
    ("bgparamlist", &[(u32::MAX, 1.5)]),
    ("bdrop", &[(u32::MAX, 1.8)]),
    ("bshop", &[(u32::MAX, 1.8)]),
    ("brecipe", &[(u32::MAX, 1.8)]),
    ("bphysics", &[(u32::MAX, 2.1)]),
    ("bas", &[(1_000, 2.6), (u32::MAX, 2.0)]),
    ("baslist", &[(u32::MAX, 2.3)]),
    ("baiprog", &[(1_000, 3.0), (u32::MAX, 2.1)]),
    ("bmodellist", &[(u32::MAX, 1.7)]),
];

/// Returns `true` if the size table never holds an entry for this file.
pub fn is_exempt(name: &str) -> bool {
    let ext = uncompressed_extension(&resource_name(name));
    EXEMPT_EXTENSIONS.contains(&ext.as_str())
}

/// Predicted size of a file, or `0` if it is exempt or cannot be predicted.
pub fn calculate_size(name: &str, data: &[u8], platform: Platform) -> u32 {
    if is_exempt(name) {
        return 0;
    }
    let ext = uncompressed_extension(&resource_name(name));
    let len = match decompress_if_needed(data) {
        Ok(raw) => raw.len(),
        Err(e) => {
            tracing::debug!("Cannot decompress {} for sizing: {}", name, e);
            return 0;
        }
    };
    let len = u32::try_from(len).unwrap_or(u32::MAX);

    match exact_size(&ext, len, platform) {
        0 => estimate_size(&ext, len, platform),
        size => size,
    }
}

fn exact_size(ext: &str, len: u32, platform: Platform) -> u32 {
    let Some(&(_, wiiu, switch)) = CLASS_SIZES.iter().find(|(e, _, _)| *e == ext) else {
        return 0;
    };
    let class = match platform {
        Platform::WiiU => wiiu,
        Platform::Switch => switch,
    };
    if class == 0 {
        return 0;
    }
    align32(len)
        .saturating_add(base_overhead(platform))
        .saturating_add(class)
}

fn estimate_size(ext: &str, len: u32, platform: Platform) -> u32 {
    let table = match platform {
        Platform::WiiU => WIIU_ESTIMATES,
        Platform::Switch => SWITCH_ESTIMATES,
    };
    let Some((_, pieces)) = table.iter().find(|(e, _)| *e == ext) else {
        return 0;
    };
    let multiplier = pieces
        .iter()
        .find(|(bound, _)| len <= *bound)
        .map(|(_, m)| *m)
        .unwrap_or(1.0);

    let estimate = (f64::from(align32(len)) * f64::from(multiplier)).ceil();
    let estimate = if estimate >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        estimate as u32
    };
    align32(estimate).saturating_add(base_overhead(platform))
}

fn align32(len: u32) -> u32 {
    len.saturating_add(31) & !31
}
