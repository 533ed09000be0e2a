//! Diff and merge engine for packweave mods.
//!
//! Mods are diffed once, when they are installed, against the unmodified game
//! dump (the baseline). Each format's diff is persisted as a log inside the
//! mod. Merging reads every installed mod's logs back, layers them by
//! priority and writes the result into the master layer, a directory the game
//! loads as its highest-priority mod.
//!
//! - **Modification detection**: content hashes of every baseline file and
//!   nested container member ([`BaselineHashTable`])
//! - **Per-format mergers**: container archives, game and save data tables,
//!   parameter trees, map placements and the resource size table
//!   ([`mergers`])
//! - **Staged output**: merges are built next to the master layer and swapped
//!   in only when they did not hit a fatal error
//! - **Reuse**: a full merge with unchanged inputs keeps the existing master
//!
//! # Example
//!
//! ```no_run
//! use camino::Utf8Path;
//! use pw_core::Settings;
//! use pw_merge::{Baseline, MergeEngine, ModRecord};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load(Utf8Path::new("config.toml"))?;
//! let baseline = Arc::new(Baseline::new(
//!     settings.layout(),
//!     Some(settings.hash_table_cache_path()),
//! ));
//! let engine = MergeEngine::new(baseline, settings.store_dir.join("master"))
//!     .with_progress(|p| println!("{:?} {}/{}", p.stage, p.current, p.total));
//!
//! let mod_root = settings.store_dir.join("mods/my-mod");
//! let processed = engine.process_mod(&mod_root, &[])?;
//! let record = ModRecord {
//!     id: "my-mod".into(),
//!     name: "My Mod".into(),
//!     priority: 100,
//!     path: mod_root,
//!     options: Vec::new(),
//!     formats: processed.formats,
//! };
//! let result = engine.merge_all(&[record])?;
//! println!("Wrote {} files", result.files_written.len());
//! # Ok(())
//! # }
//! ```

pub mod baseline;
pub mod detector;
pub mod error;
pub mod hashtable;
pub mod logs;
pub mod mergers;
pub mod pipeline;
pub mod pool;
pub mod state;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use baseline::Baseline;
pub use detector::{Detector, ModifiedFile, ScanResult};
pub use error::{Error, Result};
pub use hashtable::BaselineHashTable;
pub use mergers::{Format, ModFlags};
pub use pipeline::{
    MergeEngine, MergeOutcome, MergeProgress, MergeResult, MergeStage, ModRecord, ProcessResult,
};
pub use pool::ItemFailure;
pub use state::MergeState;
