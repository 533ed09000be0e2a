//! Core shared logic for packweave.
//!
//! This crate provides the pieces every other packweave crate agrees on:
//!
//! - [`Settings`]: where the game dump lives, the target [`Platform`] and the mod store
//! - [`canonical`]: mapping on-disk mod paths to canonical game file names
//! - [`GameLayout`]: locating the unmodified baseline copy of a canonical file

pub mod canonical;
mod error;
mod layout;
mod settings;

pub use canonical::{
    canonicalize, join_nested, leaf_name, parent, physical_path, resource_name, split_nested,
    top_level, AOC_PREFIX, NESTED_SEPARATOR,
};
pub use error::{Error, Result};
pub use layout::{DumpLayer, GameLayout};
pub use settings::{Platform, Settings};
