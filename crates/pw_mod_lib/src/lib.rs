//! Mod library management for packweave.
//!
//! A store directory holds everything the library owns:
//!
//! ```text
//! <store>/
//!   library.json      installed mods, priorities and enabled options
//!   mods/<id>/        each installed mod, with its diff logs
//!   master/           the merged output layer
//! ```
//!
//! [`ModLibrary`] installs, removes and reorders mods and keeps the master
//! layer in sync by re-merging the formats each change affects.

pub mod error;
pub mod index;
mod library;

pub use error::{Error, Result};
pub use index::{LibraryIndex, LibraryModEntry};
pub use library::{InstallOptions, InstallResult, InstalledMod, ModLibrary};
