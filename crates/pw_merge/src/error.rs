//! Error types for diff and merge operations.
//!
//! All fallible functions in this crate return [`Result<T>`]. The variants
//! follow how the pipeline reacts to a failure:
//!
//! - [`NotFound`](Error::NotFound): no baseline counterpart, treat the file as new
//! - [`CorruptArchive`](Error::CorruptArchive): skip that subtree with a warning
//! - [`FormatMismatch`](Error::FormatMismatch): the file's merge fails, siblings continue
//! - [`Consistency`](Error::Consistency): logged, offending item skipped
//! - [`Configuration`](Error::Configuration): fatal before any batch work starts
//!
//! See [`Error::is_fatal`] for which errors abort a whole batch.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem I/O failed (reading mods, writing the master layer, etc.).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse or serialize JSON (logs, merge state).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to read or write the size-table CSV log.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// A byte payload could not be decoded or encoded.
    #[error("Format error: {0}")]
    Format(#[from] pw_formats::Error),

    /// A mod's `info.json` is missing or malformed.
    #[error("Invalid mod descriptor: {0}")]
    Project(#[from] pw_mod_project::Error),

    #[error("{0}")]
    Core(pw_core::Error),

    /// A canonical file has no baseline counterpart.
    #[error("Baseline file not found: {0}")]
    NotFound(String),

    /// A container archive failed to parse.
    #[error("Corrupt archive '{name}': {reason}")]
    CorruptArchive { name: String, reason: String },

    /// Bytes expected to be one structured format are something else.
    #[error("Format mismatch in '{name}': {reason}")]
    FormatMismatch { name: String, reason: String },

    /// Diffs disagree with the baseline they were made against.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// The game dump cannot be used as configured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A mod directory is missing or inaccessible.
    #[error("Invalid mod directory: {0}")]
    InvalidModDir(Utf8PathBuf),

    /// Every item of a parallel batch failed.
    #[error("All {count} items of the batch failed, first: {first}")]
    BatchFailed { count: usize, first: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns `true` for errors that must abort the whole batch.
    ///
    /// A partially written master layer is unsafe to keep, so configuration
    /// problems and I/O failures stop every remaining item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::Io(_) | Error::BatchFailed { .. }
        )
    }

    pub fn corrupt_archive(name: impl Into<String>, reason: impl ToString) -> Self {
        Error::CorruptArchive {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn format_mismatch(name: impl Into<String>, reason: impl ToString) -> Self {
        Error::FormatMismatch {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<pw_core::Error> for Error {
    fn from(e: pw_core::Error) -> Self {
        match e {
            pw_core::Error::NotFound(name) => Error::NotFound(name),
            pw_core::Error::Configuration(msg) => Error::Configuration(msg),
            pw_core::Error::Io(e) => Error::Io(e),
            other => Error::Core(other),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
