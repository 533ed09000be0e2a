use camino::Utf8PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid library index: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Merge(#[from] pw_merge::Error),

    #[error(transparent)]
    Project(#[from] pw_mod_project::Error),

    #[error(transparent)]
    Settings(#[from] pw_core::Error),

    #[error("Mod directory not found: {0}")]
    InvalidSource(Utf8PathBuf),

    #[error("Mod '{0}' is already installed")]
    AlreadyInstalled(String),

    #[error("Mod '{0}' is not installed")]
    NotInstalled(String),

    #[error("Mod '{id}' depends on '{dependency}', which is not installed")]
    MissingDependency { id: String, dependency: String },

    #[error("Mod '{id}' is required by {dependents:?}")]
    HasDependents { id: String, dependents: Vec<String> },

    #[error("Priority {priority} is already used by '{holder}'")]
    PriorityTaken { priority: i32, holder: String },

    #[error("Library at {0} is in use by another process")]
    Locked(Utf8PathBuf),
}
