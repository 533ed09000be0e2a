use camino::Utf8PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// The game dump cannot be used as configured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No layer of the game dump holds the requested file.
    #[error("Baseline file not found: {0}")]
    NotFound(String),

    #[error("Settings file not found: {0}")]
    SettingsNotFound(Utf8PathBuf),
}
