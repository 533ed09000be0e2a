//! Location and persistence of `config.toml`.

use crate::errors::CliError;
use camino::{Utf8Path, Utf8PathBuf};
use pw_core::Settings;
use std::env;

pub const CONFIG_FILE: &str = "config.toml";

/// Returns the directory where the current executable resides.
pub fn install_dir() -> Option<Utf8PathBuf> {
    let exe = env::current_exe().ok()?;
    let parent = exe.parent()?;
    Utf8PathBuf::from_path_buf(parent.to_path_buf()).ok()
}

/// The config file to use: `explicit` if given, otherwise `config.toml` next
/// to the executable.
pub fn resolve_config_path(explicit: Option<&Utf8Path>) -> Result<Utf8PathBuf, CliError> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => install_dir()
            .map(|dir| dir.join(CONFIG_FILE))
            .ok_or(CliError::NoConfigLocation),
    }
}

pub fn load_settings(path: &Utf8Path) -> Result<Settings, CliError> {
    if !path.as_std_path().exists() {
        return Err(CliError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    Settings::load(path).map_err(|source| CliError::ConfigParseError { source })
}

/// Settings at `path`, or defaults if the file does not exist yet.
pub fn load_or_default(path: &Utf8Path) -> Result<Settings, CliError> {
    if path.as_std_path().exists() {
        load_settings(path)
    } else {
        Ok(Settings::default())
    }
}

pub fn save_settings(path: &Utf8Path, settings: &Settings) -> Result<(), CliError> {
    settings
        .save(path)
        .map_err(|source| CliError::ConfigParseError { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config() {
        let temp = TempDir::new().unwrap();
        let path = Utf8Path::from_path(temp.path()).unwrap().join(CONFIG_FILE);
        assert!(matches!(
            load_settings(&path),
            Err(CliError::ConfigNotFound { .. })
        ));
        assert_eq!(load_or_default(&path).unwrap(), Settings::default());
    }

    #[test]
    fn test_round_trip() {
        let temp = TempDir::new().unwrap();
        let root = Utf8Path::from_path(temp.path()).unwrap();
        let path = root.join(CONFIG_FILE);
        let settings = Settings {
            game_dir: root.join("game"),
            store_dir: root.join("store"),
            ..Default::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path).unwrap(), settings);
    }

    #[test]
    fn test_explicit_path_wins() {
        let explicit = Utf8Path::new("/tmp/custom.toml");
        assert_eq!(resolve_config_path(Some(explicit)).unwrap(), explicit);
    }
}
