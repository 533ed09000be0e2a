//! Baseline game dump layout.
//!
//! The unmodified game is split across three independently queryable trees:
//! the base game, an update overlay and the add-on content. A canonical name
//! resolves to the first tree holding it, in the order update, base, add-on.
//! Canonical names carrying the [`AOC_PREFIX`] only ever resolve against the
//! add-on tree.

use crate::canonical::{top_level, AOC_PREFIX};
use crate::error::{Error, Result};
use crate::settings::Platform;
use camino::{Utf8Path, Utf8PathBuf};

/// A tree of the game dump and the canonical prefix of its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpLayer {
    pub root: Utf8PathBuf,
    pub prefix: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLayout {
    game_dir: Utf8PathBuf,
    update_dir: Option<Utf8PathBuf>,
    dlc_dir: Option<Utf8PathBuf>,
    platform: Platform,
}

impl GameLayout {
    pub fn new(
        game_dir: Utf8PathBuf,
        update_dir: Option<Utf8PathBuf>,
        dlc_dir: Option<Utf8PathBuf>,
        platform: Platform,
    ) -> Self {
        Self {
            game_dir,
            update_dir,
            dlc_dir,
            platform,
        }
    }

    pub fn game_dir(&self) -> &Utf8Path {
        &self.game_dir
    }

    pub fn update_dir(&self) -> Option<&Utf8Path> {
        self.update_dir.as_deref()
    }

    pub fn dlc_dir(&self) -> Option<&Utf8Path> {
        self.dlc_dir.as_deref()
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Locate the baseline copy of the top-level file of `name`.
    ///
    /// Nested names resolve to their outermost container.
    pub fn locate_baseline(&self, name: &str) -> Result<Utf8PathBuf> {
        let top = top_level(name);

        if let Some(rest) = top.strip_prefix(AOC_PREFIX) {
            return self
                .dlc_dir
                .as_ref()
                .map(|dir| dir.join(rest))
                .filter(|path| path.as_std_path().is_file())
                .ok_or_else(|| Error::NotFound(top.to_string()));
        }

        let candidates = [
            self.update_dir.as_deref(),
            Some(self.game_dir.as_path()),
            self.dlc_dir.as_deref(),
        ];
        candidates
            .into_iter()
            .flatten()
            .map(|dir| dir.join(top))
            .find(|path| path.as_std_path().is_file())
            .ok_or_else(|| Error::NotFound(top.to_string()))
    }

    /// Every tree of the dump in the order their hashes should be recorded.
    ///
    /// The update tree comes after the base game so that both versions of a
    /// patched file are known.
    pub fn layers(&self) -> Vec<DumpLayer> {
        let mut layers = vec![DumpLayer {
            root: self.game_dir.clone(),
            prefix: "",
        }];
        if let Some(dlc) = &self.dlc_dir {
            layers.push(DumpLayer {
                root: dlc.clone(),
                prefix: AOC_PREFIX,
            });
        }
        if let Some(update) = &self.update_dir {
            layers.push(DumpLayer {
                root: update.clone(),
                prefix: "",
            });
        }
        layers
    }
}
