//! Database configuration, read from `beatmap-core.toml`.

use crate::database::score::ScoreSortMethod;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Newest osu!.db version known to parse correctly.
pub const STABLE_VERSION_CAP: u32 = 20261231;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

fn default_osu_folder() -> PathBuf {
    PathBuf::from("osu!")
}
fn default_songs_folder() -> PathBuf {
    PathBuf::from("Songs")
}
fn default_data_folder() -> PathBuf {
    PathBuf::from("data")
}
fn default_true() -> bool {
    true
}
fn default_version_cap() -> u32 {
    STABLE_VERSION_CAP
}
fn default_player() -> String {
    "Guest".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// osu!stable installation holding `osu!.db`, `scores.db` and
    /// `collection.db`.
    #[serde(default = "default_osu_folder")]
    pub osu_folder: PathBuf,

    /// Beatmap folders. Relative paths are resolved against `osu_folder`.
    #[serde(default = "default_songs_folder")]
    pub songs_folder: PathBuf,

    /// Where this client keeps its own dumps.
    #[serde(default = "default_data_folder")]
    pub data_folder: PathBuf,

    #[serde(default = "default_true")]
    pub stable_dump_enabled: bool,

    /// McOsu (or early neosu) installation whose `scores.db` and
    /// `collections.db` are imported on a full load.
    #[serde(default)]
    pub mcosu_folder: Option<PathBuf>,

    /// Parse osu!.db even when its version is newer than `stable_version_cap`.
    #[serde(default)]
    pub ignore_stable_version: bool,

    #[serde(default = "default_version_cap")]
    pub stable_version_cap: u32,

    /// Count relax and autopilot scores in player stats.
    #[serde(default)]
    pub include_relax_autopilot: bool,

    #[serde(default = "default_true")]
    pub bonus_pp: bool,

    #[serde(default = "default_player")]
    pub local_player: String,

    #[serde(default)]
    pub sort_method: ScoreSortMethod,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            osu_folder: default_osu_folder(),
            songs_folder: default_songs_folder(),
            data_folder: default_data_folder(),
            stable_dump_enabled: true,
            mcosu_folder: None,
            ignore_stable_version: false,
            stable_version_cap: STABLE_VERSION_CAP,
            include_relax_autopilot: false,
            bonus_pp: true,
            local_player: default_player(),
            sort_method: ScoreSortMethod::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(source) => {
                log::error!("CONFIG: Failed to parse TOML file {:?}: {}", path, source);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }

    /// Defaults when the file does not exist; still an error when it exists
    /// but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("CONFIG: {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn songs_path(&self) -> PathBuf {
        if self.songs_folder.is_absolute() {
            self.songs_folder.clone()
        } else {
            self.osu_folder.join(&self.songs_folder)
        }
    }

    pub fn stable_version_cap(&self) -> Option<u32> {
        if self.ignore_stable_version {
            None
        } else {
            Some(self.stable_version_cap)
        }
    }

    pub fn stable_maps_path(&self) -> PathBuf {
        self.osu_folder.join("osu!.db")
    }

    pub fn stable_scores_path(&self) -> PathBuf {
        self.osu_folder.join("scores.db")
    }

    pub fn stable_collections_path(&self) -> PathBuf {
        self.osu_folder.join("collection.db")
    }

    pub fn mcosu_scores_path(&self) -> Option<PathBuf> {
        self.mcosu_folder.as_ref().map(|folder| folder.join("scores.db"))
    }

    pub fn mcosu_collections_path(&self) -> Option<PathBuf> {
        self.mcosu_folder.as_ref().map(|folder| folder.join("collections.db"))
    }

    pub fn local_maps_path(&self) -> PathBuf {
        self.data_folder.join("maps.db")
    }

    pub fn local_scores_path(&self) -> PathBuf {
        self.data_folder.join("scores.db")
    }

    pub fn local_collections_path(&self) -> PathBuf {
        self.data_folder.join("collections.db")
    }

    pub fn stars_cache_path(&self) -> PathBuf {
        self.data_folder.join("stars.cache")
    }

    /// Everything under one root, for tests and portable installs.
    pub fn rooted(root: &Path) -> Self {
        Self {
            osu_folder: root.join("osu"),
            songs_folder: PathBuf::from("Songs"),
            data_folder: root.join("data"),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: DatabaseConfig = toml::from_str(
            r#"
            osu_folder = "/games/osu"
            sort_method = "pp"
            "#,
        )
        .unwrap();
        assert_eq!(config.osu_folder, PathBuf::from("/games/osu"));
        assert_eq!(config.sort_method, ScoreSortMethod::Pp);
        assert!(config.stable_dump_enabled);
        assert_eq!(config.songs_path(), PathBuf::from("/games/osu/Songs"));
        assert_eq!(config.stable_version_cap(), Some(STABLE_VERSION_CAP));
        assert_eq!(config.mcosu_scores_path(), None);
    }

    #[test]
    fn mcosu_folder_paths() {
        let config: DatabaseConfig = toml::from_str(r#"mcosu_folder = "/games/mcosu""#).unwrap();
        assert_eq!(config.mcosu_scores_path(), Some(PathBuf::from("/games/mcosu/scores.db")));
        assert_eq!(
            config.mcosu_collections_path(),
            Some(PathBuf::from("/games/mcosu/collections.db"))
        );
    }

    #[test]
    fn absolute_songs_folder_is_kept() {
        let config = DatabaseConfig {
            songs_folder: PathBuf::from("/mnt/songs"),
            ..DatabaseConfig::default()
        };
        assert_eq!(config.songs_path(), PathBuf::from("/mnt/songs"));
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beatmap-core.toml");
        fs::write(&path, "bonus_pp = \"maybe\"").unwrap();
        assert!(matches!(DatabaseConfig::load(&path), Err(ConfigError::Parse { .. })));

        let missing = dir.path().join("nope.toml");
        assert_eq!(DatabaseConfig::load_or_default(&missing).unwrap(), DatabaseConfig::default());
        assert!(matches!(DatabaseConfig::load(&missing), Err(ConfigError::Io { .. })));
    }
}
