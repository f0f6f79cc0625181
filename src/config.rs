//! Library configuration persistence
//!
//! The tree consumes a read-only snapshot of these settings. Keys keep the
//! names media server users already know from their configuration files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::tree::sorting::SortMethod;

/// ATZ limit used when the configured value is too small to be meaningful
pub const DEFAULT_ATZ_LIMIT: usize = 10000;

/// A named bundle of folders shown as one virtual folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFolderConf {
    /// Display name
    pub name: String,
    /// Real directories merged into this folder
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Nested named bundles, listed before the merged entries
    #[serde(default)]
    pub children: Vec<VirtualFolderConf>,
}

/// Per-directory sort override; the nearest configured ancestor wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortPathRule {
    pub path: PathBuf,
    pub method: u8,
}

/// Library settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Shared folders
    #[serde(default)]
    pub folders: Vec<PathBuf>,
    /// Shared folders that are configured but must not be shown
    #[serde(default)]
    pub folders_ignored: Vec<PathBuf>,
    /// Folders subscribed for filesystem change notifications
    #[serde(default)]
    pub folders_monitored: Vec<PathBuf>,
    /// Directory names that are never listed
    #[serde(default = "default_ignored_names")]
    pub folder_names_ignored: Vec<String>,
    /// Named bundles of folders
    #[serde(default)]
    pub virtual_folders: Vec<VirtualFolderConf>,
    /// Default sort method (0 locale A-Z, 1 newest first, 2 oldest first,
    /// 3 ASCII case-insensitive, 4 natural, 5 random)
    #[serde(default = "default_sort_method")]
    pub sort_method: u8,
    #[serde(default)]
    pub sort_paths: Vec<SortPathRule>,
    /// Entry count above which a folder is split into letter buckets
    #[serde(default = "default_atz_limit")]
    pub atz_limit: usize,
    /// Whether file metadata is memoized in the metadata cache
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default = "default_true")]
    pub hide_empty_folders: bool,
    #[serde(default)]
    pub enable_archive_browsing: bool,
    /// Directory searched for thumbnails before the media file's own folder
    #[serde(default)]
    pub alternate_thumb_folder: Option<PathBuf>,
    #[serde(default)]
    pub disable_subtitles: bool,
    /// Resolve file nodes while their parent is being populated
    #[serde(default = "default_true")]
    pub analyze_on_discovery: bool,
    /// Ignore leading "The " and "A " when sorting and bucketing
    #[serde(default)]
    pub ignore_the_word_a_and_the: bool,
    #[serde(default = "default_true")]
    pub show_media_library_folder: bool,
    /// Path of the WEB.conf file describing web folders
    #[serde(default)]
    pub web_conf: Option<PathBuf>,
    /// Whether anything may be fetched from the network
    #[serde(default = "default_true")]
    pub external_network: bool,
    #[serde(default)]
    pub saved_playlists_folder: Option<PathBuf>,
    /// SQLite metadata cache location (defaults to the data directory)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Rendered thumbnail location (defaults to the cache directory)
    #[serde(default)]
    pub thumbnail_cache_dir: Option<PathBuf>,
}

fn default_ignored_names() -> Vec<String> {
    vec![".unwanted".to_string()]
}

fn default_sort_method() -> u8 {
    SortMethod::Natural.code()
}

fn default_atz_limit() -> usize {
    DEFAULT_ATZ_LIMIT
}

fn default_true() -> bool {
    true
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            folders_ignored: Vec::new(),
            folders_monitored: Vec::new(),
            folder_names_ignored: default_ignored_names(),
            virtual_folders: Vec::new(),
            sort_method: default_sort_method(),
            sort_paths: Vec::new(),
            atz_limit: DEFAULT_ATZ_LIMIT,
            use_cache: true,
            hide_empty_folders: true,
            enable_archive_browsing: false,
            alternate_thumb_folder: None,
            disable_subtitles: false,
            analyze_on_discovery: true,
            ignore_the_word_a_and_the: false,
            show_media_library_folder: true,
            web_conf: None,
            external_network: true,
            saved_playlists_folder: None,
            database_path: None,
            thumbnail_cache_dir: None,
        }
    }
}

impl LibraryConfig {
    /// Effective ATZ limit; values of 2 or less fall back to the default
    pub fn effective_atz_limit(&self) -> usize {
        if self.atz_limit <= 2 {
            DEFAULT_ATZ_LIMIT
        } else {
            self.atz_limit
        }
    }

    /// Sort method for a directory, honoring the nearest configured ancestor
    pub fn sort_method_for(&self, dir: Option<&Path>) -> SortMethod {
        let nearest = dir.and_then(|dir| {
            self.sort_paths
                .iter()
                .filter(|rule| dir.starts_with(&rule.path))
                .max_by_key(|rule| rule.path.components().count())
        });

        match nearest {
            Some(rule) => SortMethod::from_code(rule.method),
            None => SortMethod::from_code(self.sort_method),
        }
    }

    /// Whether a shared folder is on the ignore list
    pub fn is_ignored_path(&self, path: &Path) -> bool {
        self.folders_ignored.iter().any(|ignored| ignored == path)
    }

    /// Whether a directory name is on the ignore list
    pub fn is_ignored_name(&self, name: &str) -> bool {
        self.folder_names_ignored.iter().any(|n| n == name)
    }

    /// Location of the SQLite metadata cache
    pub fn database_file(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| crate::utils::data_dir().join("media.db"))
    }

    /// Location of rendered thumbnails
    pub fn thumbnail_dir(&self) -> PathBuf {
        self.thumbnail_cache_dir
            .clone()
            .unwrap_or_else(|| crate::utils::cache_dir().join("thumbnails"))
    }

    /// Get the configuration file path
    pub fn file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "mediatree", "mediatree")
            .map(|dirs| dirs.config_dir().join("library.json"))
    }

    /// Load configuration from file, or return defaults if not found
    pub fn load() -> Self {
        Self::file_path()
            .and_then(|path| Self::load_from_file(&path).ok())
            .unwrap_or_default()
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(path) = Self::file_path() {
            self.save_to_file(&path)
        } else {
            Err(ConfigError::Io(
                "Could not determine config directory".to_string(),
            ))
        }
    }

    /// Save configuration to a specific file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Errors that can occur with configuration
#[derive(Debug, Clone)]
pub enum ConfigError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: LibraryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.folder_names_ignored, vec![".unwanted".to_string()]);
        assert_eq!(config.atz_limit, DEFAULT_ATZ_LIMIT);
        assert!(config.use_cache);
        assert!(config.hide_empty_folders);
        assert!(!config.enable_archive_browsing);
        assert_eq!(config.sort_method_for(None), SortMethod::Natural);
    }

    #[test]
    fn test_small_atz_limit_falls_back() {
        let config = LibraryConfig {
            atz_limit: 2,
            ..Default::default()
        };
        assert_eq!(config.effective_atz_limit(), DEFAULT_ATZ_LIMIT);

        let config = LibraryConfig {
            atz_limit: 3,
            ..Default::default()
        };
        assert_eq!(config.effective_atz_limit(), 3);
    }

    #[test]
    fn test_nearest_sort_rule_wins() {
        let config = LibraryConfig {
            sort_method: 0,
            sort_paths: vec![
                SortPathRule {
                    path: PathBuf::from("/media"),
                    method: 1,
                },
                SortPathRule {
                    path: PathBuf::from("/media/podcasts"),
                    method: 2,
                },
            ],
            ..Default::default()
        };

        assert_eq!(
            config.sort_method_for(Some(Path::new("/media/podcasts/show"))),
            SortMethod::OldestFirst
        );
        assert_eq!(
            config.sort_method_for(Some(Path::new("/media/music"))),
            SortMethod::NewestFirst
        );
        assert_eq!(
            config.sort_method_for(Some(Path::new("/other"))),
            SortMethod::LocaleAlpha
        );
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("library.json");
        let config = LibraryConfig {
            folders: vec![PathBuf::from("/srv/media")],
            virtual_folders: vec![VirtualFolderConf {
                name: "Kids".to_string(),
                files: vec![PathBuf::from("/srv/cartoons")],
                children: Vec::new(),
            }],
            ..Default::default()
        };

        config.save_to_file(&path).unwrap();
        let loaded = LibraryConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.folders, config.folders);
        assert_eq!(loaded.virtual_folders, config.virtual_folders);
    }

    #[test]
    fn test_load_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            LibraryConfig::load_from_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
