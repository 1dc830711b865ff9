use config::{Config, ConfigError, Environment, File as ConfigFile};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::error;

pub const DEFAULT_DATABASE_PATH: &str = "disk_catalog.db";
pub const DEFAULT_TIMESTAMP_TOLERANCE_MS: i64 = 1000;
pub const DEFAULT_MIN_HASH_SIZE: u64 = 1024 * 1024;

/// Settings key under which the persisted `IndexSettings` live.
pub const INDEX_SETTINGS_KEY: &str = "index_settings";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    pub excluded_dirs: Vec<String>,
    pub excluded_extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub duplicate_detection_enabled: bool,
    pub min_hash_size: u64,
    pub timestamp_tolerance_ms: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let defaults = IndexSettings::default();
        Self {
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            excluded_dirs: defaults.excluded_dirs,
            excluded_extensions: defaults.excluded_extensions,
            ignore_patterns: defaults.ignore_patterns,
            duplicate_detection_enabled: defaults.duplicate_detection_enabled,
            min_hash_size: defaults.min_hash_size,
            timestamp_tolerance_ms: defaults.timestamp_tolerance_ms,
        }
    }
}

impl AppConfig {
    /// Settings a fresh catalog starts with before anything is persisted.
    pub fn index_settings(&self) -> IndexSettings {
        IndexSettings {
            excluded_dirs: self.excluded_dirs.clone(),
            excluded_extensions: self.excluded_extensions.clone(),
            ignore_patterns: self.ignore_patterns.clone(),
            duplicate_detection_enabled: self.duplicate_detection_enabled,
            min_hash_size: self.min_hash_size,
            timestamp_tolerance_ms: self.timestamp_tolerance_ms,
        }
    }
}

/// Load `Config.{toml,json,...}` if present, overlaid with `DISK_CATALOG_*` env vars.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("DISK_CATALOG")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("excluded_dirs")
                .with_list_parse_key("excluded_extensions")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Exclusion and threshold settings consumed by a scan.
///
/// A scan clones these at start and never observes later edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub excluded_dirs: Vec<String>,
    pub excluded_extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub duplicate_detection_enabled: bool,
    pub min_hash_size: u64,
    pub timestamp_tolerance_ms: i64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            excluded_dirs: [
                ".Spotlight-V100",
                ".fseventsd",
                ".Trashes",
                ".TemporaryItems",
                "$RECYCLE.BIN",
                "System Volume Information",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            excluded_extensions: Vec::new(),
            ignore_patterns: Vec::new(),
            duplicate_detection_enabled: true,
            min_hash_size: DEFAULT_MIN_HASH_SIZE,
            timestamp_tolerance_ms: DEFAULT_TIMESTAMP_TOLERANCE_MS,
        }
    }
}

impl IndexSettings {
    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.excluded_dirs.iter().any(|d| d == name)
    }

    pub fn is_excluded_extension(&self, extension: &str) -> bool {
        self.excluded_extensions
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }

    /// Compile the glob ignore patterns, logging and dropping invalid ones.
    pub fn compiled_ignore_patterns(&self) -> Vec<Pattern> {
        self.ignore_patterns
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_match_ignores_case_and_dot() {
        let settings = IndexSettings {
            excluded_extensions: vec![".TMP".to_string(), "part".to_string()],
            ..IndexSettings::default()
        };
        assert!(settings.is_excluded_extension("tmp"));
        assert!(settings.is_excluded_extension("PART"));
        assert!(!settings.is_excluded_extension("txt"));
    }

    #[test]
    fn test_default_dirs_cover_system_folders() {
        let settings = IndexSettings::default();
        assert!(settings.is_excluded_dir(".Spotlight-V100"));
        assert!(!settings.is_excluded_dir("Photos"));
        assert_eq!(settings.timestamp_tolerance_ms, 1000);
    }

    #[test]
    fn test_invalid_glob_is_dropped() {
        let settings = IndexSettings {
            ignore_patterns: vec!["**/*.bak".to_string(), "[".to_string()],
            ..IndexSettings::default()
        };
        assert_eq!(settings.compiled_ignore_patterns().len(), 1);
    }

    #[test]
    fn test_app_config_feeds_index_settings() {
        let config = AppConfig {
            min_hash_size: 42,
            ..AppConfig::default()
        };
        assert_eq!(config.index_settings().min_hash_size, 42);
        assert_eq!(config.database_path, DEFAULT_DATABASE_PATH);
    }
}
