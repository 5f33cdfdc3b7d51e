/// Configuration for the history log.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "UNDOLOG_DATA_DIR";

/// File name of the log database inside the data directory.
const DEFAULT_DATABASE_FILE: &str = "history.redb";

/// Configuration for the history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Root directory for the log database.
    pub data_dir: PathBuf,
    /// Database file name, relative to `data_dir`.
    pub database_file: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            data_dir: resolve_data_dir(),
            database_file: DEFAULT_DATABASE_FILE.to_string(),
        }
    }
}

impl HistoryConfig {
    /// Config rooted at `data_dir` with the default database file name.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database_file: DEFAULT_DATABASE_FILE.to_string(),
        }
    }

    /// Full path of the log database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Loads config from a JSON file at `path`.
    /// Returns defaults if the file is missing or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<HistoryConfig>(&contents) {
                Ok(mut config) => {
                    if config.database_file.trim().is_empty() {
                        config.database_file = DEFAULT_DATABASE_FILE.to_string();
                    }
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config at {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Saves config to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Resolves the data directory path.
///
/// Resolution order:
/// 1. `UNDOLOG_DATA_DIR` environment variable
/// 2. `undolog/` under the platform's local data directory
/// 3. `.data/` in the working directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .map(|d| d.join("undolog"))
        .unwrap_or_else(|| PathBuf::from(".data"))
}
