//! Client Configuration
//!
//! JSON config file kept in the app data directory. Missing fields fall back
//! to defaults, so an empty object is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::sync::SyncSettings;

pub const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend collection holding todo records
    pub todo_collection: String,
    /// Change topic to subscribe to ("*" = every record in the collection)
    pub topic: String,
    /// Records requested per page during a refresh
    pub page_size: u32,
    /// Directory for the session file and logs
    pub data_dir: PathBuf,
    /// Used for the log file name
    pub app_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            todo_collection: "todos".to_string(),
            topic: "*".to_string(),
            page_size: 50,
            data_dir: PathBuf::from("."),
            app_name: "todo-sync".to_string(),
        }
    }
}

impl ClientConfig {
    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: ClientConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`ClientConfig::load`], but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.todo_collection.trim().is_empty() {
            return Err(ConfigError::Invalid("todo_collection is empty".to_string()));
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("topic is empty".to_string()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            collection: self.todo_collection.clone(),
            topic: self.topic.clone(),
            page_size: self.page_size,
        }
    }
}
