pub mod config;
pub mod db;
pub mod error;
pub mod remote;
pub mod storage;
pub mod tasks;
pub mod upload;

use std::path::PathBuf;

/// Root that relative config, database and storage paths resolve against.
pub fn default_app_root() -> PathBuf {
    std::env::var("PICTURE_AI_APP_ROOT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}
