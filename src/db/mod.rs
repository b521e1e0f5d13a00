pub mod tasks;

use std::path::{Path, PathBuf};

pub const DEFAULT_DB_PATH: &str = "var/picture-ai/tasks.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub task_db_path: PathBuf,
}

impl DbConfig {
    pub fn new(task_db_path: impl Into<PathBuf>) -> Self {
        Self {
            task_db_path: task_db_path.into(),
        }
    }
}

/// Relative paths resolve against `app_root`; blank input selects the default.
pub fn select_db_config(sqlite_path: Option<&str>, app_root: &Path) -> DbConfig {
    let raw = sqlite_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_DB_PATH);
    let candidate = PathBuf::from(raw);
    if candidate.is_absolute() {
        DbConfig::new(candidate)
    } else {
        DbConfig::new(app_root.join(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_default_under_app_root() {
        let cfg = select_db_config(None, Path::new("/tmp/app"));
        assert_eq!(
            cfg.task_db_path,
            PathBuf::from("/tmp/app/var/picture-ai/tasks.db")
        );
        let blank = select_db_config(Some("  "), Path::new("/tmp/app"));
        assert_eq!(blank, cfg);
    }

    #[test]
    fn absolute_path_is_kept() {
        let cfg = select_db_config(Some("/data/tasks.db"), Path::new("/tmp/app"));
        assert_eq!(cfg.task_db_path, PathBuf::from("/data/tasks.db"));
    }
}
