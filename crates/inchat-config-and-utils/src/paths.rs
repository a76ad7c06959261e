//! File system paths for InChat.

use crate::{CoreError, CoreResult};
use std::path::{Path, PathBuf};

/// Manages file system paths under one base directory.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.inchat)
    base_dir: PathBuf,
}

impl Paths {
    /// Uses `~/.inchat`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".inchat"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the config file path (~/.inchat/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the database file path (~/.inchat/inchat.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("inchat.sqlite")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path (~/.inchat/logs/inchat.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("inchat.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_with_base_dir() {
        let paths = Paths::with_base_dir(PathBuf::from("/tmp/inchat-test"));

        assert_eq!(paths.base_dir(), Path::new("/tmp/inchat-test"));
        assert_eq!(
            paths.config_file(),
            PathBuf::from("/tmp/inchat-test/config.json")
        );
        assert_eq!(
            paths.database_file(),
            PathBuf::from("/tmp/inchat-test/inchat.sqlite")
        );
        assert_eq!(
            paths.log_file(),
            PathBuf::from("/tmp/inchat-test/logs/inchat.jsonl")
        );
    }

    #[test]
    fn test_ensure_dirs_creates_logs_dir() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("nested"));

        paths.ensure_dirs().unwrap();
        assert!(paths.logs_dir().is_dir());
    }

    #[test]
    fn test_new_is_under_home() {
        if let (Ok(paths), Some(home)) = (Paths::new(), dirs::home_dir()) {
            assert_eq!(paths.base_dir(), home.join(".inchat"));
        }
    }
}
