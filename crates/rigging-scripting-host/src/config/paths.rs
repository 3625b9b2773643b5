use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Application name used for every platform directory
pub const APP_NAME: &str = "rigging";

/// Platform-specific config, data and cache directories
///
/// Follows the XDG base directory layout on Linux, `Library/Application Support`
/// on macOS and `%APPDATA%` on Windows.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    dirs: ProjectDirs,
}

impl ProjectPaths {
    /// Returns `None` when no home directory can be determined
    pub fn new(name: &str) -> Option<Self> {
        ProjectDirs::from("", "", name).map(|dirs| Self { dirs })
    }

    pub fn config_dir(&self) -> &Path {
        self.dirs.config_dir()
    }

    pub fn data_dir(&self) -> &Path {
        self.dirs.data_dir()
    }

    pub fn cache_dir(&self) -> &Path {
        self.dirs.cache_dir()
    }
}

/// Data directory for the application, or `fallback` relative to the working directory
pub fn data_dir_or(fallback: &str) -> PathBuf {
    ProjectPaths::new(APP_NAME)
        .map(|paths| paths.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(fallback))
}
