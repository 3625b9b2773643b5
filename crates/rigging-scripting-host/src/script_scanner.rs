//! Script file discovery and change detection for hot reloading
//!
//! Both the manager and the scanner walk pack directories the same way, so
//! a file that is loaded is also a file that is watched.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Default scan interval (1000ms = 1Hz)
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(1000);

/// Every file under `dir` with the given extension, recursively, sorted by path
///
/// Symlinked directories are not followed. A missing directory yields no
/// files. Unreadable entries are logged and skipped.
pub fn find_script_files(dir: &Path, extension: &str) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        match entry {
            Ok(e) => {
                if !e.file_type().is_dir()
                    && e.path().extension().and_then(|s| s.to_str()) == Some(extension)
                {
                    files.push(e.into_path());
                }
            }
            Err(err) => {
                warn!(
                    target: "scripting",
                    "Failed to read script directory {}: {}",
                    dir.display(),
                    err
                );
            }
        }
    }

    files.sort();
    files
}

/// Result of scanning for script changes
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Scripts that were modified (path and new modification time)
    pub changed: Vec<(PathBuf, SystemTime)>,
    /// Scripts that appeared since the last scan
    pub added: Vec<PathBuf>,
    /// Scripts that disappeared since the last scan
    pub removed: Vec<PathBuf>,
}

impl ScanResult {
    /// Returns true if there are any changes detected
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Polls a set of pack roots for added, changed, and removed script files
pub struct ScriptScanner {
    roots: Vec<PathBuf>,
    extension: String,
    scan_interval: Duration,
    last_scan: Option<Instant>,
    cached_state: HashMap<PathBuf, SystemTime>,
}

impl ScriptScanner {
    pub fn new(roots: Vec<PathBuf>, extension: impl Into<String>) -> Self {
        Self::with_interval(roots, extension, DEFAULT_SCAN_INTERVAL)
    }

    /// Files present at creation are not reported as added
    pub fn with_interval(
        roots: Vec<PathBuf>,
        extension: impl Into<String>,
        scan_interval: Duration,
    ) -> Self {
        let extension = extension.into();
        let cached_state = Self::snapshot(&roots, &extension);

        Self {
            roots,
            extension,
            scan_interval,
            last_scan: None,
            cached_state,
        }
    }

    /// Check if enough time has elapsed since the last scan
    pub fn should_scan(&self) -> bool {
        match self.last_scan {
            Some(last) => last.elapsed() >= self.scan_interval,
            None => true,
        }
    }

    /// Compare the roots against the previous scan and update the cache
    pub fn scan_changes(&mut self) -> ScanResult {
        self.last_scan = Some(Instant::now());

        let current_state = Self::snapshot(&self.roots, &self.extension);
        let mut result = ScanResult::default();

        for (path, modified_time) in &current_state {
            match self.cached_state.get(path) {
                Some(cached_time) if cached_time != modified_time => {
                    debug!(target: "scripting", "Script changed: {}", path.display());
                    result.changed.push((path.clone(), *modified_time));
                }
                Some(_) => {}
                None => {
                    debug!(target: "scripting", "Script added: {}", path.display());
                    result.added.push(path.clone());
                }
            }
        }

        for path in self.cached_state.keys() {
            if !current_state.contains_key(path) {
                debug!(target: "scripting", "Script removed: {}", path.display());
                result.removed.push(path.clone());
            }
        }

        result.changed.sort();
        result.added.sort();
        result.removed.sort();

        self.cached_state = current_state;
        result
    }

    /// Number of files seen by the last scan
    pub fn tracked_files(&self) -> usize {
        self.cached_state.len()
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    pub fn set_scan_interval(&mut self, interval: Duration) {
        self.scan_interval = interval;
    }

    fn snapshot(roots: &[PathBuf], extension: &str) -> HashMap<PathBuf, SystemTime> {
        let mut scripts = HashMap::new();

        for root in roots {
            for path in find_script_files(root, extension) {
                match fs::metadata(&path).and_then(|metadata| metadata.modified()) {
                    Ok(modified_time) => {
                        scripts.insert(path, modified_time);
                    }
                    Err(e) => {
                        warn!(
                            target: "scripting",
                            "Failed to get modification time for {}: {}",
                            path.display(),
                            e
                        );
                    }
                }
            }
        }

        scripts
    }
}
