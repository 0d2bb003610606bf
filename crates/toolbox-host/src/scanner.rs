//! Descriptor tree change detection for hot reloading
//!
//! Polls every configured category directory and reports descriptor files
//! that were added, modified or removed since the previous scan.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::loader::is_module;

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(1000);

/// Last known state of one descriptor file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: SystemTime,
    len: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Modified files with their new modification time
    pub changed: Vec<(PathBuf, SystemTime)>,
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl ScanResult {
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || !self.added.is_empty() || !self.removed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.changed.len() + self.added.len() + self.removed.len()
    }
}

/// Polling scanner over a set of descriptor directories
///
/// Files present when the scanner is created form the baseline, so they are
/// not reported as added by the first scan.
#[derive(Debug)]
pub struct TreeScanner {
    roots: Vec<PathBuf>,
    scan_interval: Duration,
    last_scan: Option<Instant>,
    state: BTreeMap<PathBuf, Stamp>,
}

impl TreeScanner {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self::with_interval(roots, DEFAULT_SCAN_INTERVAL)
    }

    pub fn with_interval(roots: Vec<PathBuf>, scan_interval: Duration) -> Self {
        let state = collect(&roots);
        Self {
            roots,
            scan_interval,
            last_scan: None,
            state,
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    /// Number of descriptor files currently tracked
    pub fn tracked(&self) -> usize {
        self.state.len()
    }

    /// Whether the scan interval has elapsed since the last scan
    pub fn should_scan(&self) -> bool {
        self.last_scan
            .is_none_or(|last| last.elapsed() >= self.scan_interval)
    }

    /// Compare the trees with the previous scan and remember the new state
    pub fn scan_changes(&mut self) -> ScanResult {
        self.last_scan = Some(Instant::now());
        let current = collect(&self.roots);
        let mut result = ScanResult::default();

        for (path, stamp) in &current {
            match self.state.get(path) {
                Some(previous) if previous != stamp => {
                    debug!(target: "scanner", "Descriptor changed: {}", path.display());
                    result.changed.push((path.clone(), stamp.modified));
                }
                Some(_) => {}
                None => {
                    debug!(target: "scanner", "Descriptor added: {}", path.display());
                    result.added.push(path.clone());
                }
            }
        }

        for path in self.state.keys() {
            if !current.contains_key(path) {
                debug!(target: "scanner", "Descriptor removed: {}", path.display());
                result.removed.push(path.clone());
            }
        }

        self.state = current;
        result
    }
}

fn collect(roots: &[PathBuf]) -> BTreeMap<PathBuf, Stamp> {
    let mut state = BTreeMap::new();
    for root in roots {
        collect_root(root, &mut state);
    }
    state
}

fn collect_root(root: &Path, state: &mut BTreeMap<PathBuf, Stamp>) {
    if !root.exists() {
        debug!(target: "scanner", "Descriptor directory does not exist: {}", root.display());
        return;
    }

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(target: "scanner", "Failed to walk {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_module(entry.path()) {
            continue;
        }

        match entry.metadata().map_err(std::io::Error::from).and_then(|m| {
            m.modified().map(|modified| Stamp {
                modified,
                len: m.len(),
            })
        }) {
            Ok(stamp) => {
                state.insert(entry.into_path(), stamp);
            }
            Err(e) => {
                warn!(target: "scanner", "Failed to stat {}: {}", entry.path().display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_existing_files_are_baseline() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ping.toml"), "kind = \"command\"").unwrap();

        let mut scanner = TreeScanner::new(vec![dir.path().to_path_buf()]);
        assert_eq!(scanner.tracked(), 1);
        assert!(scanner.should_scan());
        assert!(!scanner.scan_changes().has_changes());
        assert!(!scanner.should_scan());
    }

    #[test]
    fn test_detects_nested_add_change_remove() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("admin");
        fs::create_dir(&nested).unwrap();
        let kept = dir.path().join("kept.toml");
        let gone = dir.path().join("gone.toml");
        fs::write(&kept, "kind = \"event\"").unwrap();
        fs::write(&gone, "kind = \"event\"").unwrap();

        let mut scanner = TreeScanner::new(vec![dir.path().to_path_buf()]);

        let added = nested.join("ban.toml");
        fs::write(&added, "kind = \"command\"").unwrap();
        fs::write(&kept, "kind = \"event\"\nname = \"ready\"").unwrap();
        fs::remove_file(&gone).unwrap();

        let result = scanner.scan_changes();
        assert_eq!(result.added, vec![added]);
        assert_eq!(result.changed.len(), 1);
        assert_eq!(result.changed[0].0, kept);
        assert_eq!(result.removed, vec![gone]);
        assert_eq!(result.total(), 3);
    }

    #[test]
    fn test_ignores_other_files_and_missing_roots() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let mut scanner = TreeScanner::new(vec![dir.path().to_path_buf(), missing]);

        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        fs::write(dir.path().join("helper.rs"), "fn main() {}").unwrap();

        assert!(!scanner.scan_changes().has_changes());
        assert_eq!(scanner.tracked(), 0);
    }
}
