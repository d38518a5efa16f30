//! Artifact watcher
//! Mtime stamp table over the deployment artifacts of one workdir.
//!
//! Artifact uploads arrive as many writes spread over seconds; the controller
//! pairs this table with a debounce window so a change burst produces exactly
//! one restart.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, trace};

use crate::constants::watcher::WATCH_EXTENSIONS;

/// Path → last observed mtime, truncated to whole seconds.
///
/// The first scan seeds the table without reporting anything; stamps survive
/// controller restarts so the first post-restart scan stays quiet too.
#[derive(Debug, Default)]
pub struct ArtifactStamps {
    stamps: HashMap<PathBuf, u64>,
    bootstrapped: bool,
}

impl ArtifactStamps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Scan `dir` recursively and return the paths whose mtime advanced (or
    /// that appeared) since the previous scan. The bootstrap scan returns
    /// nothing regardless of directory contents. A missing directory is
    /// treated as empty.
    pub fn scan(&mut self, dir: &Path) -> Vec<PathBuf> {
        let mut observed = Vec::new();
        collect_artifacts(dir, &mut observed);

        let mut changed = Vec::new();
        for (path, mtime) in observed {
            match self.stamps.get(&path) {
                Some(&seen) if mtime <= seen => {}
                Some(_) => {
                    trace!(path = %path.display(), "artifact mtime advanced");
                    self.stamps.insert(path.clone(), mtime);
                    changed.push(path);
                }
                None => {
                    self.stamps.insert(path.clone(), mtime);
                    if self.bootstrapped {
                        changed.push(path);
                    }
                }
            }
        }

        if !self.bootstrapped {
            self.bootstrapped = true;
            debug!(dir = %dir.display(), files = self.stamps.len(), "artifact stamps seeded");
            return Vec::new();
        }
        changed
    }
}

fn collect_artifacts(dir: &Path, out: &mut Vec<(PathBuf, u64)>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_artifacts(&path, out);
            continue;
        }
        let watched = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .map(|ext| WATCH_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false);
        if !watched {
            continue;
        }
        if let Some(mtime) = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        {
            out.push((path, mtime.as_secs()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap();
        path
    }

    #[test]
    fn test_first_scan_seeds_silently() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "app.dll");
        touch(tmp.path(), "lib.dll");

        let mut stamps = ArtifactStamps::new();
        assert!(stamps.scan(tmp.path()).is_empty());
        assert!(stamps.is_bootstrapped());
        assert_eq!(stamps.len(), 2);
    }

    #[test]
    fn test_new_file_after_bootstrap_reports() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "app.dll");

        let mut stamps = ArtifactStamps::new();
        stamps.scan(tmp.path());

        let added = touch(tmp.path(), "plugin.jar");
        let changed = stamps.scan(tmp.path());
        assert_eq!(changed, vec![added]);

        // Unchanged on the following scan.
        assert!(stamps.scan(tmp.path()).is_empty());
    }

    #[test]
    fn test_mtime_advance_reports_once() {
        let tmp = TempDir::new().unwrap();
        let app = touch(tmp.path(), "app.dll");

        let mut stamps = ArtifactStamps::new();
        stamps.scan(tmp.path());

        // Push the stamp into the past, then rewrite the file.
        stamps.stamps.insert(app.clone(), 0);
        fs::write(&app, b"v2").unwrap();

        let changed = stamps.scan(tmp.path());
        assert_eq!(changed, vec![app]);
    }

    #[test]
    fn test_ignores_unwatched_extensions() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "notes.txt");
        touch(tmp.path(), "app.dll");

        let mut stamps = ArtifactStamps::new();
        stamps.scan(tmp.path());
        assert_eq!(stamps.len(), 1);

        touch(tmp.path(), "more-notes.md");
        assert!(stamps.scan(tmp.path()).is_empty());
    }

    #[test]
    fn test_recurses_into_subdirectories() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("lib")).unwrap();
        touch(&tmp.path().join("lib"), "dep.dll");

        let mut stamps = ArtifactStamps::new();
        stamps.scan(tmp.path());
        assert_eq!(stamps.len(), 1);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let mut stamps = ArtifactStamps::new();
        assert!(stamps.scan(Path::new("/definitely/not/here")).is_empty());
        assert!(stamps.is_bootstrapped());
    }
}
