//! Adoption state store
//! Persists `{name, process_id, process_name, start_time}` tuples across
//! supervisor restarts so orphaned children can be re-adopted

use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::domain::value_objects::ControllerSnapshot;
use crate::domain::{DomainError, Result};

/// JSON file store for controller adoption snapshots
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn save(&self, snapshots: &[ControllerSnapshot]) -> Result<()> {
        let body = serde_json::to_vec_pretty(snapshots)
            .map_err(|e| DomainError::Io(format!("serialize state: {}", e)))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a crash mid-write cannot corrupt the store.
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, body)?;
        fs::rename(&staging, &self.path)?;
        debug!(path = %self.path.display(), services = snapshots.len(), "adoption state saved");
        Ok(())
    }

    /// A missing file is an empty store, not an error
    pub fn load(&self) -> Result<Vec<ControllerSnapshot>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let body = fs::read(&self.path)?;
        serde_json::from_slice(&body)
            .map_err(|e| DomainError::Io(format!("parse state {}: {}", self.path.display(), e)))
    }
}
