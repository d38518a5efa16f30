//! ServiceInfo value object
//! Declarative description of one managed application, immutable per revision

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::constants::launcher::ZIP_DEPLOY_MARKER;
use crate::domain::{DomainError, Result, RunMode};

/// Declarative record for one managed application.
///
/// A controller holds the record behind an `Arc`; pushing a NEW instance
/// (different allocation) through `set_info` is the operator's way of
/// resetting a controller stuck at its failure ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Unique name within the host
    pub name: String,

    /// Executable path, a `*.zip` path, or the literal `ZipDeploy`
    pub file_name: String,

    /// Command line, tokenized by whitespace
    #[serde(default)]
    pub arguments: String,

    /// May be empty; derived from the file name's directory in that case
    #[serde(default)]
    pub working_directory: String,

    /// Optional run-as user
    #[serde(default)]
    pub user_name: Option<String>,

    /// Soft memory ceiling in MiB; 0 disables the check
    #[serde(default)]
    pub max_memory: u64,

    #[serde(default)]
    pub mode: RunMode,

    #[serde(default = "default_enable")]
    pub enable: bool,
}

fn default_enable() -> bool {
    true
}

impl ServiceInfo {
    /// Create a minimal enabled record; the rest via struct update syntax
    pub fn new(name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_name: file_name.into(),
            arguments: String::new(),
            working_directory: String::new(),
            user_name: None,
            max_memory: 0,
            mode: RunMode::Default,
            enable: true,
        }
    }

    /// Validate the parts a controller cannot start without
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidService("empty service name".into()));
        }
        if self.file_name.trim().is_empty() {
            return Err(DomainError::InvalidService(format!(
                "service '{}' has no file name",
                self.name
            )));
        }
        Ok(())
    }

    /// Whitespace-tokenized argument vector
    pub fn argument_tokens(&self) -> Vec<String> {
        split_arguments(&self.arguments)
    }

    /// Whether this record selects archive-based deployment
    pub fn is_zip_deploy(&self) -> bool {
        self.file_name == ZIP_DEPLOY_MARKER
            || self
                .file_name
                .to_ascii_lowercase()
                .ends_with(".zip")
    }

    /// The working directory, derived from the file name's parent when empty
    pub fn resolve_working_directory(&self) -> PathBuf {
        if !self.working_directory.trim().is_empty() {
            return PathBuf::from(self.working_directory.trim());
        }
        Path::new(&self.file_name)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Tokenize a command-line string on whitespace, dropping empty tokens
pub fn split_arguments(arguments: &str) -> Vec<String> {
    arguments
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Deployment overlay for archive-based services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployInfo {
    /// File globs that are always overwritten during extraction; outside the
    /// set, a destination newer than the archive is kept as a local edit
    #[serde(default)]
    pub overwrite: Vec<String>,
}

/// The tuple a supervisor persists across restarts so controllers can
/// re-adopt orphaned children instead of spawning duplicates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub name: String,
    pub process_id: u32,
    pub process_name: String,
    #[serde(default)]
    pub start_time: Option<SystemTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_file_name() {
        let info = ServiceInfo::new("svc", "");
        assert!(matches!(
            info.validate(),
            Err(DomainError::InvalidService(_))
        ));
        assert!(ServiceInfo::new("svc", "/bin/app").validate().is_ok());
    }

    #[test]
    fn test_argument_tokens() {
        let mut info = ServiceInfo::new("svc", "/bin/app");
        info.arguments = "  app.dll   --port=80 ".to_string();
        assert_eq!(info.argument_tokens(), vec!["app.dll", "--port=80"]);
        info.arguments = String::new();
        assert!(info.argument_tokens().is_empty());
    }

    #[test]
    fn test_zip_deploy_detection() {
        assert!(ServiceInfo::new("a", "ZipDeploy").is_zip_deploy());
        assert!(ServiceInfo::new("a", "/srv/app/App.ZIP").is_zip_deploy());
        assert!(!ServiceInfo::new("a", "/usr/bin/node").is_zip_deploy());
    }

    #[test]
    fn test_working_directory_derivation() {
        let mut info = ServiceInfo::new("svc", "/srv/app/bin/run");
        assert_eq!(
            info.resolve_working_directory(),
            PathBuf::from("/srv/app/bin")
        );

        info.working_directory = "/data/work".to_string();
        assert_eq!(info.resolve_working_directory(), PathBuf::from("/data/work"));

        let bare = ServiceInfo::new("svc", "run.sh");
        assert_eq!(bare.resolve_working_directory(), PathBuf::from("."));
    }

    #[test]
    fn test_snapshot_serde_round_trip() {
        let snap = ControllerSnapshot {
            name: "svc1".to_string(),
            process_id: 4242,
            process_name: "node".to_string(),
            start_time: Some(SystemTime::UNIX_EPOCH),
        };
        let json = serde_json::to_string(&snap).unwrap();
        let back: ControllerSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
