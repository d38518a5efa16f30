//! Configuration loading from YAML files
//!
//! Directory-based configuration: each YAML file describes ONE service, with
//! the service name derived from the filename.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::domain::ports::{ConfigClient, ServiceDeployment};
use crate::domain::value_objects::{DeployInfo, RunMode, ServiceInfo};
use crate::domain::Result;

/// Service configuration from YAML
#[derive(Debug, Deserialize)]
struct ServiceFileConfig {
    file_name: String,

    #[serde(default)]
    arguments: String,

    #[serde(default)]
    working_directory: String,

    #[serde(default)]
    user_name: Option<String>,

    #[serde(default)]
    max_memory: u64,

    #[serde(default)]
    mode: RunMode,

    #[serde(default = "default_enable")]
    enable: bool,

    /// Deployment overlay: globs always overwritten during extraction
    #[serde(default)]
    overwrite: Vec<String>,
}

fn default_enable() -> bool {
    true
}

/// ConfigClient over a directory of per-service YAML files
/// (`<dir>/<service>.yaml`)
#[derive(Debug, Clone)]
pub struct DirectoryConfigClient {
    dir: PathBuf,
}

impl DirectoryConfigClient {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ConfigClient for DirectoryConfigClient {
    async fn pull(&self) -> Result<Vec<ServiceDeployment>> {
        let mut deployments = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "config directory unreadable");
                return Ok(deployments);
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
                .unwrap_or(false);
            if !path.is_file() || !is_yaml {
                continue;
            }
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "config file unreadable, skipping");
                    continue;
                }
            };
            let parsed: ServiceFileConfig = match serde_yaml::from_str(&raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "config file invalid, skipping");
                    continue;
                }
            };

            let info = ServiceInfo {
                name,
                file_name: parsed.file_name,
                arguments: parsed.arguments,
                working_directory: parsed.working_directory,
                user_name: parsed.user_name,
                max_memory: parsed.max_memory,
                mode: parsed.mode,
                enable: parsed.enable,
            };
            if let Err(e) = info.validate() {
                warn!(file = %path.display(), error = %e, "config file rejected, skipping");
                continue;
            }

            let mut deployment = ServiceDeployment::new(info);
            if !parsed.overwrite.is_empty() {
                deployment = deployment.with_deploy(DeployInfo {
                    overwrite: parsed.overwrite,
                });
            }
            deployments.push(deployment);
        }

        deployments.sort_by(|a, b| a.info.name.cmp(&b.info.name));
        debug!(dir = %self.dir.display(), services = deployments.len(), "catalog loaded");
        Ok(deployments)
    }
}
