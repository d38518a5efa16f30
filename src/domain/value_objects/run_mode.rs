//! RunMode value object
//! The deployment discipline of a managed service

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::DomainError;

/// How a service is deployed and run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Launch the executable directly (archive deployment when the file is a zip)
    #[default]
    Default,

    /// Like `Default`, but several instances of the same executable may coexist;
    /// adoption by process name is disabled
    Multiple,

    /// Unpack the archive only; an external host runs the result
    Extract,

    /// Unpack the archive, locate its entrypoint and launch it
    ExtractAndRun,

    /// Launch once; a successful run disables the service
    RunOnce,
}

impl RunMode {
    /// Whether this mode goes through archive extraction unconditionally
    pub fn is_archive(&self) -> bool {
        matches!(self, RunMode::Extract | RunMode::ExtractAndRun)
    }

    /// Whether the controller owns a long-lived child in this mode
    pub fn owns_process(&self) -> bool {
        !matches!(self, RunMode::Extract | RunMode::RunOnce)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Default => write!(f, "default"),
            RunMode::Multiple => write!(f, "multiple"),
            RunMode::Extract => write!(f, "extract"),
            RunMode::ExtractAndRun => write!(f, "extractandrun"),
            RunMode::RunOnce => write!(f, "runonce"),
        }
    }
}

impl FromStr for RunMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "default" => Ok(RunMode::Default),
            "multiple" => Ok(RunMode::Multiple),
            "extract" => Ok(RunMode::Extract),
            "extractandrun" => Ok(RunMode::ExtractAndRun),
            "runonce" => Ok(RunMode::RunOnce),
            other => Err(DomainError::InvalidService(format!(
                "unknown run mode '{}'",
                other
            ))),
        }
    }
}
