//! Domain-level errors
//! These represent controller-boundary failures, not infrastructure panics

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum DomainError {
    // Service record errors
    #[error("Invalid service definition: {0}")]
    InvalidService(String),

    // Deployment errors
    #[error("Archive extraction failed: {0}")]
    Extraction(String),

    #[error("No launchable entrypoint: {0}")]
    MissingEntrypoint(String),

    // Process lifecycle errors
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Process exited early with code {code}")]
    EarlyExit { code: i32 },

    #[error("Failed to terminate process {pid}: {reason}")]
    Terminate { pid: u32, reason: String },

    // Recovery errors
    #[error("Adoption failed: {0}")]
    Adoption(String),

    // Infrastructure pass-through
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DomainError {
    fn from(e: std::io::Error) -> Self {
        DomainError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
