//! AppMetrics value object
//! One process sample reported upstream after a controller check

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Point-in-time process metrics for the upstream ping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppMetrics {
    pub process_name: String,
    pub process_id: u32,
    /// Resident memory in bytes
    pub working_set: u64,
    pub cpu_percent: f32,
    pub thread_count: usize,
    pub handle_count: usize,
    pub uptime: Duration,
}

impl AppMetrics {
    /// Working set expressed in MiB, the unit the memory ceiling uses
    pub fn working_set_mib(&self) -> u64 {
        self.working_set / (1024 * 1024)
    }
}
