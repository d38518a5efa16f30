//! Crate-wide constants and default values
//!
//! Centralizes magic numbers and default configurations for better maintainability

/// Controller lifecycle defaults
pub mod controller {
    /// Consecutive start failures after which a controller stops trying
    pub const DEFAULT_MAX_FAILS: u32 = 20;

    /// How long a freshly launched child is observed for an early exit (ms)
    pub const DEFAULT_START_WAIT_MS: u64 = 3_000;

    /// Poll attempts per stop phase (graceful close, then terminate)
    pub const STOP_POLL_ATTEMPTS: u32 = 50;

    /// Poll interval between liveness probes during stop (ms)
    pub const STOP_POLL_INTERVAL_MS: u64 = 200;
}

/// Artifact watcher defaults
pub mod watcher {
    /// Normal poll period for the artifact scan (ms)
    pub const MONITOR_PERIOD_MS: u64 = 5_000;

    /// Accelerated poll period while a restart is pending (ms)
    pub const PENDING_PERIOD_MS: u64 = 1_000;

    /// Quiet time after the last observed change before restarting (ms)
    pub const RESTART_DELAY_MS: u64 = 3_000;

    /// File extensions that participate in change detection
    pub const WATCH_EXTENSIONS: [&str; 4] = ["dll", "exe", "zip", "jar"];
}

/// Upstream event contract
pub mod events {
    /// Messages containing any of these markers route to the error stream
    pub const ERROR_MARKERS: [&str; 2] = ["错误", "失败"];

    /// Stop reason used when a process exceeds its memory ceiling; upstream
    /// consumers match on this literal
    pub const MEMORY_EXCEEDED_REASON: &str = "内存超限";
}

/// Process launcher configuration
pub mod launcher {
    /// Environment variable carrying the absolute working directory
    pub const BASE_PATH_ENV: &str = "BasePath";

    /// Upper bound on the captured stderr tail (bytes)
    pub const STDERR_TAIL_LIMIT: usize = 16 * 1024;

    /// Marker file name selecting archive-based deployment
    pub const ZIP_DEPLOY_MARKER: &str = "ZipDeploy";
}
