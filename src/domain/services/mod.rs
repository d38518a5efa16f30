pub mod archive_deployer;
pub mod artifact_watcher;
pub mod service_controller;

pub use archive_deployer::ArchiveDeployer;
pub use artifact_watcher::ArtifactStamps;
pub use service_controller::{ServiceController, StopTuning, WatchTuning};
