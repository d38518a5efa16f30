pub mod error;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use error::{DomainError, Result};
pub use services::{ArchiveDeployer, ArtifactStamps, ServiceController, StopTuning, WatchTuning};
pub use value_objects::{
    AppMetrics, ControllerId, ControllerSnapshot, DeployInfo, IdAllocator, RunMode, ServiceInfo,
};
