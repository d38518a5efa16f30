pub mod app_metrics;
pub mod controller_id;
pub mod run_mode;
pub mod service_info;

pub use app_metrics::AppMetrics;
pub use controller_id::{ControllerId, IdAllocator};
pub use run_mode::RunMode;
pub use service_info::{ControllerSnapshot, DeployInfo, ServiceInfo};
