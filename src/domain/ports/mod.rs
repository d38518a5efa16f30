pub mod config_client;
pub mod mock_executor;
pub mod process_executor;
pub mod process_query;
pub mod telemetry;

pub use config_client::{ConfigClient, ServiceDeployment};
pub use mock_executor::{KillKind, MockLauncher, MockProcessQuery};
pub use process_executor::{ExitNotifier, ExitReport, ExitWatch, ProcessExecutor, SpawnConfig, SpawnResult};
pub use process_query::{ProcessQuery, ProcessSnapshot};
pub use telemetry::{EventSink, NoopTracer, PerfReporter, Span, Tracer};
