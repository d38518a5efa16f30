pub mod config;
pub mod log_event_sink;
pub mod state_store;
pub mod system_process_query;
pub mod tokio_launcher;

pub use config::DirectoryConfigClient;
pub use log_event_sink::{LogEventSink, TracingTracer};
pub use state_store::FileStateStore;
pub use system_process_query::SystemProcessQuery;
pub use tokio_launcher::TokioProcessLauncher;
