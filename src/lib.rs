//! Application Warden
//!
//! A library for supervising host-resident applications:
//! - Per-service controllers that start, adopt, monitor and stop child processes
//! - Zip-based deployment (extract, locate entrypoint, run)
//! - Artifact watching with debounced redeploy restarts
//! - Failure counting with a hard ceiling, memory-ceiling enforcement
//! - Fleet-level supervisor that diffs declarative service catalogs
//!
//! ## Architecture
//!
//! The crate follows a ports-and-adapters split:
//!
//! - **Domain**: service records, the controller state machine, the deployer
//!   and the artifact watcher
//! - **Application**: the fleet supervisor (composition root)
//! - **Infrastructure**: OS-facing adapters (tokio process launcher, sysinfo
//!   process probe, YAML config directory, JSON adoption-state store)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use app_warden::{
//!     application::Supervisor,
//!     infrastructure::{LogEventSink, SystemProcessQuery, TokioProcessLauncher},
//! };
//! ```

pub mod constants;

pub mod application;
pub mod domain;
pub mod infrastructure;
