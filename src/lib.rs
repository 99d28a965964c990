//! Finite-state workflow orchestration.
//!
//! A [`Run`] walks a [`StateGraph`](state_machine::StateGraph) from `queued`
//! to `finished`, invoking the [`Job`](state_machine::Job) bound to each
//! state. Jobs share a lazily evaluated [`Registry`] and report outward
//! through an [`Adapter`]. The first failure moves the run to `errored`.

pub mod adapter;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod state_machine;
pub mod summary;
pub mod time_logger;

pub use adapter::{Adapter, LocalAdapter, Workflow};
pub use config::RunConfig;
pub use error::{AdapterError, ConfigError, JobError, RunError};
pub use orchestrator::{Run, StepEvent};
pub use registry::{Key, Registry};
pub use state_machine::{JobCatalog, WorkflowState};
pub use summary::RunSummary;
pub use time_logger::TimeLogger;
