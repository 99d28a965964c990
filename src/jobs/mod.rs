//! Stock jobs bound by the default state graph.
//!
//! They make a workflow document runnable on their own: validate it, run its
//! command steps, derive the objective function and write the outputs.
//! Domain-specific jobs are registered next to them with
//! [`JobCatalog::register`].

mod commands;
mod initialization;
mod postprocess;
mod reporting;

pub use commands::{CommandsJob, CommandsOptions};
pub use initialization::{InitializationJob, InitializationOptions};
pub use postprocess::{PostprocessJob, PostprocessOptions};
pub use reporting::{ReportingJob, ReportingOptions};

use std::path::{Component, Path, PathBuf};

use crate::error::JobError;
use crate::logging::LOG_FILE;
use crate::registry::{RUN_DIRECTORY, Registry, WORKFLOW};
use crate::state_machine::JobCatalog;
use crate::adapter::Workflow;

impl JobCatalog {
    /// A catalog holding every stock job.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog
            .register::<InitializationJob>()
            .register::<CommandsJob>()
            .register::<ReportingJob>()
            .register::<PostprocessJob>();
        catalog
    }
}

fn workflow(registry: &Registry) -> Result<&Workflow, JobError> {
    registry
        .lookup(WORKFLOW)
        .ok_or(JobError::MissingContext(WORKFLOW.name()))
}

fn run_directory(registry: &Registry) -> Result<PathBuf, JobError> {
    registry
        .lookup(RUN_DIRECTORY)
        .cloned()
        .ok_or(JobError::MissingContext(RUN_DIRECTORY.name()))
}

// A single normal path component: no separators, no `.` or `..`, not absolute.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Step names become `<run_dir>/<name>.log`, so they must stay inside the run
/// directory and must not shadow the run log.
fn check_step_name(name: &str) -> Result<(), JobError> {
    if !is_plain_name(name) {
        return Err(JobError::Failed(format!(
            "step name '{name}' must be a plain file name"
        )));
    }
    if format!("{name}.log") == LOG_FILE {
        return Err(JobError::Failed(format!("step name '{name}' is reserved")));
    }
    Ok(())
}
