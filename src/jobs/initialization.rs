use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{check_step_name, run_directory, workflow};
use crate::error::JobError;
use crate::registry::WORKFLOW_ARGUMENTS;
use crate::state_machine::{Job, JobContext, JobResult, JobType};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitializationOptions {
    /// Fail when the workflow declares no steps.
    pub require_steps: bool,
}

/// Validates the workflow and seeds the shared arguments.
pub struct InitializationJob {
    options: InitializationOptions,
}

impl JobType for InitializationJob {
    const NAME: &'static str = "initialization";
    type Options = InitializationOptions;

    fn new(options: InitializationOptions, _debug: bool) -> Self {
        Self { options }
    }
}

impl Job for InitializationJob {
    fn perform(&mut self, ctx: &mut JobContext<'_>) -> Result<JobResult, JobError> {
        let workflow = workflow(ctx.registry)?.clone();

        if self.options.require_steps && workflow.steps.is_empty() {
            return Err(JobError::Failed("workflow declares no steps".into()));
        }
        let mut names = HashSet::new();
        for (index, step) in workflow.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(JobError::Failed(format!("step {index} has no name")));
            }
            check_step_name(&step.name)?;
            if !names.insert(step.name.as_str()) {
                return Err(JobError::Failed(format!(
                    "step name '{}' is used more than once",
                    step.name
                )));
            }
        }

        let run_dir = run_directory(ctx.registry)?;
        std::fs::create_dir_all(&run_dir)?;

        let arguments = ctx
            .registry
            .lookup_mut(WORKFLOW_ARGUMENTS)
            .ok_or(JobError::MissingContext(WORKFLOW_ARGUMENTS.name()))?;
        arguments.extend(workflow.arguments.clone());
        let arguments = arguments.clone();

        info!(
            steps = workflow.steps.len(),
            run_directory = %run_dir.display(),
            "Workflow initialized"
        );
        Ok(json!({
            "steps": workflow.steps.len(),
            "arguments": arguments,
            "run_directory": run_dir,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Workflow, WorkflowStep};
    use crate::jobs::testing::{CapturingAdapter, registry};
    use crate::state_machine::WorkflowState;

    fn step(name: &str) -> WorkflowStep {
        WorkflowStep {
            name: name.into(),
            ..WorkflowStep::default()
        }
    }

    fn perform(job: &mut InitializationJob, workflow: Workflow) -> Result<JobResult, JobError> {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry(dir.path(), workflow);
        let adapter = CapturingAdapter::default();
        let state = WorkflowState::from("initialization");
        let mut ctx = JobContext {
            state: &state,
            adapter: &adapter,
            registry: &mut registry,
        };
        job.perform(&mut ctx)
    }

    #[test]
    fn seeds_arguments() {
        let mut workflow = Workflow {
            steps: vec![step("a"), step("b")],
            ..Workflow::default()
        };
        workflow.arguments.insert("zone".into(), json!("north"));

        let mut job = InitializationJob::new(InitializationOptions::default(), false);
        let result = perform(&mut job, workflow).unwrap();
        assert_eq!(result["steps"], 2);
        assert_eq!(result["arguments"]["zone"], "north");
    }

    #[test]
    fn rejects_duplicate_step_names() {
        let workflow = Workflow {
            steps: vec![step("a"), step("a")],
            ..Workflow::default()
        };
        let mut job = InitializationJob::new(InitializationOptions::default(), false);
        let err = perform(&mut job, workflow).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_step_names_outside_run_directory() {
        for name in ["../escaped", "run"] {
            let workflow = Workflow {
                steps: vec![step(name)],
                ..Workflow::default()
            };
            let mut job = InitializationJob::new(InitializationOptions::default(), false);
            let err = perform(&mut job, workflow).unwrap_err();
            assert!(err.to_string().contains(name), "{err}");
        }
    }

    #[test]
    fn empty_workflow_needs_opt_in_to_fail() {
        let mut lenient = InitializationJob::new(InitializationOptions::default(), false);
        assert!(perform(&mut lenient, Workflow::default()).is_ok());

        let mut strict = InitializationJob::new(
            InitializationOptions {
                require_steps: true,
            },
            false,
        );
        assert!(perform(&mut strict, Workflow::default()).is_err());
    }
}
