use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{check_step_name, run_directory, workflow};
use crate::error::JobError;
use crate::registry::{OUTPUT_ATTRIBUTES, TIME_LOGGER};
use crate::state_machine::{Job, JobContext, JobResult, JobType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandsOptions {
    /// Keep going when a command exits non-zero.
    pub allow_failure: bool,
    /// Write each command's stdout/stderr to `<run_dir>/<step>.log`
    /// instead of inheriting the terminal.
    pub capture_output: bool,
}

impl Default for CommandsOptions {
    fn default() -> Self {
        Self {
            allow_failure: false,
            capture_output: true,
        }
    }
}

/// Runs the workflow's command steps, one after another, in the run directory.
///
/// Each command blocks until it exits; there is no timeout.
pub struct CommandsJob {
    options: CommandsOptions,
}

impl JobType for CommandsJob {
    const NAME: &'static str = "commands";
    type Options = CommandsOptions;

    fn new(options: CommandsOptions, _debug: bool) -> Self {
        Self { options }
    }
}

impl Job for CommandsJob {
    fn perform(&mut self, ctx: &mut JobContext<'_>) -> Result<JobResult, JobError> {
        let steps = workflow(ctx.registry)?.steps.clone();
        let run_dir = run_directory(ctx.registry)?;
        let time_logger = ctx
            .registry
            .lookup(TIME_LOGGER)
            .cloned()
            .ok_or(JobError::MissingContext(TIME_LOGGER.name()))?;

        for step in &steps {
            check_step_name(&step.name)?;
        }

        let mut failure = None;
        for step in &steps {
            let attributes = match (&step.command, step.skip) {
                (_, true) => {
                    info!(step = %step.name, "Skipping step");
                    json!({ "applicable": false, "skipped": true })
                }
                (None, false) => json!({ "applicable": false }),
                (Some(program), false) => {
                    let channel = format!("{}:{}", ctx.state, step.name);
                    info!(step = %step.name, command = %program, args = ?step.args, "Running command");

                    let mut command = Command::new(program);
                    command.args(&step.args).current_dir(&run_dir);
                    time_logger.start(&channel)?;
                    let status = if self.options.capture_output {
                        let output = command.stdin(Stdio::null()).output();
                        time_logger.stop(&channel);
                        let output = output?;
                        let mut log = output.stdout;
                        log.extend_from_slice(&output.stderr);
                        std::fs::write(run_dir.join(format!("{}.log", step.name)), log)?;
                        output.status
                    } else {
                        let status = command.status();
                        time_logger.stop(&channel);
                        status?
                    };
                    let duration = time_logger
                        .delta(&channel)
                        .last()
                        .and_then(|d| d.get(&channel).copied())
                        .unwrap_or_default();

                    if !status.success() {
                        warn!(step = %step.name, code = ?status.code(), "Command failed");
                        if !self.options.allow_failure && failure.is_none() {
                            failure = Some(JobError::CommandFailed {
                                name: step.name.clone(),
                                code: status.code(),
                            });
                        }
                    }
                    json!({
                        "applicable": true,
                        "exit_code": status.code(),
                        "success": status.success(),
                        "duration": duration,
                    })
                }
            };

            let recorded = ctx
                .registry
                .lookup_mut(OUTPUT_ATTRIBUTES)
                .ok_or(JobError::MissingContext(OUTPUT_ATTRIBUTES.name()))?;
            recorded.insert(step.name.clone(), attributes);

            if failure.is_some() {
                break;
            }
        }

        let attributes = ctx
            .registry
            .lookup(OUTPUT_ATTRIBUTES)
            .cloned()
            .unwrap_or_default();
        ctx.adapter.communicate_measure_attributes(&attributes)?;

        if let Some(err) = failure {
            return Err(err);
        }
        let results: Vec<Value> = steps
            .iter()
            .filter_map(|s| attributes.get(&s.name).map(|a| json!({ "name": s.name, "attributes": a })))
            .collect();
        Ok(json!({ "steps": results }))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::adapter::{Workflow, WorkflowStep};
    use crate::jobs::testing::{CapturingAdapter, registry};
    use crate::registry::Registry;
    use crate::state_machine::WorkflowState;

    fn command(name: &str, program: &str, args: &[&str]) -> WorkflowStep {
        WorkflowStep {
            name: name.into(),
            command: Some(program.into()),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..WorkflowStep::default()
        }
    }

    fn perform(
        options: CommandsOptions,
        registry: &mut Registry,
        adapter: &CapturingAdapter,
    ) -> Result<JobResult, JobError> {
        let state = WorkflowState::from("commands");
        let mut ctx = JobContext {
            state: &state,
            adapter,
            registry,
        };
        CommandsJob::new(options, false).perform(&mut ctx)
    }

    #[test]
    fn runs_commands_and_records_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = Workflow {
            steps: vec![
                command("hello", "echo", &["hello"]),
                WorkflowStep {
                    skip: true,
                    ..command("skipped", "false", &[])
                },
            ],
            ..Workflow::default()
        };
        let mut registry = registry(dir.path(), workflow);
        let adapter = CapturingAdapter::default();

        let result = perform(CommandsOptions::default(), &mut registry, &adapter).unwrap();
        assert_eq!(result["steps"].as_array().unwrap().len(), 2);

        let attributes = registry.lookup(OUTPUT_ATTRIBUTES).unwrap();
        assert_eq!(attributes["hello"]["exit_code"], 0);
        assert_eq!(attributes["skipped"]["skipped"], true);
        let log = std::fs::read_to_string(dir.path().join("run/hello.log")).unwrap();
        assert_eq!(log.trim(), "hello");
        assert!(adapter.attributes.borrow().is_some());

        let logger = registry.lookup(TIME_LOGGER).unwrap();
        assert_eq!(logger.delta("commands:hello").len(), 1);
    }

    #[test]
    fn non_zero_exit_fails_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = Workflow {
            steps: vec![command("bad", "false", &[]), command("after", "true", &[])],
            ..Workflow::default()
        };
        let mut registry = registry(dir.path(), workflow);
        let adapter = CapturingAdapter::default();

        let err = perform(CommandsOptions::default(), &mut registry, &adapter).unwrap_err();
        assert!(matches!(err, JobError::CommandFailed { ref name, .. } if name == "bad"));
        let attributes = registry.lookup(OUTPUT_ATTRIBUTES).unwrap();
        assert!(attributes.contains_key("bad"));
        assert!(!attributes.contains_key("after"));
        assert!(adapter.attributes.borrow().is_some());
    }

    #[test]
    fn allow_failure_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = Workflow {
            steps: vec![command("bad", "false", &[]), command("after", "true", &[])],
            ..Workflow::default()
        };
        let mut registry = registry(dir.path(), workflow);
        let adapter = CapturingAdapter::default();
        let options = CommandsOptions {
            allow_failure: true,
            ..CommandsOptions::default()
        };

        perform(options, &mut registry, &adapter).unwrap();
        let attributes = registry.lookup(OUTPUT_ATTRIBUTES).unwrap();
        assert_eq!(attributes["bad"]["success"], false);
        assert_eq!(attributes["after"]["success"], true);
    }

    #[test]
    fn step_log_cannot_escape_run_directory() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = Workflow {
            steps: vec![command("../escaped", "true", &[])],
            ..Workflow::default()
        };
        let mut registry = registry(dir.path(), workflow);
        let adapter = CapturingAdapter::default();

        assert!(perform(CommandsOptions::default(), &mut registry, &adapter).is_err());
        assert!(!dir.path().join("escaped.log").exists());
        assert!(registry.lookup(OUTPUT_ATTRIBUTES).unwrap().is_empty());
    }

    #[test]
    fn missing_program_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = Workflow {
            steps: vec![command("ghost", "stepflow-no-such-program", &[])],
            ..Workflow::default()
        };
        let mut registry = registry(dir.path(), workflow);
        let adapter = CapturingAdapter::default();

        let err = perform(CommandsOptions::default(), &mut registry, &adapter).unwrap_err();
        assert!(matches!(err, JobError::Io(_)));
    }
}
