use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Map;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapter::{Adapter, resolve_run_directory};
use crate::config::RunConfig;
use crate::error::{ConfigError, RunError, StepFailure};
use crate::registry::{
    DIRECTORY, OBJECTIVE_FUNCTION, OUTPUT_ATTRIBUTES, RUN_DIRECTORY, Registry, TIME_LOGGER,
    WORKFLOW, WORKFLOW_ARGUMENTS,
};
use crate::state_machine::{
    JobCatalog, JobContext, JobOptions, JobResult, StateGraph, WorkflowState,
};
use crate::summary::{CompletedStatus, RunSummary, SUMMARY_FILE, StepRecord};
use crate::time_logger::TimeLogger;

/// Timing profile written into the run directory at finalization.
pub const PROFILE_FILE: &str = "profile.json";

const WORKFLOW_CHANNEL: &str = "workflow";

/// Progress notifications from [`Run::run_with`].
#[derive(Debug, Clone, Copy)]
pub enum StepEvent<'a> {
    /// About to enter `state` and perform its job.
    Entering { state: &'a WorkflowState },
    /// The step ran; `record` says how it went.
    Completed { record: &'a StepRecord },
}

/// Drives one workflow from `queued` to `finished` or `errored`.
///
/// Each state's job runs at most once, results accumulate in
/// [`job_results`](Self::job_results), and the adapter hears exactly one of
/// `communicate_complete` / `communicate_failure`.
pub struct Run<A: Adapter> {
    id: Uuid,
    adapter: A,
    directory: PathBuf,
    catalog: JobCatalog,
    graph: StateGraph,
    config: RunConfig,
    registry: Registry,
    time_logger: Arc<TimeLogger>,
    current_state: WorkflowState,
    final_message: String,
    job_results: BTreeMap<WorkflowState, JobResult>,
    steps: Vec<StepRecord>,
    started_at: DateTime<Utc>,
    finalized: bool,
}

impl<A: Adapter> Run<A> {
    /// Validate the configuration, read the workflow and prepare the run directory.
    ///
    /// Every configuration defect (bad graph, unknown job, invalid job options)
    /// is reported here rather than mid-run.
    pub fn new(
        adapter: A,
        directory: impl AsRef<Path>,
        config: RunConfig,
        catalog: JobCatalog,
    ) -> Result<Self, RunError> {
        let directory = std::path::absolute(directory.as_ref())?;

        let graph = config.graph()?;

        for state in graph.dispatched_states() {
            let name = graph
                .binding(state)
                .ok_or_else(|| ConfigError::UnboundState(state.clone()))?;
            let options = JobOptions::new(config.debug, config.job_settings(state));
            catalog.build(state, name, &options)?;
        }

        let workflow = adapter.get_workflow(&directory)?;

        let time_logger = Arc::new(TimeLogger::new());
        let mut registry = Registry::new();
        registry.insert(DIRECTORY, directory.clone());
        registry.insert(WORKFLOW, workflow);
        registry.register(RUN_DIRECTORY, |r| {
            match (r.lookup(WORKFLOW), r.lookup(DIRECTORY)) {
                (Some(workflow), Some(dir)) => resolve_run_directory(workflow, dir),
                (None, Some(dir)) => dir.join("run"),
                _ => PathBuf::from("run"),
            }
        });
        registry.insert(TIME_LOGGER, time_logger.clone());
        registry.register(WORKFLOW_ARGUMENTS, |_| Map::new());
        registry.register(OUTPUT_ATTRIBUTES, |_| Map::new());

        let run_directory = registry
            .lookup(RUN_DIRECTORY)
            .cloned()
            .unwrap_or_else(|| directory.join("run"));
        prepare_run_directory(&run_directory, &directory, config.preserve_run_dir)?;

        let run = Self {
            id: Uuid::new_v4(),
            adapter,
            directory,
            catalog,
            graph,
            config,
            registry,
            time_logger,
            current_state: WorkflowState::Queued,
            final_message: String::new(),
            job_results: BTreeMap::new(),
            steps: Vec::new(),
            started_at: Utc::now(),
            finalized: false,
        };
        info!(
            id = %run.id,
            directory = %run.directory.display(),
            run_directory = %run_directory.display(),
            "Initialized workflow run"
        );
        debug!(path = ?run.graph.path(), "Initialized state machine");
        Ok(run)
    }

    /// Execute the workflow to a terminal state.
    ///
    /// Step failures end the run in `errored` and are not errors here; only a
    /// failing adapter or profile write during finalization is returned.
    pub fn run(&mut self) -> Result<WorkflowState, RunError> {
        self.run_with(|_| {})
    }

    /// Like [`run`](Self::run), reporting each step to `observer`.
    pub fn run_with<F>(&mut self, mut observer: F) -> Result<WorkflowState, RunError>
    where
        F: FnMut(StepEvent<'_>),
    {
        if self.finalized {
            return Ok(self.current_state.clone());
        }

        info!(directory = %self.directory.display(), "Starting workflow");
        self.started_at = Utc::now();
        if let Err(e) = self.time_logger.start(WORKFLOW_CHANNEL) {
            warn!("{e}");
        }
        if let Err(e) = self.adapter.communicate_started(&self.directory) {
            self.step_error(StepFailure::new(self.current_state.clone(), e));
        }

        // Anything that unwinds out of the loop still gets a finalized run
        // before the panic continues.
        let looped = panic::catch_unwind(AssertUnwindSafe(|| self.drive(&mut observer)));
        if let Err(payload) = looped {
            let state = self.current_state.clone();
            self.step_error(StepFailure::new(
                state,
                format!("run loop panicked: {}", panic_message(payload.as_ref())),
            ));
            if let Err(e) = self.finalize() {
                error!("Failed to finalize after panic: {e}");
            }
            panic::resume_unwind(payload);
        }

        self.finalize()
    }

    fn drive<F>(&mut self, observer: &mut F)
    where
        F: FnMut(StepEvent<'_>),
    {
        let delay = Duration::from_millis(self.config.step_delay_ms);
        while !self.current_state.is_terminal() {
            if let Some(next) = self.graph.next(&self.current_state).cloned() {
                if !next.is_terminal() {
                    observer(StepEvent::Entering { state: &next });
                }
            }
            let recorded = self.steps.len();
            self.step();
            if let Some(record) = self.steps.get(recorded) {
                observer(StepEvent::Completed { record });
            }
            if !delay.is_zero() && !self.current_state.is_terminal() {
                sleep(delay);
            }
        }
    }

    /// Advance one state. Any failure is contained and moves the run to `errored`.
    pub fn step(&mut self) {
        if self.current_state.is_terminal() {
            return;
        }
        if let Err(failure) = self.try_step() {
            self.step_error(failure);
        }
    }

    fn try_step(&mut self) -> Result<(), StepFailure> {
        let current = self.current_state.clone();
        info!(state = %current, "Current state");
        let next = self.graph.next(&current).cloned().ok_or_else(|| {
            StepFailure::new(current.clone(), ConfigError::MissingTransition(current.clone()))
        })?;
        info!(state = %next, "Next state");

        // Terminal states carry no job.
        if next.is_terminal() {
            self.current_state = next;
            return Ok(());
        }
        if self.job_results.contains_key(&next) {
            return Err(StepFailure::new(next, "job has already run in this workflow"));
        }

        let binding = self
            .graph
            .binding(&next)
            .ok_or_else(|| StepFailure::new(next.clone(), ConfigError::UnboundState(next.clone())))?
            .to_string();
        let options = JobOptions::new(self.config.debug, self.config.job_settings(&next));
        let mut job = self
            .catalog
            .build(&next, &binding, &options)
            .map_err(|e| StepFailure::new(next.clone(), e))?;

        info!(job = %binding, options = ?options.settings, "Running job");
        if options.debug {
            info!(registry = ?self.registry.snapshot(), "Job registry");
        }

        if let Err(e) = self.time_logger.start(next.as_str()) {
            warn!("{e}");
        }
        let started_at = Utc::now();
        let outcome = {
            let mut ctx = JobContext {
                state: &next,
                adapter: &self.adapter,
                registry: &mut self.registry,
            };
            panic::catch_unwind(AssertUnwindSafe(|| job.perform(&mut ctx)))
        };
        self.time_logger.stop(next.as_str());

        let message = match outcome {
            Ok(Ok(result)) => {
                self.steps.push(StepRecord::success(
                    next.clone(),
                    binding,
                    started_at,
                    result.clone(),
                ));
                self.job_results.insert(next.clone(), result);
                self.current_state = next;
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("job panicked: {}", panic_message(payload.as_ref())),
        };
        self.steps.push(StepRecord::failure(
            next.clone(),
            binding,
            started_at,
            message.clone(),
        ));
        Err(StepFailure::new(next, message))
    }

    fn step_error(&mut self, failure: StepFailure) {
        self.final_message = failure.to_string();
        error!("{}", self.final_message);
        self.current_state = WorkflowState::Errored;
    }

    // Runs once, on every way out of the loop. Every action is attempted; the
    // first failure is returned afterwards.
    fn finalize(&mut self) -> Result<WorkflowState, RunError> {
        self.finalized = true;
        info!("Finished workflow - communicating results");
        let mut first_error: Option<RunError> = None;

        let reporting = self
            .config
            .reporting_state
            .as_ref()
            .and_then(|state| self.job_results.get(state));
        if let Some(result) = reporting {
            info!("Sending the reporting results back to the adapter");
            if let Err(e) = self.adapter.communicate_results(&self.directory, result) {
                error!("Failed to communicate results: {e}");
                first_error.get_or_insert(e.into());
            }
        }

        let notified = if self.current_state == WorkflowState::Errored {
            self.adapter.communicate_failure(&self.directory)
        } else {
            self.adapter.communicate_complete(&self.directory)
        };
        if let Err(e) = notified {
            error!("Failed to notify adapter: {e}");
            first_error.get_or_insert(e.into());
        }

        self.time_logger.stop_all();
        let run_directory = self.run_directory();
        if let Err(e) = std::fs::create_dir_all(&run_directory) {
            first_error.get_or_insert(e.into());
        }
        if let Err(e) = self.time_logger.save(&run_directory.join(PROFILE_FILE)) {
            error!("Failed to save time profile: {e}");
            first_error.get_or_insert(e.into());
        }
        if let Err(e) = self.summary().save(&run_directory.join(SUMMARY_FILE)) {
            error!("Failed to write run summary: {e}");
            first_error.get_or_insert(e.into());
        }

        let objectives = match self.registry.lookup(OBJECTIVE_FUNCTION) {
            Some(values) if !values.is_empty() => values
                .iter()
                .map(|v| v.map_or_else(|| "NA".to_string(), |v| v.to_string()))
                .collect::<Vec<_>>()
                .join(","),
            _ => "NA".to_string(),
        };
        info!(objective_function = %objectives, "Workflow complete");

        match first_error {
            Some(e) => Err(e),
            None => Ok(self.current_state.clone()),
        }
    }

    /// The output workflow descriptor for the run so far.
    pub fn summary(&self) -> RunSummary {
        let completed_status = if self.current_state == WorkflowState::Finished {
            CompletedStatus::Success
        } else {
            CompletedStatus::Fail
        };
        RunSummary {
            id: self.id,
            directory: self.directory.clone(),
            run_directory: self.run_directory(),
            final_state: self.current_state.clone(),
            final_message: self.final_message.clone(),
            completed_status,
            started_at: self.started_at,
            completed_at: Utc::now(),
            steps: self.steps.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn current_state(&self) -> &WorkflowState {
        &self.current_state
    }

    /// The terminal state, once the run has been finalized.
    pub fn final_state(&self) -> Option<&WorkflowState> {
        self.finalized.then_some(&self.current_state)
    }

    /// Empty unless the run errored.
    pub fn final_message(&self) -> &str {
        &self.final_message
    }

    pub fn job_results(&self) -> &BTreeMap<WorkflowState, JobResult> {
        &self.job_results
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn graph(&self) -> &StateGraph {
        &self.graph
    }

    pub fn time_logger(&self) -> &Arc<TimeLogger> {
        &self.time_logger
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn run_directory(&self) -> PathBuf {
        self.registry
            .lookup(RUN_DIRECTORY)
            .cloned()
            .unwrap_or_else(|| self.directory.join("run"))
    }
}

// Start from an empty run directory unless asked to keep it. Never removes a
// directory that contains the workflow itself.
fn prepare_run_directory(
    run_directory: &Path,
    directory: &Path,
    preserve: bool,
) -> std::io::Result<()> {
    if run_directory.exists() && !preserve {
        // Compare resolved paths so `..` and symlinks cannot hide the workflow.
        let resolved = run_directory.canonicalize()?;
        let workflow_dir = directory
            .canonicalize()
            .unwrap_or_else(|_| directory.to_path_buf());
        if workflow_dir.starts_with(&resolved) {
            warn!(
                run_directory = %run_directory.display(),
                "Run directory contains the workflow directory, not clearing it"
            );
        } else {
            std::fs::remove_dir_all(run_directory)?;
        }
    }
    std::fs::create_dir_all(run_directory)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
