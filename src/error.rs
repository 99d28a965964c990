use thiserror::Error;

use crate::state_machine::WorkflowState;

/// Configuration defects detected while building a [`Run`](crate::Run).
///
/// These always surface from construction, never mid-run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No transition leaves state '{0}'")]
    MissingTransition(WorkflowState),

    #[error("State '{state}' has more than one outgoing transition ('{first}' and '{second}')")]
    AmbiguousTransition {
        state: WorkflowState,
        first: WorkflowState,
        second: WorkflowState,
    },

    #[error("Terminal state '{0}' cannot have an outgoing transition")]
    TransitionFromTerminal(WorkflowState),

    #[error("State '{0}' cannot be a transition target")]
    TransitionIntoErrored(WorkflowState),

    #[error("Transition graph revisits state '{0}'")]
    Cycle(WorkflowState),

    #[error("Transition from '{0}' is not on the path from 'queued'")]
    Unreachable(WorkflowState),

    #[error("State '{0}' is used by a transition but not declared")]
    UndeclaredState(WorkflowState),

    #[error("State '{0}' is declared more than once")]
    DuplicateState(WorkflowState),

    #[error("Mandatory state '{0}' is missing")]
    MissingMandatoryState(WorkflowState),

    #[error("Initial state must be 'queued', found '{0}'")]
    InvalidInitialState(WorkflowState),

    #[error("State '{0}' has no job binding")]
    UnboundState(WorkflowState),

    #[error("State '{state}' is bound to unknown job '{job}'")]
    UnknownJob { state: WorkflowState, job: String },

    #[error("Job override targets unknown state '{0}'")]
    UnknownOverride(WorkflowState),

    #[error("Job override targets state '{0}', which never runs a job")]
    OverrideWithoutJob(WorkflowState),

    #[error("Reporting state '{0}' is not a job state on the path")]
    InvalidReportingState(WorkflowState),

    #[error("Invalid options for job '{job}': {source}")]
    InvalidJobOptions {
        job: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure raised from inside a job's `perform()`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error("Required registry entry '{0}' is missing")]
    MissingContext(&'static str),

    #[error("Command '{name}' exited with status {code:?}")]
    CommandFailed { name: String, code: Option<i32> },

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Time logger error: {0}")]
    TimeLogger(#[from] TimeLoggerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A job step that did not complete. Always contained by the orchestrator,
/// which ends the run in `errored` with this as its final message.
#[derive(Debug, Clone, Error)]
#[error("Found error in state '{state}' with message {message}")]
pub struct StepFailure {
    pub state: WorkflowState,
    pub message: String,
}

impl StepFailure {
    pub fn new(state: WorkflowState, cause: impl ToString) -> Self {
        Self {
            state,
            message: cause.to_string(),
        }
    }
}

/// Failure raised by an [`Adapter`](crate::adapter::Adapter) callback.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Could not read workflow from {path}: {reason}")]
    Workflow { path: String, reason: String },

    #[error("Adapter unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TimeLoggerError {
    #[error("Channel '{0}' is already running")]
    ChannelAlreadyRunning(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors a caller of [`Run`](crate::Run) can observe.
///
/// Step failures never appear here: they end the run in `errored`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Time logger error: {0}")]
    TimeLogger(#[from] TimeLoggerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
