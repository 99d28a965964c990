use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A phase of a workflow run.
///
/// `Queued`, `Finished` and `Errored` exist in every graph; anything else is
/// caller-defined. Serialized as the lowercase state name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkflowState {
    Queued,
    Finished,
    Errored,
    Named(String),
}

impl WorkflowState {
    pub fn as_str(&self) -> &str {
        match self {
            WorkflowState::Queued => "queued",
            WorkflowState::Finished => "finished",
            WorkflowState::Errored => "errored",
            WorkflowState::Named(name) => name,
        }
    }

    /// `finished` and `errored` end the run loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Finished | WorkflowState::Errored)
    }
}

impl From<&str> for WorkflowState {
    fn from(name: &str) -> Self {
        match name {
            "queued" => WorkflowState::Queued,
            "finished" => WorkflowState::Finished,
            "errored" => WorkflowState::Errored,
            other => WorkflowState::Named(other.to_string()),
        }
    }
}

impl From<String> for WorkflowState {
    fn from(name: String) -> Self {
        match name.as_str() {
            "queued" | "finished" | "errored" => WorkflowState::from(name.as_str()),
            _ => WorkflowState::Named(name),
        }
    }
}

impl From<WorkflowState> for String {
    fn from(state: WorkflowState) -> Self {
        match state {
            WorkflowState::Named(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the transition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transition {
    pub from: WorkflowState,
    pub to: WorkflowState,
}

impl Transition {
    pub fn new(from: impl Into<WorkflowState>, to: impl Into<WorkflowState>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Binds a state to the job invoked when the run enters it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateDescriptor {
    pub state: WorkflowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub initial: bool,
}

impl StateDescriptor {
    pub fn new(state: impl Into<WorkflowState>) -> Self {
        Self {
            state: state.into(),
            job: None,
            initial: false,
        }
    }

    pub fn bound(state: impl Into<WorkflowState>, job: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            job: Some(job.into()),
            initial: false,
        }
    }
}

/// The default path: queued → initialization → commands → reporting → postprocess → finished.
pub fn default_transitions() -> Vec<Transition> {
    vec![
        Transition::new("queued", "initialization"),
        Transition::new("initialization", "commands"),
        Transition::new("commands", "reporting"),
        Transition::new("reporting", "postprocess"),
        Transition::new("postprocess", "finished"),
    ]
}

pub fn default_states() -> Vec<StateDescriptor> {
    vec![
        StateDescriptor {
            initial: true,
            ..StateDescriptor::new("queued")
        },
        StateDescriptor::bound("initialization", "initialization"),
        StateDescriptor::bound("commands", "commands"),
        StateDescriptor::bound("reporting", "reporting"),
        StateDescriptor::bound("postprocess", "postprocess"),
        StateDescriptor::new("finished"),
        StateDescriptor::new("errored"),
    ]
}

/// A validated state graph: a single path from `queued` to `finished`.
#[derive(Debug, Clone)]
pub struct StateGraph {
    states: Vec<StateDescriptor>,
    next: HashMap<WorkflowState, WorkflowState>,
    path: Vec<WorkflowState>,
}

impl StateGraph {
    /// Validate descriptors and transitions.
    ///
    /// Rejects missing mandatory states, undeclared states, branches, cycles,
    /// rows leaving a terminal state, rows targeting `errored` or `queued`,
    /// rows off the main path and intermediate states without a job binding.
    pub fn new(
        states: Vec<StateDescriptor>,
        transitions: Vec<Transition>,
    ) -> Result<Self, ConfigError> {
        let mut declared = HashSet::new();
        for descriptor in &states {
            if !declared.insert(descriptor.state.clone()) {
                return Err(ConfigError::DuplicateState(descriptor.state.clone()));
            }
            if descriptor.initial && descriptor.state != WorkflowState::Queued {
                return Err(ConfigError::InvalidInitialState(descriptor.state.clone()));
            }
        }
        for mandatory in [
            WorkflowState::Queued,
            WorkflowState::Finished,
            WorkflowState::Errored,
        ] {
            if !declared.contains(&mandatory) {
                return Err(ConfigError::MissingMandatoryState(mandatory));
            }
        }

        let mut next: HashMap<WorkflowState, WorkflowState> = HashMap::new();
        for row in &transitions {
            for state in [&row.from, &row.to] {
                if !declared.contains(state) {
                    return Err(ConfigError::UndeclaredState(state.clone()));
                }
            }
            if row.from.is_terminal() {
                return Err(ConfigError::TransitionFromTerminal(row.from.clone()));
            }
            match row.to {
                WorkflowState::Errored => {
                    return Err(ConfigError::TransitionIntoErrored(row.to.clone()));
                }
                WorkflowState::Queued => return Err(ConfigError::Cycle(row.to.clone())),
                _ => {}
            }
            if let Some(existing) = next.get(&row.from) {
                return Err(ConfigError::AmbiguousTransition {
                    state: row.from.clone(),
                    first: existing.clone(),
                    second: row.to.clone(),
                });
            }
            next.insert(row.from.clone(), row.to.clone());
        }

        let mut path = vec![WorkflowState::Queued];
        let mut visited = HashSet::from([WorkflowState::Queued]);
        let mut current = WorkflowState::Queued;
        while current != WorkflowState::Finished {
            let to = next
                .get(&current)
                .ok_or_else(|| ConfigError::MissingTransition(current.clone()))?;
            if !visited.insert(to.clone()) {
                return Err(ConfigError::Cycle(to.clone()));
            }
            path.push(to.clone());
            current = to.clone();
        }

        if let Some(stray) = next.keys().find(|from| !visited.contains(*from)) {
            return Err(ConfigError::Unreachable(stray.clone()));
        }

        let graph = Self { states, next, path };
        for state in graph.dispatched_states() {
            if graph.binding(state).is_none() {
                return Err(ConfigError::UnboundState(state.clone()));
            }
        }
        Ok(graph)
    }

    /// The single next state, if any row leaves `from`.
    pub fn next(&self, from: &WorkflowState) -> Option<&WorkflowState> {
        self.next.get(from)
    }

    /// The job binding name declared for `state`.
    pub fn binding(&self, state: &WorkflowState) -> Option<&str> {
        self.descriptor(state).and_then(|d| d.job.as_deref())
    }

    pub fn descriptor(&self, state: &WorkflowState) -> Option<&StateDescriptor> {
        self.states.iter().find(|d| &d.state == state)
    }

    pub fn contains(&self, state: &WorkflowState) -> bool {
        self.descriptor(state).is_some()
    }

    pub fn states(&self) -> &[StateDescriptor] {
        &self.states
    }

    /// Every state from `queued` to `finished`, in order.
    pub fn path(&self) -> &[WorkflowState] {
        &self.path
    }

    /// The states whose entry dispatches a job.
    pub fn dispatched_states(&self) -> impl Iterator<Item = &WorkflowState> {
        self.path.iter().filter(|s| **s != WorkflowState::Queued && !s.is_terminal())
    }
}
