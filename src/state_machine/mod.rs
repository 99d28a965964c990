mod job;
mod state;

pub use job::{Job, JobCatalog, JobContext, JobOptions, JobResult, JobType, NoOptions};
pub use state::{
    StateDescriptor, StateGraph, Transition, WorkflowState, default_states, default_transitions,
};
