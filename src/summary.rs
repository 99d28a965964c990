use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::state_machine::WorkflowState;

/// File written into the run directory at finalization.
pub const SUMMARY_FILE: &str = "out.osw";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletedStatus {
    Success,
    Fail,
}

/// Outcome of one step. Always present on a [`StepRecord`], even when the job
/// returned `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_result: CompletedStatus,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One executed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub state: WorkflowState,
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub result: StepResult,
}

impl StepRecord {
    pub fn success(
        state: WorkflowState,
        job: String,
        started_at: DateTime<Utc>,
        value: Value,
    ) -> Self {
        Self {
            state,
            job,
            started_at,
            completed_at: Utc::now(),
            result: StepResult {
                step_result: CompletedStatus::Success,
                value,
                error: None,
            },
        }
    }

    pub fn failure(
        state: WorkflowState,
        job: String,
        started_at: DateTime<Utc>,
        error: String,
    ) -> Self {
        Self {
            state,
            job,
            started_at,
            completed_at: Utc::now(),
            result: StepResult {
                step_result: CompletedStatus::Fail,
                value: Value::Null,
                error: Some(error),
            },
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

/// The output workflow descriptor of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub directory: PathBuf,
    pub run_directory: PathBuf,
    pub final_state: WorkflowState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub final_message: String,
    pub completed_status: CompletedStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
}

impl RunSummary {
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}
