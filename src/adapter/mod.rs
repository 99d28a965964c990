//! Adapter contract: where a run gets its workflow and where it reports to.

mod local;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AdapterError;

pub use local::LocalAdapter;

/// The workflow document (OSW) supplied by an adapter.
///
/// Only the fields the built-in jobs read are typed; everything else is kept
/// verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    /// Output attribute paths (`step.attribute`) forming the objective function.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objectives: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where the run writes: the workflow's `run_directory` (relative paths are
/// taken from `directory`), or `<directory>/run`.
pub fn resolve_run_directory(workflow: &Workflow, directory: &Path) -> PathBuf {
    match &workflow.run_directory {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => directory.join(dir),
        None => directory.join("run"),
    }
}

/// Supplies the workflow and receives the run's notifications.
///
/// `Run` calls exactly one of `communicate_complete` / `communicate_failure`
/// per run. The output-side callbacks default to no-ops.
pub trait Adapter {
    fn get_workflow(&self, directory: &Path) -> Result<Workflow, AdapterError>;

    fn communicate_started(&self, _directory: &Path) -> Result<(), AdapterError> {
        Ok(())
    }

    fn communicate_results(&self, directory: &Path, results: &Value) -> Result<(), AdapterError>;

    fn communicate_failure(&self, directory: &Path) -> Result<(), AdapterError>;

    fn communicate_complete(&self, directory: &Path) -> Result<(), AdapterError>;

    fn communicate_measure_attributes(
        &self,
        _attributes: &Map<String, Value>,
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    fn communicate_objective_function(&self, _values: &[Option<f64>]) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_keeps_unknown_fields() {
        let json = r#"{
            "seed_file": "example.osm",
            "steps": [{"name": "hello", "command": "echo", "args": ["hi"], "measure_dir_name": "m"}]
        }"#;
        let workflow: Workflow = serde_json::from_str(json).unwrap();
        assert_eq!(workflow.extra["seed_file"], "example.osm");
        assert_eq!(workflow.steps[0].command.as_deref(), Some("echo"));
        assert_eq!(workflow.steps[0].extra["measure_dir_name"], "m");
    }

    #[test]
    fn run_directory_resolution() {
        let dir = Path::new("/work/osw");
        let mut workflow = Workflow::default();
        assert_eq!(resolve_run_directory(&workflow, dir), dir.join("run"));

        workflow.run_directory = Some(PathBuf::from("out"));
        assert_eq!(resolve_run_directory(&workflow, dir), dir.join("out"));

        workflow.run_directory = Some(PathBuf::from("/elsewhere"));
        assert_eq!(resolve_run_directory(&workflow, dir), PathBuf::from("/elsewhere"));
    }
}
