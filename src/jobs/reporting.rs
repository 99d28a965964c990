use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::workflow;
use crate::error::JobError;
use crate::registry::{OBJECTIVE_FUNCTION, OUTPUT_ATTRIBUTES};
use crate::state_machine::{Job, JobContext, JobResult, JobType};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportingOptions {
    /// Substituted for objectives whose attribute is absent or not numeric.
    pub missing_value: Option<f64>,
}

/// Derives the objective function from the recorded output attributes.
pub struct ReportingJob {
    options: ReportingOptions,
}

impl JobType for ReportingJob {
    const NAME: &'static str = "reporting";
    type Options = ReportingOptions;

    fn new(options: ReportingOptions, _debug: bool) -> Self {
        Self { options }
    }
}

impl Job for ReportingJob {
    fn perform(&mut self, ctx: &mut JobContext<'_>) -> Result<JobResult, JobError> {
        let objectives = workflow(ctx.registry)?.objectives.clone();
        let attributes = ctx
            .registry
            .lookup(OUTPUT_ATTRIBUTES)
            .cloned()
            .unwrap_or_default();

        let mut values = Vec::with_capacity(objectives.len());
        for objective in &objectives {
            let value = objective_value(&attributes, objective)?.or(self.options.missing_value);
            if value.is_none() {
                warn!(objective = %objective, "Objective has no numeric value");
            }
            values.push(value);
        }

        ctx.registry.insert(OBJECTIVE_FUNCTION, values.clone());
        if !values.is_empty() {
            ctx.adapter.communicate_objective_function(&values)?;
        }
        info!(objectives = values.len(), "Reporting complete");

        Ok(json!({
            "objective_function": values,
            "attributes": attributes,
        }))
    }
}

// `step.attribute` → the numeric attribute, if recorded.
fn objective_value(attributes: &Map<String, Value>, objective: &str) -> Result<Option<f64>, JobError> {
    let (step, attribute) = objective.split_once('.').ok_or_else(|| {
        JobError::Failed(format!(
            "objective '{objective}' must have the form 'step.attribute'"
        ))
    })?;
    Ok(attributes
        .get(step)
        .and_then(|a| a.get(attribute))
        .and_then(Value::as_f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Workflow;
    use crate::jobs::testing::{CapturingAdapter, registry};
    use crate::state_machine::WorkflowState;

    fn run_reporting(
        objectives: &[&str],
        options: ReportingOptions,
    ) -> (Result<JobResult, JobError>, CapturingAdapter, Option<Vec<Option<f64>>>) {
        let dir = tempfile::tempdir().unwrap();
        let workflow = Workflow {
            objectives: objectives.iter().map(|o| o.to_string()).collect(),
            ..Workflow::default()
        };
        let mut registry = registry(dir.path(), workflow);
        registry
            .lookup_mut(OUTPUT_ATTRIBUTES)
            .unwrap()
            .insert("sim".into(), json!({ "eui": 51.5, "status": "ok" }));
        let adapter = CapturingAdapter::default();
        let state = WorkflowState::from("reporting");
        let result = {
            let mut ctx = JobContext {
                state: &state,
                adapter: &adapter,
                registry: &mut registry,
            };
            ReportingJob::new(options, false).perform(&mut ctx)
        };
        let stored = registry.lookup(OBJECTIVE_FUNCTION).cloned();
        (result, adapter, stored)
    }

    #[test]
    fn computes_objective_function() {
        let (result, adapter, stored) =
            run_reporting(&["sim.eui", "sim.status"], ReportingOptions::default());
        let result = result.unwrap();
        assert_eq!(result["objective_function"], json!([51.5, null]));
        assert_eq!(stored, Some(vec![Some(51.5), None]));
        assert_eq!(*adapter.objectives.borrow(), Some(vec![Some(51.5), None]));
    }

    #[test]
    fn missing_value_substitutes() {
        let options = ReportingOptions {
            missing_value: Some(1.0e19),
        };
        let (_, _, stored) = run_reporting(&["sim.absent"], options);
        assert_eq!(stored, Some(vec![Some(1.0e19)]));
    }

    #[test]
    fn no_objectives_skips_adapter() {
        let (result, adapter, stored) = run_reporting(&[], ReportingOptions::default());
        assert!(result.is_ok());
        assert_eq!(stored, Some(vec![]));
        assert!(adapter.objectives.borrow().is_none());
    }

    #[test]
    fn malformed_objective_fails() {
        let (result, _, _) = run_reporting(&["eui"], ReportingOptions::default());
        assert!(result.unwrap_err().to_string().contains("step.attribute"));
    }
}
