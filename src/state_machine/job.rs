use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::state::WorkflowState;
use crate::adapter::Adapter;
use crate::error::{ConfigError, JobError};
use crate::registry::Registry;

/// Opaque value produced by one job, stored under the state that ran it.
pub type JobResult = Value;

/// Everything a job may touch while it performs.
pub struct JobContext<'a> {
    /// The state being entered.
    pub state: &'a WorkflowState,
    pub adapter: &'a dyn Adapter,
    pub registry: &'a mut Registry,
}

/// One workflow phase.
///
/// Errors must be returned, not swallowed: the orchestrator turns them into
/// the `errored` state.
pub trait Job {
    fn perform(&mut self, ctx: &mut JobContext<'_>) -> Result<JobResult, JobError>;
}

/// A job with a binding name and typed options, registrable with
/// [`JobCatalog::register`].
pub trait JobType: Job + Sized + 'static {
    const NAME: &'static str;

    /// Defaults come from `Default`; unknown fields should be rejected with
    /// `#[serde(deny_unknown_fields)]`.
    type Options: Default + Serialize + DeserializeOwned;

    fn new(options: Self::Options, debug: bool) -> Self;
}

/// Options for jobs that take none.
#[derive(Debug, Clone, Default, Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoOptions {}

/// Caller-supplied options for one job instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOptions {
    pub debug: bool,
    pub settings: Map<String, Value>,
}

impl JobOptions {
    pub fn new(debug: bool, settings: Map<String, Value>) -> Self {
        Self { debug, settings }
    }

    /// Overlay the caller's settings on `T::default()` and deserialize.
    ///
    /// The merge is shallow and the caller wins on every key it sets.
    pub fn parse<T>(&self, job: &str) -> Result<T, ConfigError>
    where
        T: Default + Serialize + DeserializeOwned,
    {
        let invalid = |source| ConfigError::InvalidJobOptions {
            job: job.to_string(),
            source,
        };
        let mut merged = match serde_json::to_value(T::default()).map_err(invalid)? {
            Value::Object(defaults) => defaults,
            _ => Map::new(),
        };
        for (key, value) in &self.settings {
            merged.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(merged)).map_err(invalid)
    }
}

type Factory = Arc<dyn Fn(&JobOptions) -> Result<Box<dyn Job>, ConfigError> + Send + Sync>;

/// Binding name → job constructor.
#[derive(Clone, Default)]
pub struct JobCatalog {
    factories: BTreeMap<String, Factory>,
}

impl JobCatalog {
    /// An empty catalog. See [`JobCatalog::builtin`] for the stock jobs.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<J: JobType>(&mut self) -> &mut Self {
        self.register_with(J::NAME, |options: &JobOptions| {
            let parsed = options.parse::<J::Options>(J::NAME)?;
            Ok(Box::new(J::new(parsed, options.debug)) as Box<dyn Job>)
        })
    }

    /// Register an arbitrary constructor under `name`, replacing any previous one.
    pub fn register_with<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&JobOptions) -> Result<Box<dyn Job>, ConfigError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build a fresh instance of job `name` for `state`.
    pub fn build(
        &self,
        state: &WorkflowState,
        name: &str,
        options: &JobOptions,
    ) -> Result<Box<dyn Job>, ConfigError> {
        let factory = self.factories.get(name).ok_or_else(|| ConfigError::UnknownJob {
            state: state.clone(),
            job: name.to_string(),
        })?;
        factory(options)
    }
}

impl fmt::Debug for JobCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct SimOptions {
        timesteps: u32,
        keep_sql: bool,
    }

    impl Default for SimOptions {
        fn default() -> Self {
            Self {
                timesteps: 4,
                keep_sql: true,
            }
        }
    }

    struct Sim {
        options: SimOptions,
    }

    impl Job for Sim {
        fn perform(&mut self, _ctx: &mut JobContext<'_>) -> Result<JobResult, JobError> {
            Ok(json!({ "timesteps": self.options.timesteps }))
        }
    }

    impl JobType for Sim {
        const NAME: &'static str = "simulation";
        type Options = SimOptions;

        fn new(options: SimOptions, _debug: bool) -> Self {
            Self { options }
        }
    }

    fn settings(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn caller_options_win() {
        let options = JobOptions::new(false, settings(json!({ "timesteps": 6 })));
        let parsed: SimOptions = options.parse("simulation").unwrap();
        assert_eq!(
            parsed,
            SimOptions {
                timesteps: 6,
                keep_sql: true
            }
        );
    }

    #[test]
    fn unknown_option_is_rejected() {
        let options = JobOptions::new(false, settings(json!({ "timestep": 6 })));
        let err = options.parse::<SimOptions>("simulation").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidJobOptions { ref job, .. } if job == "simulation"));
    }

    #[test]
    fn no_options_accepts_empty_settings_only() {
        assert!(JobOptions::default().parse::<NoOptions>("noop").is_ok());
        let options = JobOptions::new(false, settings(json!({ "verbose": true })));
        assert!(options.parse::<NoOptions>("noop").is_err());
    }

    #[test]
    fn catalog_builds_registered_jobs() {
        let mut catalog = JobCatalog::new();
        catalog.register::<Sim>();
        assert!(catalog.contains("simulation"));
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["simulation"]);

        let state = WorkflowState::from("simulation");
        assert!(
            catalog
                .build(&state, "simulation", &JobOptions::default())
                .is_ok()
        );
    }

    #[test]
    fn catalog_rejects_unknown_names() {
        let catalog = JobCatalog::new();
        let err = catalog
            .build(&"translator".into(), "run_translation", &JobOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownJob { .. }));
    }
}
