//! Configuração de execução do stepflow carregada a partir de `stepflow.toml`.
//!
//! A struct [`RunConfig`] contém todos os parâmetros de uma execução: o grafo
//! de estados, os jobs associados a cada estado e as opções gerais. Campos
//! desconhecidos são rejeitados. Valores ausentes usam os defaults.
//! A variável de ambiente `STEPFLOW_DEBUG` ativa o modo debug.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::state_machine::{
    StateDescriptor, StateGraph, Transition, WorkflowState, default_states, default_transitions,
};

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "stepflow.toml";

/// Configuração de nível superior de uma execução.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Tabela de transições; substitui o caminho padrão por inteiro.
    #[serde(default = "default_transitions")]
    pub transitions: Vec<Transition>,

    /// Estados declarados e o job de cada um.
    #[serde(default = "default_states")]
    pub states: Vec<StateDescriptor>,

    /// Substituições por estado: outro job e/ou opções do job.
    #[serde(default)]
    pub jobs: BTreeMap<WorkflowState, JobOverride>,

    /// Destinos do log.
    #[serde(default = "default_targets")]
    pub targets: Vec<LogTarget>,

    /// Modo detalhado, repassado a todos os jobs.
    #[serde(default)]
    pub debug: bool,

    /// Estado cujo resultado é enviado ao adapter por `communicate_results`.
    #[serde(default = "default_reporting_state")]
    pub reporting_state: Option<WorkflowState>,

    /// Pausa entre passos, em milissegundos. Zero desativa.
    #[serde(default)]
    pub step_delay_ms: u64,

    /// Mantém o diretório de execução existente em vez de recriá-lo.
    #[serde(default)]
    pub preserve_run_dir: bool,
}

/// Substituição do job ou das opções de um estado.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

/// Destino de log: saída padrão ou `run.log` no diretório de execução.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    Stdout,
    File,
}

// Por padrão o log vai para a saída padrão e para `run.log`.
fn default_targets() -> Vec<LogTarget> {
    vec![LogTarget::Stdout, LogTarget::File]
}

// Estado de relatório padrão: "reporting".
fn default_reporting_state() -> Option<WorkflowState> {
    Some(WorkflowState::from("reporting"))
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            transitions: default_transitions(),
            states: default_states(),
            jobs: BTreeMap::new(),
            targets: default_targets(),
            debug: false,
            reporting_state: default_reporting_state(),
            step_delay_ms: 0,
            preserve_run_dir: false,
        }
    }
}

impl RunConfig {
    /// Carrega a configuração de `path`, ou de `stepflow.toml` no diretório atual.
    /// Usa valores padrão se nenhum caminho for dado e o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE).exists() => Self::from_file(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };

        // Variável de ambiente ativa o debug sem editar o arquivo.
        if let Ok(value) = std::env::var("STEPFLOW_DEBUG") {
            if matches!(value.as_str(), "1" | "true" | "yes") {
                config.debug = true;
            }
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str::<RunConfig>(&contents)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    /// Valida o grafo de estados já com as substituições de job aplicadas.
    pub fn graph(&self) -> std::result::Result<StateGraph, ConfigError> {
        let mut states = self.states.clone();
        for (state, overrides) in &self.jobs {
            let descriptor = states
                .iter_mut()
                .find(|d| &d.state == state)
                .ok_or_else(|| ConfigError::UnknownOverride(state.clone()))?;
            if let Some(job) = &overrides.job {
                descriptor.job = Some(job.clone());
            }
        }
        let graph = StateGraph::new(states, self.transitions.clone())?;

        let dispatched = |state: &WorkflowState| graph.dispatched_states().any(|s| s == state);
        if let Some(state) = self.jobs.keys().find(|s| !dispatched(*s)) {
            return Err(ConfigError::OverrideWithoutJob(state.clone()));
        }
        if let Some(state) = &self.reporting_state {
            if !dispatched(state) {
                return Err(ConfigError::InvalidReportingState(state.clone()));
            }
        }
        Ok(graph)
    }

    /// Opções passadas ao job de `state`.
    pub fn job_settings(&self, state: &WorkflowState) -> Map<String, Value> {
        self.jobs
            .get(state)
            .map(|o| o.options.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = RunConfig::default();
        assert_eq!(config.transitions.len(), 5);
        assert_eq!(config.states.len(), 7);
        assert_eq!(config.targets, vec![LogTarget::Stdout, LogTarget::File]);
        assert_eq!(config.reporting_state, Some(WorkflowState::from("reporting")));
        assert!(!config.debug);
        assert_eq!(config.step_delay_ms, 0);
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            debug = true
            targets = ["stdout"]

            [jobs.commands]
            options = { allow_failure = true }

            [jobs.reporting]
            job = "custom_reporting"
        "#;
        let config: RunConfig = toml::from_str(toml_str).unwrap();
        assert!(config.debug);
        assert_eq!(config.targets, vec![LogTarget::Stdout]);
        assert_eq!(config.transitions, default_transitions());
        assert_eq!(
            config.job_settings(&"commands".into())["allow_failure"],
            Value::Bool(true)
        );
        assert_eq!(
            config.jobs[&WorkflowState::from("reporting")].job.as_deref(),
            Some("custom_reporting")
        );
    }

    #[test]
    fn deserialize_custom_graph() {
        let toml_str = r#"
            reporting_state = "a"

            [[transitions]]
            from = "queued"
            to = "a"

            [[transitions]]
            from = "a"
            to = "finished"

            [[states]]
            state = "queued"
            initial = true

            [[states]]
            state = "a"
            job = "noop"

            [[states]]
            state = "finished"

            [[states]]
            state = "errored"
        "#;
        let config: RunConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.transitions[0], Transition::new("queued", "a"));
        assert_eq!(config.states[1].job.as_deref(), Some("noop"));
        assert_eq!(config.reporting_state, Some(WorkflowState::from("a")));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = toml::from_str::<RunConfig>("verbose = true").unwrap_err();
        assert!(err.to_string().contains("verbose"));

        let err = toml::from_str::<RunConfig>("[jobs.commands]\nargs = 1").unwrap_err();
        assert!(err.to_string().contains("args"));
    }

    #[test]
    fn graph_applies_job_overrides() {
        let config: RunConfig = toml::from_str("[jobs.reporting]\njob = \"custom\"").unwrap();
        let graph = config.graph().unwrap();
        assert_eq!(graph.binding(&"reporting".into()), Some("custom"));
        assert_eq!(graph.binding(&"commands".into()), Some("commands"));
    }

    #[test]
    fn graph_rejects_override_of_undeclared_state() {
        let config: RunConfig = toml::from_str("[jobs.simulation]\njob = \"x\"").unwrap();
        assert!(matches!(
            config.graph(),
            Err(ConfigError::UnknownOverride(_))
        ));
    }

    #[test]
    fn graph_rejects_override_of_terminal_state() {
        let config: RunConfig =
            toml::from_str("[jobs.finished]\noptions = { verbose = true }").unwrap();
        assert!(matches!(
            config.graph(),
            Err(ConfigError::OverrideWithoutJob(WorkflowState::Finished))
        ));
    }

    #[test]
    fn graph_rejects_reporting_state_off_the_path() {
        let mut config = RunConfig::default();
        config.reporting_state = Some("summary".into());
        assert!(matches!(
            config.graph(),
            Err(ConfigError::InvalidReportingState(_))
        ));

        config.reporting_state = Some(WorkflowState::Queued);
        assert!(config.graph().is_err());

        config.reporting_state = None;
        assert!(config.graph().is_ok());
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "step_delay_ms = 25\npreserve_run_dir = true").unwrap();
        let config = RunConfig::load(Some(&path)).unwrap();
        assert_eq!(config.step_delay_ms, 25);
        assert!(config.preserve_run_dir);
    }

    #[test]
    fn load_fails_on_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
