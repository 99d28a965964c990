//! Adapter local baseado no sistema de arquivos.
//!
//! O [`LocalAdapter`] lê o workflow de `workflow.osw` e grava as notificações
//! da execução (`started.job`, `finished.job`, `failed.job`, `results.json`,
//! ...) no diretório de saída.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{Adapter, Workflow, resolve_run_directory};
use crate::error::AdapterError;

/// Nome padrão do documento de workflow dentro do diretório.
pub const DEFAULT_OSW: &str = "workflow.osw";

/// Adapter de entrada e saída sobre arquivos locais.
#[derive(Debug, Default)]
pub struct LocalAdapter {
    osw_path: Option<PathBuf>,
    output_directory: Option<PathBuf>,
    // Diretório de execução do último workflow lido.
    resolved: Mutex<Option<PathBuf>>,
}

impl LocalAdapter {
    /// Lê `<diretório>/workflow.osw` e grava no diretório de execução.
    pub fn new() -> Self {
        Self::default()
    }

    /// Usa um arquivo OSW explícito em vez de `<diretório>/workflow.osw`.
    pub fn with_osw_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.osw_path = Some(path.into());
        self
    }

    /// Grava as notificações em `dir` em vez do diretório de execução.
    pub fn with_output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(dir.into());
        self
    }

    fn osw_path(&self, directory: &Path) -> PathBuf {
        self.osw_path
            .clone()
            .unwrap_or_else(|| directory.join(DEFAULT_OSW))
    }

    // Sem diretório explícito, segue o `run_directory` do próprio workflow.
    fn output_directory(&self, directory: &Path) -> PathBuf {
        self.known_output_directory()
            .unwrap_or_else(|| directory.join("run"))
    }

    fn known_output_directory(&self) -> Option<PathBuf> {
        self.output_directory.clone().or_else(|| {
            self.resolved
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }

    fn require_output_directory(&self) -> Result<PathBuf, AdapterError> {
        let out = self.known_output_directory().ok_or_else(|| {
            AdapterError::Unavailable("workflow has not been read yet".into())
        })?;
        std::fs::create_dir_all(&out)?;
        Ok(out)
    }

    fn write(&self, directory: &Path, file: &str, contents: &str) -> Result<(), AdapterError> {
        let out = self.output_directory(directory);
        std::fs::create_dir_all(&out)?;
        let path = out.join(file);
        std::fs::write(&path, contents)?;
        debug!(path = %path.display(), "adapter wrote file");
        Ok(())
    }

    fn write_json(&self, directory: &Path, file: &str, value: &Value) -> Result<(), AdapterError> {
        self.write(directory, file, &serde_json::to_string_pretty(value)?)
    }
}

impl Adapter for LocalAdapter {
    fn get_workflow(&self, directory: &Path) -> Result<Workflow, AdapterError> {
        let path = self.osw_path(directory);
        let contents = std::fs::read_to_string(&path).map_err(|e| AdapterError::Workflow {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let workflow: Workflow =
            serde_json::from_str(&contents).map_err(|e| AdapterError::Workflow {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let run_directory = resolve_run_directory(&workflow, directory);
        let previous = self
            .resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(run_directory.clone());
        if previous.as_ref().is_some_and(|p| p != &run_directory) {
            debug!(run_directory = %run_directory.display(), "Switched output directory");
        }
        Ok(workflow)
    }

    fn communicate_started(&self, directory: &Path) -> Result<(), AdapterError> {
        self.write(directory, "started.job", &Utc::now().to_rfc3339())
    }

    fn communicate_results(&self, directory: &Path, results: &Value) -> Result<(), AdapterError> {
        info!("Writing reporting results to results.json");
        self.write_json(directory, "results.json", results)
    }

    fn communicate_failure(&self, directory: &Path) -> Result<(), AdapterError> {
        self.write(directory, "failed.job", &Utc::now().to_rfc3339())
    }

    fn communicate_complete(&self, directory: &Path) -> Result<(), AdapterError> {
        self.write(directory, "finished.job", &Utc::now().to_rfc3339())
    }

    fn communicate_measure_attributes(
        &self,
        attributes: &Map<String, Value>,
    ) -> Result<(), AdapterError> {
        let out = self.require_output_directory()?;
        let json = serde_json::to_string_pretty(attributes)?;
        std::fs::write(out.join("measure_attributes.json"), json)?;
        Ok(())
    }

    fn communicate_objective_function(&self, values: &[Option<f64>]) -> Result<(), AdapterError> {
        let out = self.require_output_directory()?;
        let json = serde_json::to_string_pretty(values)?;
        std::fs::write(out.join("objectives.json"), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_osw(dir: &Path, body: &str) {
        std::fs::write(dir.join(DEFAULT_OSW), body).unwrap();
    }

    #[test]
    fn reads_workflow_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_osw(dir.path(), r#"{"steps": [{"name": "a"}]}"#);
        let workflow = LocalAdapter::new().get_workflow(dir.path()).unwrap();
        assert_eq!(workflow.steps.len(), 1);
    }

    #[test]
    fn missing_workflow_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalAdapter::new().get_workflow(dir.path()).unwrap_err();
        assert!(matches!(err, AdapterError::Workflow { .. }));
    }

    #[test]
    fn malformed_workflow_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_osw(dir.path(), "{ not json");
        let err = LocalAdapter::new().get_workflow(dir.path()).unwrap_err();
        assert!(err.to_string().contains("workflow.osw"));
    }

    #[test]
    fn notifications_land_in_run_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_osw(dir.path(), r#"{"run_directory": "out"}"#);
        let adapter = LocalAdapter::new();
        adapter.get_workflow(dir.path()).unwrap();

        adapter.communicate_complete(dir.path()).unwrap();
        adapter
            .communicate_results(dir.path(), &serde_json::json!({"eui": 42.0}))
            .unwrap();

        assert!(dir.path().join("out/finished.job").exists());
        let results = std::fs::read_to_string(dir.path().join("out/results.json")).unwrap();
        assert!(results.contains("42.0"));
    }

    #[test]
    fn attributes_need_a_known_directory() {
        let err = LocalAdapter::new()
            .communicate_measure_attributes(&Map::new())
            .unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable(_)));
    }

    #[test]
    fn explicit_paths_take_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let osw = dir.path().join("custom.osw");
        std::fs::write(&osw, "{}").unwrap();
        let out = dir.path().join("elsewhere");
        let adapter = LocalAdapter::new()
            .with_osw_path(&osw)
            .with_output_directory(&out);

        adapter.get_workflow(dir.path()).unwrap();
        adapter.communicate_failure(dir.path()).unwrap();
        adapter.communicate_objective_function(&[Some(1.5), None]).unwrap();

        assert!(out.join("failed.job").exists());
        let objectives = std::fs::read_to_string(out.join("objectives.json")).unwrap();
        assert!(objectives.contains("null"));
    }

    #[test]
    fn latest_workflow_decides_output_directory() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_osw(first.path(), "{}");
        write_osw(second.path(), "{}");
        let adapter = LocalAdapter::new();

        adapter.get_workflow(first.path()).unwrap();
        adapter.get_workflow(second.path()).unwrap();
        adapter.communicate_objective_function(&[Some(2.0)]).unwrap();

        assert!(second.path().join("run/objectives.json").exists());
        assert!(!first.path().join("run/objectives.json").exists());
    }
}
