//! Wall-clock timing of named, possibly overlapping phases.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TimeLoggerError;

/// One stopped channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub name: String,
    /// Elapsed seconds.
    pub delta: f64,
}

#[derive(Debug, Default)]
struct Channels {
    active: HashMap<String, Instant>,
    history: Vec<TimeEntry>,
}

/// Times named channels. Safe to share between threads behind an `Arc`.
#[derive(Debug, Default)]
pub struct TimeLogger {
    inner: Mutex<Channels>,
}

impl TimeLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open channel `name`. Fails if it is already running.
    pub fn start(&self, name: &str) -> Result<(), TimeLoggerError> {
        let mut inner = self.lock();
        if inner.active.contains_key(name) {
            return Err(TimeLoggerError::ChannelAlreadyRunning(name.to_string()));
        }
        inner.active.insert(name.to_string(), Instant::now());
        debug!(channel = name, "time channel started");
        Ok(())
    }

    /// Close channel `name` and record its delta. A no-op if it is not running.
    pub fn stop(&self, name: &str) {
        let mut inner = self.lock();
        Self::close(&mut inner, name);
    }

    /// Close every running channel.
    pub fn stop_all(&self) {
        let mut inner = self.lock();
        let names: Vec<String> = inner.active.keys().cloned().collect();
        for name in names {
            Self::close(&mut inner, &name);
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock().active.contains_key(name)
    }

    /// Every stopped channel, in stop order.
    pub fn report(&self) -> Vec<TimeEntry> {
        self.lock().history.clone()
    }

    /// All recorded deltas for `name`, one `{name: delta}` map per start/stop cycle.
    pub fn delta(&self, name: &str) -> Vec<BTreeMap<String, f64>> {
        self.lock()
            .history
            .iter()
            .filter(|entry| entry.name == name)
            .map(|entry| BTreeMap::from([(entry.name.clone(), entry.delta)]))
            .collect()
    }

    /// Write the history to `path` as JSON, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<(), TimeLoggerError> {
        let report = self.report();
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), entries = report.len(), "saved time profile");
        Ok(())
    }

    fn close(inner: &mut Channels, name: &str) {
        if let Some(started) = inner.active.remove(name) {
            let delta = started.elapsed().as_secs_f64();
            debug!(channel = name, delta, "time channel stopped");
            inner.history.push(TimeEntry {
                name: name.to_string(),
                delta,
            });
        }
    }

    fn lock(&self) -> MutexGuard<'_, Channels> {
        // A panic while holding the lock cannot leave the maps half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
