//! Lazily evaluated, memoized context shared by every job of a run.
//!
//! Entries are addressed by typed [`Key`]s. A producer installed with
//! [`Registry::register`] runs on the first [`Registry::lookup`] of its key and
//! never again, unless the key is registered anew. Producers receive the
//! registry itself, so an entry may be derived from others: only the order of
//! first access matters, never the order of registration.

use std::any::Any;
use std::cell::{Cell, OnceCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::adapter::Workflow;
use crate::time_logger::TimeLogger;

/// Absolute directory holding the workflow document.
pub const DIRECTORY: Key<PathBuf> = Key::new("directory");
/// Directory the run writes into. Derived from [`WORKFLOW`] and [`DIRECTORY`].
pub const RUN_DIRECTORY: Key<PathBuf> = Key::new("run_directory");
pub const WORKFLOW: Key<Workflow> = Key::new("workflow");
pub const TIME_LOGGER: Key<Arc<TimeLogger>> = Key::new("time_logger");
pub const WORKFLOW_ARGUMENTS: Key<Map<String, Value>> = Key::new("workflow_arguments");
/// Attributes reported by steps, keyed by step name.
pub const OUTPUT_ATTRIBUTES: Key<Map<String, Value>> = Key::new("output_attributes");
/// Objective values in workflow order; `None` when the attribute was missing.
pub const OBJECTIVE_FUNCTION: Key<Vec<Option<f64>>> = Key::new("objective_function");

/// A registry key carrying the type of the value stored under it.
pub struct Key<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.name)
    }
}

trait Stored: Any + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + fmt::Debug> Stored for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

type Producer = Box<dyn FnOnce(&Registry) -> Box<dyn Stored>>;

struct Entry {
    // Taken out while the producer runs, so a cyclic lookup sees nothing.
    producer: Cell<Option<Producer>>,
    value: OnceCell<Box<dyn Stored>>,
}

#[derive(Default)]
pub struct Registry {
    entries: HashMap<&'static str, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the deferred computation for `key`.
    pub fn register<T, F>(&mut self, key: Key<T>, producer: F)
    where
        T: Any + fmt::Debug,
        F: FnOnce(&Registry) -> T + 'static,
    {
        let producer: Producer =
            Box::new(move |registry: &Registry| -> Box<dyn Stored> { Box::new(producer(registry)) });
        let replaced = self
            .entries
            .insert(
                key.name,
                Entry {
                    producer: Cell::new(Some(producer)),
                    value: OnceCell::new(),
                },
            )
            .is_some();
        debug!(key = key.name, replaced, "registered registry entry");
    }

    /// Install an already computed value for `key`.
    pub fn insert<T>(&mut self, key: Key<T>, value: T)
    where
        T: Any + fmt::Debug,
    {
        let cell: OnceCell<Box<dyn Stored>> = OnceCell::new();
        let _ = cell.set(Box::new(value));
        self.entries.insert(
            key.name,
            Entry {
                producer: Cell::new(None),
                value: cell,
            },
        );
        debug!(key = key.name, "inserted registry value");
    }

    /// The value under `key`, computing it on first access.
    ///
    /// `None` for unknown keys, for a value of another type, and for a key
    /// whose producer is still running (a dependency cycle).
    pub fn lookup<T: Any>(&self, key: Key<T>) -> Option<&T> {
        let entry = self.entries.get(key.name)?;
        self.force(key.name, entry)?.as_any().downcast_ref::<T>()
    }

    /// Like [`lookup`](Self::lookup), but hands out a mutable reference.
    pub fn lookup_mut<T: Any>(&mut self, key: Key<T>) -> Option<&mut T> {
        self.lookup(key)?;
        let entry = self.entries.get_mut(key.name)?;
        let value: &mut dyn Stored = &mut **entry.value.get_mut()?;
        value.as_any_mut().downcast_mut::<T>()
    }

    /// Whether `key` has been registered. Never runs the producer.
    pub fn contains<T>(&self, key: Key<T>) -> bool {
        self.entries.contains_key(key.name)
    }

    /// Whether the value for `key` has already been computed.
    pub fn is_computed<T>(&self, key: Key<T>) -> bool {
        self.entries
            .get(key.name)
            .is_some_and(|entry| entry.value.get().is_some())
    }

    /// Debug renderings of every computed entry. Pending producers are left alone.
    pub fn snapshot(&self) -> BTreeMap<&'static str, String> {
        self.entries
            .iter()
            .filter_map(|(name, entry)| entry.value.get().map(|v| (*name, format!("{v:?}"))))
            .collect()
    }

    fn force<'a>(&'a self, name: &'static str, entry: &'a Entry) -> Option<&'a dyn Stored> {
        if let Some(value) = entry.value.get() {
            return Some(&**value);
        }
        let producer = entry.producer.take()?;
        debug!(key = name, "computing registry entry");
        let value = producer(self);
        let _ = entry.value.set(value);
        entry.value.get().map(|value| &**value)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("keys", &names).finish()
    }
}
