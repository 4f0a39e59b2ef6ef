//! Run Registry
//!
//! Concurrent map of live runs, shared by everything that serves them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{KeyscopeError, Result};

use super::{Run, RunId};

/// Thread-safe registry of runs by id
///
/// Injected into the engine rather than held globally, so tests and embedders
/// can run several registries side by side.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<RunId, Arc<Run>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run comparing `first` with `second`
    ///
    /// Ids are drawn until one is unused; the draw and the insert happen
    /// under one write lock.
    pub fn create(&self, runs_root: &Path, first: impl Into<String>, second: impl Into<String>) -> Arc<Run> {
        let sources = [first.into(), second.into()];
        let mut runs = self.runs.write();

        let id = loop {
            let id = RunId::generate();
            if !runs.contains_key(&id) {
                break id;
            }
            tracing::debug!("Run id {} already taken, drawing again", id);
        };

        let run = Arc::new(Run::new(id.clone(), sources, runs_root));
        runs.insert(id, Arc::clone(&run));
        run
    }

    pub fn get(&self, id: &RunId) -> Result<Arc<Run>> {
        self.runs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| KeyscopeError::RunNotFound(id.to_string()))
    }

    /// Unregister a run, returning it so the caller can clean up its files
    pub fn remove(&self, id: &RunId) -> Result<Arc<Run>> {
        self.runs
            .write()
            .remove(id)
            .ok_or_else(|| KeyscopeError::RunNotFound(id.to_string()))
    }

    /// Ids of every registered run, sorted
    pub fn list(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.runs.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}
