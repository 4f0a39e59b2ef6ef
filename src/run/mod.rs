//! Run Module
//!
//! One comparison of two dumps, from download to queryable indices.
//!
//! ## Responsibilities
//! - Hold the run's identity, source locators and file layout
//! - Track per-stage progress (see [`RunStatus`])
//! - Serialize stages on one run through the stage lock
//! - Hold the built index pair once the index stage is done
//!
//! ## File Layout
//! ```text
//! {work_dir}/runs/{run_id}/
//!   ├── dump-A.rdb          dump-B.rdb
//!   ├── keys-A.txt          keys-B.txt
//!   ├── sorted-keys-A.txt   sorted-keys-B.txt
//!   └── sort-scratch/
//! ```

mod registry;
mod status;

pub use registry::RunRegistry;
pub use status::{RunStatus, Stage, StageAttempt, StageState, StageStatus, StatusSnapshot};

use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard, RwLock};
use rand::distr::Alphanumeric;
use rand::Rng;

use crate::error::{KeyscopeError, Result};
use crate::index::IndexPair;

/// Length of a generated run id
pub const RUN_ID_LEN: usize = 10;

/// Labels of the two dumps of a run, in order
pub const DUMP_LABELS: [&str; 2] = ["A", "B"];

/// Random alphanumeric run identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(String);

impl RunId {
    /// Draw a fresh id; uniqueness is checked by the registry
    pub fn generate() -> Self {
        let id = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(RUN_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// =============================================================================
// File Layout
// =============================================================================

/// Paths of every file a run produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFiles {
    pub dir: PathBuf,
    pub dumps: [PathBuf; 2],
    pub keys: [PathBuf; 2],
    pub sorted_keys: [PathBuf; 2],
    pub sort_scratch: PathBuf,
}

impl RunFiles {
    pub fn new(runs_root: &Path, id: &RunId) -> Self {
        let dir = runs_root.join(id.as_str());
        let per_dump = |name: &str, extension: &str| {
            DUMP_LABELS.map(|label| dir.join(format!("{}-{}.{}", name, label, extension)))
        };

        Self {
            dumps: per_dump("dump", "rdb"),
            keys: per_dump("keys", "txt"),
            sorted_keys: per_dump("sorted-keys", "txt"),
            sort_scratch: dir.join("sort-scratch"),
            dir,
        }
    }
}

// =============================================================================
// Run
// =============================================================================

/// State of one comparison
#[derive(Debug)]
pub struct Run {
    id: RunId,
    sources: [String; 2],
    files: RunFiles,
    status: RunStatus,
    indices: RwLock<Option<IndexPair>>,
    /// Held by the stage currently executing on this run
    stage_lock: Mutex<()>,
}

impl Run {
    pub fn new(id: RunId, sources: [String; 2], runs_root: &Path) -> Self {
        let files = RunFiles::new(runs_root, &id);
        Self {
            id,
            sources,
            files,
            status: RunStatus::default(),
            indices: RwLock::new(None),
            stage_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    /// Locators of the two dumps
    pub fn sources(&self) -> &[String; 2] {
        &self.sources
    }

    pub fn files(&self) -> &RunFiles {
        &self.files
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    /// The built index pair, if the index stage has completed
    pub fn indices(&self) -> Option<IndexPair> {
        self.indices.read().clone()
    }

    pub(crate) fn set_indices(&self, pair: IndexPair) {
        *self.indices.write() = Some(pair);
    }

    pub(crate) fn clear_indices(&self) {
        *self.indices.write() = None;
    }

    /// Claim the run for one stage
    ///
    /// Fails with `StageBusy` instead of waiting when another stage holds it.
    pub(crate) fn try_lock_stage(&self) -> Result<MutexGuard<'_, ()>> {
        self.stage_lock
            .try_lock()
            .ok_or_else(|| KeyscopeError::StageBusy(self.id.to_string()))
    }
}
