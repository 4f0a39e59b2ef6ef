//! Pipeline Module
//!
//! Turns two dump locators into two queryable indices.
//!
//! ## Stages
//! ```text
//!   fetch ──► extract (tool + sort) ──► index
//!   2 dumps     2 processes, 2 sorts      2 tries
//! ```
//!
//! Stages run strictly in order on one run; inside a stage the two dumps are
//! handled concurrently on a bounded [`WorkerPool`] with one deadline.
//!
//! ## Status Bookkeeping
//! Every stage:
//! 1. Claims the run's stage lock (`StageBusy` if another stage holds it)
//! 2. Checks that the upstream stage is done
//! 3. Marks itself in progress; a failure restores the previous status
//! 4. On success resets every downstream stage and records its duration
//!
//! ## Staged Outputs
//! Fetch and extract write `{file}.partial` next to each output and rename
//! it over the output only once the whole stage succeeded. A failed re-run
//! therefore leaves the files of the last successful run in place, matching
//! the status that the failed attempt restores.

mod extract;
mod fetch;
mod pool;
mod sort;

pub use extract::{ExtractJob, Extractor};
pub use fetch::{FetchTransport, Fetcher, HttpTransport, LocalTransport, SchemeTransport};
pub use pool::{CancelToken, WorkerPool};
pub use sort::{ExternalSorter, SortStats};

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{KeyscopeError, Result};
use crate::index::IndexBuilder;
use crate::run::{Run, Stage, DUMP_LABELS};

/// Executes pipeline stages on runs
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    transport: Arc<dyn FetchTransport>,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, transport: Arc<dyn FetchTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Download both dumps of `run`
    pub fn fetch(&self, run: &Run) -> Result<Duration> {
        self.execute_stage(run, Stage::Fetch, || {
            fs::create_dir_all(&run.files().dir)?;
            let jobs: Vec<_> = run
                .sources()
                .iter()
                .cloned()
                .zip(run.files().dumps.iter().cloned())
                .collect();

            Fetcher::new(
                self.config.fetch_workers,
                self.config.fetch_timeout,
                Arc::clone(&self.transport),
            )
            .fetch(&jobs)
        })
    }

    /// Extract and sort the keys of both dumps
    pub fn extract(&self, run: &Run) -> Result<Duration> {
        self.execute_stage(run, Stage::Extract, || {
            let files = run.files();
            let jobs: Vec<ExtractJob> = DUMP_LABELS
                .iter()
                .enumerate()
                .map(|(i, label)| ExtractJob {
                    label: label.to_string(),
                    dump: files.dumps[i].clone(),
                    keys: files.keys[i].clone(),
                    sorted: files.sorted_keys[i].clone(),
                    scratch: files.sort_scratch.clone(),
                })
                .collect();

            Extractor::from_config(&self.config).extract(&jobs)
        })
    }

    /// Build both indices from the sorted key files
    pub fn build_index(&self, run: &Run) -> Result<Duration> {
        self.execute_stage(run, Stage::Index, || {
            let started = std::time::Instant::now();
            let [first, second] = &run.files().sorted_keys;
            let pair = IndexBuilder::from_config(&self.config).build_pair(first, second)?;
            run.set_indices(pair);
            Ok(started.elapsed())
        })
    }

    /// Run every stage in order, stopping at the first failure
    pub fn process(&self, run: &Run) -> Result<Duration> {
        let mut total = Duration::ZERO;
        total += self.fetch(run)?;
        total += self.extract(run)?;
        total += self.build_index(run)?;
        tracing::info!("Run {} ready for queries after {:?}", run.id(), total);
        Ok(total)
    }

    /// Shared bookkeeping around one stage body
    fn execute_stage<F>(&self, run: &Run, stage: Stage, body: F) -> Result<Duration>
    where
        F: FnOnce() -> Result<Duration>,
    {
        // Step 1: Only one stage per run at a time
        let _stage_lock = run.try_lock_stage()?;

        // Step 2: Upstream must be done
        if let Some(upstream) = stage.upstream() {
            if !run.status().stage(upstream).is_done() {
                return Err(KeyscopeError::StagePrecondition {
                    stage: stage.name().to_string(),
                    reason: format!("{} has not completed", upstream),
                });
            }
        }

        tracing::info!("Run {}: starting {}", run.id(), stage);

        // Step 3: Attempt reverts the status if the body fails
        let attempt = run.status().stage(stage).begin();
        if let Err(e) = body() {
            tracing::warn!("Run {}: {} failed: {}", run.id(), stage, e);
            return Err(e);
        }

        // Step 4: Whatever was built downstream is now stale
        for &downstream in stage.downstream() {
            run.status().stage(downstream).reset();
        }
        if stage != Stage::Index {
            run.clear_indices();
        }

        let elapsed = attempt.commit();
        tracing::info!("Run {}: {} completed in {:?}", run.id(), stage, elapsed);
        Ok(elapsed)
    }
}

// =============================================================================
// Staged Outputs
// =============================================================================

const PARTIAL_SUFFIX: &str = ".partial";

/// Path a stage writes before publishing `path`: "dump-A.rdb.partial"
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Rename every staged file over its output
pub(crate) fn publish(outputs: &[&Path]) -> Result<()> {
    for output in outputs {
        fs::rename(partial_path(output), output)?;
    }
    Ok(())
}

/// Delete every staged file, ignoring ones that were never written
pub(crate) fn discard(outputs: &[&Path]) {
    for output in outputs {
        let partial = partial_path(output);
        match fs::remove_file(&partial) {
            Ok(()) => tracing::debug!("Discarded {}", partial.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove {}: {}", partial.display(), e),
        }
    }
}
