//! Index Builder
//!
//! Builds the two indices of a run from their sorted key files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{KeyscopeError, Result};
use crate::pipeline::{CancelToken, WorkerPool};

use super::{CompactPrefixIndex, PrefixIndex, PrefixLookup};

/// How often (in lines) a build checks for cancellation
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// How often (in lines) a build reports progress
const PROGRESS_INTERVAL: u64 = 100_000;

/// The two indices of a run, one per dump
#[derive(Clone)]
pub struct IndexPair {
    pub first: Arc<dyn PrefixLookup>,
    pub second: Arc<dyn PrefixLookup>,
}

impl IndexPair {
    /// Report labels of the two indices, in run order
    pub const LABELS: [&'static str; 2] = ["first database", "second database"];

    /// Both indices with their report labels
    pub fn labeled(&self) -> [(&'static str, &Arc<dyn PrefixLookup>); 2] {
        [(Self::LABELS[0], &self.first), (Self::LABELS[1], &self.second)]
    }
}

impl std::fmt::Debug for IndexPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexPair")
            .field("first_nodes", &self.first.node_count())
            .field("second_nodes", &self.second.node_count())
            .finish()
    }
}

/// Builds prefix indices from sorted key files
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    delimiter: char,
    workers: usize,
    timeout: Duration,
    compact: bool,
}

impl IndexBuilder {
    pub fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            workers: 2,
            timeout: Duration::from_secs(300),
            compact: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            delimiter: config.delimiter,
            workers: config.index_workers,
            timeout: config.index_timeout,
            compact: config.compact_indices,
        }
    }

    /// Replace built indices by their compacted form
    pub fn compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    /// Read one key per line from `path` into a new index
    ///
    /// A line that is not valid UTF-8 is an invariant violation.
    pub fn build_file(&self, path: &Path, cancel: &CancelToken) -> Result<PrefixIndex> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut index = PrefixIndex::new(self.delimiter);
        let mut line = Vec::new();
        let mut line_number: u64 = 0;

        tracing::info!("Reading keys from {}", path.display());

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            line_number += 1;

            if line.last() == Some(&b'\n') {
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
            }
            let key = std::str::from_utf8(&line).map_err(|e| {
                KeyscopeError::InvariantViolation(format!(
                    "{}:{}: key is not valid UTF-8 ({})",
                    path.display(),
                    line_number,
                    e
                ))
            })?;
            tracing::trace!("{}:{}: {}", path.display(), line_number, key);
            index.insert(key);

            if line_number % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check("index")?;
            }
            if line_number % PROGRESS_INTERVAL == 0 {
                tracing::debug!(
                    "{}: {} keys read, {} nodes",
                    path.display(),
                    line_number,
                    index.node_count()
                );
            }
        }

        tracing::info!(
            "Indexed {} keys from {} into {} nodes",
            line_number,
            path.display(),
            index.node_count()
        );

        Ok(index)
    }

    /// Build one index, compacting it when configured
    pub fn build_lookup(&self, path: &Path, cancel: &CancelToken) -> Result<Arc<dyn PrefixLookup>> {
        let index = self.build_file(path, cancel)?;
        if self.compact {
            return Ok(Arc::new(CompactPrefixIndex::build(&index)));
        }
        Ok(Arc::new(index))
    }

    /// Build both indices of a run concurrently
    ///
    /// Fails as a unit if either build fails, panics, or the pair does not
    /// finish within the index timeout.
    pub fn build_pair(&self, first: &Path, second: &Path) -> Result<IndexPair> {
        let pool = WorkerPool::new("index", self.workers, self.timeout);
        let tasks: Vec<_> = [first, second]
            .into_iter()
            .map(|path| move |cancel: &CancelToken| self.build_lookup(path, cancel))
            .collect();

        let mut built = pool.run(tasks)?.into_iter();
        match (built.next(), built.next()) {
            (Some(first), Some(second)) => Ok(IndexPair { first, second }),
            _ => Err(KeyscopeError::InvariantViolation(
                "index pool returned fewer than two indices".to_string(),
            )),
        }
    }
}
