//! External Sorter
//!
//! Disk-backed merge sort of newline-delimited files.
//!
//! ## Algorithm
//! 1. Read lines into an arena until the run budget is reached
//! 2. Sort the arena and write it as a numbered run file
//! 3. Merge runs `fan_in` at a time until one pass can produce the output
//!
//! Lines compare as raw bytes, which for UTF-8 text is code point order.
//! Duplicates are kept.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::config::Config;
use crate::error::{KeyscopeError, Result};

use super::CancelToken;

/// Budget charged per line beyond its bytes: the `Vec` header and a newline
const LINE_OVERHEAD: usize = std::mem::size_of::<Vec<u8>>() + 1;

/// Summary of one sort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortStats {
    /// Lines written to the output
    pub lines: u64,
    /// Sorted runs written before merging
    pub runs: usize,
    /// Merge passes over the runs, final pass included
    pub merge_passes: usize,
}

/// Disk-backed merge sort
#[derive(Debug, Clone)]
pub struct ExternalSorter {
    /// Memory held per run: line bytes plus per-line overhead
    run_budget_bytes: usize,
    /// Runs merged at once
    fan_in: usize,
    /// Next run file number (shared by all sorts of this sorter)
    next_run_id: std::sync::Arc<AtomicU64>,
}

impl ExternalSorter {
    pub fn new(run_budget_bytes: usize, fan_in: usize) -> Self {
        Self {
            run_budget_bytes: run_budget_bytes.max(1),
            fan_in: fan_in.max(2),
            next_run_id: std::sync::Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sort_run_budget_bytes, config.sort_fan_in)
    }

    /// Sort `input` into `output`, using `scratch_dir` for run files
    ///
    /// The scratch directory is created if missing; the runs this sort wrote
    /// are removed before returning, whether it succeeded or not.
    pub fn sort_file(
        &self,
        input: &Path,
        output: &Path,
        scratch_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<SortStats> {
        let sort_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| KeyscopeError::Sort { path, source }
        };

        fs::create_dir_all(scratch_dir).map_err(sort_error(scratch_dir))?;

        let mut created = Vec::new();
        let outcome = self.sort_inner(input, output, scratch_dir, cancel, &mut created);

        for run in &created {
            if let Err(e) = fs::remove_file(run) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Could not remove sort run {}: {}", run.display(), e);
                }
            }
        }

        outcome
    }

    fn sort_inner(
        &self,
        input: &Path,
        output: &Path,
        scratch_dir: &Path,
        cancel: &CancelToken,
        created: &mut Vec<PathBuf>,
    ) -> Result<SortStats> {
        // Step 1: Split the input into sorted runs
        let (mut runs, lines) = self
            .write_runs(input, scratch_dir, cancel, created)
            .map_err(|e| into_sort_error(e, input))?;
        let initial_runs = runs.len();
        let mut merge_passes = 0;

        tracing::debug!(
            "Split {} into {} sorted run(s) of {} lines total",
            input.display(),
            initial_runs,
            lines
        );

        // Step 2: Intermediate passes until the final merge fits the fan-in
        while runs.len() > self.fan_in {
            cancel.check("sort")?;
            let mut next_pass = Vec::with_capacity(runs.len().div_ceil(self.fan_in));
            for chunk in runs.chunks(self.fan_in) {
                let merged = self.run_path(scratch_dir);
                created.push(merged.clone());
                merge_runs(chunk, &merged).map_err(|e| into_sort_error(e, &merged))?;
                next_pass.push(merged);
            }
            for run in &runs {
                let _ = fs::remove_file(run);
            }
            runs = next_pass;
            merge_passes += 1;
        }

        // Step 3: Final merge into the output
        cancel.check("sort")?;
        merge_runs(&runs, output).map_err(|e| into_sort_error(e, output))?;
        merge_passes += 1;

        Ok(SortStats {
            lines,
            runs: initial_runs,
            merge_passes,
        })
    }

    /// Read `input` in budget-sized batches and write each as a sorted run
    fn write_runs(
        &self,
        input: &Path,
        scratch_dir: &Path,
        cancel: &CancelToken,
        created: &mut Vec<PathBuf>,
    ) -> Result<(Vec<PathBuf>, u64)> {
        let mut reader = BufReader::new(File::open(input)?);
        let mut runs = Vec::new();
        let mut arena: Vec<Vec<u8>> = Vec::new();
        let mut arena_bytes = 0;
        let mut lines = 0;

        loop {
            let mut line = Vec::new();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            arena_bytes += line.len() + LINE_OVERHEAD;
            arena.push(line);
            lines += 1;

            if arena_bytes >= self.run_budget_bytes {
                cancel.check("sort")?;
                runs.push(self.flush_run(&mut arena, scratch_dir, created)?);
                arena_bytes = 0;
            }
        }

        if !arena.is_empty() {
            runs.push(self.flush_run(&mut arena, scratch_dir, created)?);
        }

        Ok((runs, lines))
    }

    /// Sort the arena, write it as a run file, and clear it
    fn flush_run(
        &self,
        arena: &mut Vec<Vec<u8>>,
        scratch_dir: &Path,
        created: &mut Vec<PathBuf>,
    ) -> Result<PathBuf> {
        arena.sort_unstable();
        let path = self.run_path(scratch_dir);
        created.push(path.clone());

        let mut writer = BufWriter::new(File::create(&path)?);
        for line in arena.iter() {
            writer.write_all(line)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        arena.clear();

        Ok(path)
    }

    /// Generate the next run file path: "run_000042.txt"
    fn run_path(&self, scratch_dir: &Path) -> PathBuf {
        let id = self.next_run_id.fetch_add(1, AtomicOrdering::SeqCst);
        scratch_dir.join(format!("run_{:06}.txt", id))
    }
}

/// Attach the file being sorted to a plain I/O error
fn into_sort_error(error: KeyscopeError, path: &Path) -> KeyscopeError {
    match error {
        KeyscopeError::Io(source) => KeyscopeError::Sort {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    }
}

// =============================================================================
// K-way Merge
// =============================================================================

/// Head line of one run, ordered for a min-heap
#[derive(PartialEq, Eq)]
struct HeapItem {
    line: Vec<u8>,
    run: usize,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap; lower run index first on ties
        other
            .line
            .cmp(&self.line)
            .then_with(|| other.run.cmp(&self.run))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Read the next line of a run without its newline
fn next_line(reader: &mut BufReader<File>) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(Some(line))
}

/// Merge sorted runs into `output`; zero runs produce an empty file
fn merge_runs(runs: &[PathBuf], output: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(output)?);
    let mut readers = runs
        .iter()
        .map(|run| File::open(run).map(BufReader::new))
        .collect::<io::Result<Vec<_>>>()?;

    // Initialize heap with the first line of each run
    let mut heap = BinaryHeap::with_capacity(readers.len());
    for (run, reader) in readers.iter_mut().enumerate() {
        if let Some(line) = next_line(reader)? {
            heap.push(HeapItem { line, run });
        }
    }

    while let Some(HeapItem { line, run }) = heap.pop() {
        writer.write_all(&line)?;
        writer.write_all(b"\n")?;

        // Refill from the same run
        if let Some(next) = next_line(&mut readers[run])? {
            heap.push(HeapItem { line: next, run });
        }
    }

    writer.flush()?;
    Ok(())
}
