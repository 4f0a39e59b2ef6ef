//! Stage Status
//!
//! Lock-free per-stage progress of one run.
//!
//! ## Attempt Lifecycle
//! ```text
//!   NOT_STARTED ──begin──► IN_PROGRESS ──commit──► DONE
//!        ▲                      │
//!        └──── dropped ─────────┘   (restores whatever was there before)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Pipeline stage of a run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Extract,
    Index,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Fetch, Stage::Extract, Stage::Index];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Index => "index",
        }
    }

    /// The stage that must be done before this one may start
    pub fn upstream(&self) -> Option<Stage> {
        match self {
            Stage::Fetch => None,
            Stage::Extract => Some(Stage::Fetch),
            Stage::Index => Some(Stage::Extract),
        }
    }

    /// Stages invalidated when this one runs again
    pub fn downstream(&self) -> &'static [Stage] {
        match self {
            Stage::Fetch => &[Stage::Extract, Stage::Index],
            Stage::Extract => &[Stage::Index],
            Stage::Index => &[],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StageState {
    NotStarted = 0,
    InProgress = 1,
    Done = 2,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StageState::InProgress,
            2 => StageState::Done,
            _ => StageState::NotStarted,
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageState::NotStarted => "NOT_STARTED",
            StageState::InProgress => "IN_PROGRESS",
            StageState::Done => "DONE",
        })
    }
}

// =============================================================================
// Stage Status
// =============================================================================

/// State and last successful duration of one stage
///
/// Written only by the stage that holds the run's stage lock; readable from
/// any thread without locking.
#[derive(Debug, Default)]
pub struct StageStatus {
    state: AtomicU8,
    /// Milliseconds taken by the last successful attempt
    elapsed_ms: AtomicU64,
}

impl StageStatus {
    pub fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Duration of the last successful attempt, if the stage is done
    pub fn elapsed(&self) -> Option<Duration> {
        match self.state() {
            StageState::Done => Some(Duration::from_millis(
                self.elapsed_ms.load(Ordering::Acquire),
            )),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state() == StageState::Done
    }

    fn store(&self, state: StageState, elapsed_ms: u64) {
        self.elapsed_ms.store(elapsed_ms, Ordering::Release);
        self.state.store(state as u8, Ordering::Release);
    }

    /// Forget any previous outcome
    pub(crate) fn reset(&self) {
        self.store(StageState::NotStarted, 0);
    }

    /// Mark the stage in progress until the returned attempt is committed
    /// or dropped
    pub(crate) fn begin(&self) -> StageAttempt<'_> {
        let previous = self.state();
        let previous_elapsed_ms = self.elapsed_ms.load(Ordering::Acquire);
        self.store(StageState::InProgress, 0);

        StageAttempt {
            status: self,
            previous,
            previous_elapsed_ms,
            started: Instant::now(),
            committed: false,
        }
    }
}

/// One running attempt of a stage
///
/// Dropping it without [`commit`](StageAttempt::commit) puts the status back
/// to what it was before [`StageStatus::begin`].
#[must_use = "an attempt reverts its stage status when dropped"]
pub struct StageAttempt<'a> {
    status: &'a StageStatus,
    previous: StageState,
    previous_elapsed_ms: u64,
    started: Instant,
    committed: bool,
}

impl StageAttempt<'_> {
    /// Time since the attempt began
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record success and return the attempt's duration
    pub fn commit(mut self) -> Duration {
        let elapsed = self.started.elapsed();
        self.status
            .store(StageState::Done, elapsed.as_millis() as u64);
        self.committed = true;
        elapsed
    }
}

impl Drop for StageAttempt<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.status.store(self.previous, self.previous_elapsed_ms);
        }
    }
}

// =============================================================================
// Run Status
// =============================================================================

/// The three stage statuses of one run
#[derive(Debug, Default)]
pub struct RunStatus {
    fetch: StageStatus,
    extract: StageStatus,
    index: StageStatus,
}

impl RunStatus {
    pub fn stage(&self, stage: Stage) -> &StageStatus {
        match stage {
            Stage::Fetch => &self.fetch,
            Stage::Extract => &self.extract,
            Stage::Index => &self.index,
        }
    }

    /// True once every stage is done and the run can answer queries
    pub fn is_ready(&self) -> bool {
        Stage::ALL.iter().all(|&stage| self.stage(stage).is_done())
    }

    /// Point-in-time copy for display
    pub fn snapshot(&self) -> StatusSnapshot {
        let entry = |stage: Stage| {
            let status = self.stage(stage);
            (status.state(), status.elapsed())
        };
        StatusSnapshot {
            fetch: entry(Stage::Fetch),
            extract: entry(Stage::Extract),
            index: entry(Stage::Index),
        }
    }
}

/// Copied stage states of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub fetch: (StageState, Option<Duration>),
    pub extract: (StageState, Option<Duration>),
    pub index: (StageState, Option<Duration>),
}

impl StatusSnapshot {
    pub fn state(&self, stage: Stage) -> StageState {
        match stage {
            Stage::Fetch => self.fetch.0,
            Stage::Extract => self.extract.0,
            Stage::Index => self.index.0,
        }
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = [
            ("Downloading", "Downloading...", self.fetch),
            ("Parsing", "Parsing...", self.extract),
            ("Trie construction", "Trie construction in progress...", self.index),
        ];

        for (i, (label, in_progress, (state, elapsed))) in lines.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match (state, elapsed) {
                (StageState::NotStarted, _) => write!(f, "{} has not started yet.", label)?,
                (StageState::InProgress, _) => f.write_str(in_progress)?,
                (StageState::Done, Some(elapsed)) => write!(
                    f,
                    "{} completed in {} milliseconds",
                    label,
                    elapsed.as_millis()
                )?,
                (StageState::Done, None) => write!(f, "{} completed.", label)?,
            }
        }
        Ok(())
    }
}
