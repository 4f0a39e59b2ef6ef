//! Configuration for keyscope
//!
//! Centralized configuration with sensible defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{KeyscopeError, Result};

/// Main configuration for a keyscope engine
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all run files
    /// Internal structure:
    ///   {work_dir}/
    ///     └── runs/{run_id}/
    ///           ├── dump-A.rdb, dump-B.rdb
    ///           ├── keys-A.txt, keys-B.txt
    ///           ├── sorted-keys-A.txt, sorted-keys-B.txt
    ///           └── sort-scratch/
    pub work_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Key Configuration
    // -------------------------------------------------------------------------
    /// Segment delimiter for path-like keys
    pub delimiter: char,

    // -------------------------------------------------------------------------
    // Fetch Configuration
    // -------------------------------------------------------------------------
    /// Worker threads for the fetch stage
    pub fetch_workers: usize,

    /// Bound on the whole fetch stage
    pub fetch_timeout: Duration,

    /// Per-request bound for HTTP downloads
    pub http_timeout: Duration,

    // -------------------------------------------------------------------------
    // Extract Configuration
    // -------------------------------------------------------------------------
    /// External key-extraction tool
    pub extractor: ExtractorCommand,

    /// Bound on all extraction processes together, applied after spawning
    pub extract_timeout: Duration,

    /// Worker threads for sorting key files
    pub sort_workers: usize,

    /// Bound on sorting both key files
    pub sort_timeout: Duration,

    /// In-memory budget for one sorted run (in bytes)
    pub sort_run_budget_bytes: usize,

    /// Maximum number of runs merged in one pass
    pub sort_fan_in: usize,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Worker threads for building indices
    pub index_workers: usize,

    /// Bound on building both indices
    pub index_timeout: Duration,

    /// Replace built indices by their compacted form
    pub compact_indices: bool,
}

/// Program and argument template for the key-extraction tool
///
/// `{dump}` and `{keys}` inside an argument are replaced by the dump file
/// path and the key output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ExtractorCommand {
    pub const DUMP_PLACEHOLDER: &'static str = "{dump}";
    pub const KEYS_PLACEHOLDER: &'static str = "{keys}";

    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Expand the argument template for one dump file
    pub fn render_args(&self, dump: &Path, keys: &Path) -> Vec<String> {
        let dump = dump.to_string_lossy();
        let keys = keys.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(Self::DUMP_PLACEHOLDER, &dump)
                    .replace(Self::KEYS_PLACEHOLDER, &keys)
            })
            .collect()
    }
}

impl Default for ExtractorCommand {
    fn default() -> Self {
        Self::new(
            "python3",
            ["fast-parse.py", "--rdb={dump}", "--keys={keys}"],
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./keyscope_data"),
            delimiter: ':',
            fetch_workers: 2,
            fetch_timeout: Duration::from_secs(10 * 60),
            http_timeout: Duration::from_secs(10 * 60),
            extractor: ExtractorCommand::default(),
            extract_timeout: Duration::from_secs(30 * 60),
            sort_workers: 2,
            sort_timeout: Duration::from_secs(30 * 60),
            sort_run_budget_bytes: 64 * 1024 * 1024, // 64 MB
            sort_fan_in: 16,
            index_workers: 2,
            index_timeout: Duration::from_secs(300),
            compact_indices: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings no stage can run with
    pub fn validate(&self) -> Result<()> {
        if self.fetch_workers == 0 || self.sort_workers == 0 || self.index_workers == 0 {
            return Err(KeyscopeError::Config(
                "worker counts must be at least 1".to_string(),
            ));
        }
        if self.sort_fan_in < 2 {
            return Err(KeyscopeError::Config(format!(
                "sort fan-in must be at least 2, got {}",
                self.sort_fan_in
            )));
        }
        if self.sort_run_budget_bytes == 0 {
            return Err(KeyscopeError::Config(
                "sort run budget must be non-zero".to_string(),
            ));
        }
        if self.extractor.program.is_empty() {
            return Err(KeyscopeError::Config(
                "extractor program is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the work directory (root for all run files)
    pub fn work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.work_dir = path.into();
        self
    }

    /// Set the key segment delimiter
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.config.delimiter = delimiter;
        self
    }

    pub fn fetch_workers(mut self, count: usize) -> Self {
        self.config.fetch_workers = count;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.config.http_timeout = timeout;
        self
    }

    /// Set the key-extraction tool
    pub fn extractor(mut self, command: ExtractorCommand) -> Self {
        self.config.extractor = command;
        self
    }

    pub fn extract_timeout(mut self, timeout: Duration) -> Self {
        self.config.extract_timeout = timeout;
        self
    }

    pub fn sort_workers(mut self, count: usize) -> Self {
        self.config.sort_workers = count;
        self
    }

    pub fn sort_timeout(mut self, timeout: Duration) -> Self {
        self.config.sort_timeout = timeout;
        self
    }

    /// Set the in-memory budget of one sorted run (in bytes)
    pub fn sort_run_budget_bytes(mut self, bytes: usize) -> Self {
        self.config.sort_run_budget_bytes = bytes;
        self
    }

    pub fn sort_fan_in(mut self, fan_in: usize) -> Self {
        self.config.sort_fan_in = fan_in;
        self
    }

    pub fn index_workers(mut self, count: usize) -> Self {
        self.config.index_workers = count;
        self
    }

    pub fn index_timeout(mut self, timeout: Duration) -> Self {
        self.config.index_timeout = timeout;
        self
    }

    /// Compact both indices after building them
    pub fn compact_indices(mut self, compact: bool) -> Self {
        self.config.compact_indices = compact;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
