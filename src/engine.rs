//! Engine Module
//!
//! Facade that coordinates runs, the pipeline and queries.
//!
//! ## Responsibilities
//! - Validate configuration and prepare the work directory
//! - Create, look up and remove runs through the injected registry
//! - Drive pipeline stages on a run
//! - Answer queries once a run's indices are built

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::pipeline::{FetchTransport, Pipeline, SchemeTransport};
use crate::query::{Query, QueryEngine, QueryReport};
use crate::run::{Run, RunId, RunRegistry, StatusSnapshot};

/// The main keyscope engine
///
/// ## Concurrency Model
///
/// - **Registry**: shared `RwLock<HashMap>`; the only state touched across runs
/// - **Stages**: serialized per run by the run's stage lock; different runs
///   progress independently
/// - **Queries**: read-only on the built indices, concurrent with each other
///   and with status reads
pub struct Engine {
    /// Engine configuration
    config: Arc<Config>,

    /// Parent directory of every run directory
    runs_root: PathBuf,

    /// Live runs (may be shared with other engines)
    registry: Arc<RunRegistry>,

    /// Stage executor
    pipeline: Pipeline,

    /// Query dispatcher
    queries: QueryEngine,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const RUNS_DIR: &'static str = "runs";

    /// Open an engine with a private registry and scheme-based fetching
    pub fn open(config: Config) -> Result<Self> {
        let transport = Arc::new(SchemeTransport::new(config.http_timeout));
        Self::with_context(config, Arc::new(RunRegistry::new()), transport)
    }

    /// Open with the default config rooted at `path`
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().work_dir(path).build())
    }

    /// Open an engine over an injected registry and transport
    ///
    /// On startup:
    /// 1. Validate the config
    /// 2. Create the work directory and its runs directory
    pub fn with_context(
        config: Config,
        registry: Arc<RunRegistry>,
        transport: Arc<dyn FetchTransport>,
    ) -> Result<Self> {
        // Step 1: Refuse configs no stage could run with
        config.validate()?;

        // Step 2: Runs live under {work_dir}/runs
        let runs_root = config.work_dir.join(Self::RUNS_DIR);
        fs::create_dir_all(&runs_root)?;

        tracing::info!("Engine opened at {}", config.work_dir.display());

        let config = Arc::new(config);
        Ok(Self {
            pipeline: Pipeline::new(Arc::clone(&config), transport),
            config,
            runs_root,
            registry,
            queries: QueryEngine::new(),
        })
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Register a run comparing the dumps at `first` and `second`
    pub fn create_run(&self, first: impl Into<String>, second: impl Into<String>) -> RunId {
        let run = self.registry.create(&self.runs_root, first, second);
        tracing::info!(
            "Created run {} for {} and {}",
            run.id(),
            run.sources()[0],
            run.sources()[1]
        );
        run.id().clone()
    }

    pub fn run(&self, id: &RunId) -> Result<Arc<Run>> {
        self.registry.get(id)
    }

    /// Ids of every live run
    pub fn list_runs(&self) -> Vec<RunId> {
        self.registry.list()
    }

    /// Progress of every stage of a run
    pub fn status(&self, id: &RunId) -> Result<StatusSnapshot> {
        Ok(self.registry.get(id)?.status().snapshot())
    }

    /// Forget a run and delete its files
    ///
    /// Fails with `StageBusy` while a stage is executing on the run.
    pub fn remove_run(&self, id: &RunId) -> Result<()> {
        let run = self.registry.get(id)?;
        let _stage_lock = run.try_lock_stage()?;
        self.registry.remove(id)?;

        let dir = &run.files().dir;
        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!("Removed run {}", id);
        Ok(())
    }

    // =========================================================================
    // Stages
    // =========================================================================

    /// Download both dumps of a run
    pub fn fetch(&self, id: &RunId) -> Result<Duration> {
        let run = self.registry.get(id)?;
        self.pipeline.fetch(&run)
    }

    /// Extract and sort the keys of both dumps
    pub fn extract(&self, id: &RunId) -> Result<Duration> {
        let run = self.registry.get(id)?;
        self.pipeline.extract(&run)
    }

    /// Build both indices
    pub fn build_index(&self, id: &RunId) -> Result<Duration> {
        let run = self.registry.get(id)?;
        self.pipeline.build_index(&run)
    }

    /// Fetch, extract and index in one call
    pub fn process(&self, id: &RunId) -> Result<Duration> {
        let run = self.registry.get(id)?;
        self.pipeline.process(&run)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Execute a query
    ///
    /// Only an unknown run fails the call; per-index problems are carried in
    /// the report.
    pub fn execute(&self, id: &RunId, query: Query) -> Result<QueryReport> {
        let run = self.registry.get(id)?;
        Ok(self.queries.execute(&run, &query))
    }

    /// Keys under `prefix` in both dumps
    pub fn count_query(&self, id: &RunId, prefix: &str) -> Result<QueryReport> {
        self.execute(id, Query::count(prefix))
    }

    /// The `n` heaviest children of `prefix` in both dumps
    pub fn top_k_query(&self, id: &RunId, prefix: &str, n: usize) -> Result<QueryReport> {
        self.execute(id, Query::top_k(prefix, n))
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the work directory path
    pub fn work_dir(&self) -> &Path {
        &self.config.work_dir
    }

    /// Get the directory holding every run directory
    pub fn runs_root(&self) -> &Path {
        &self.runs_root
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
