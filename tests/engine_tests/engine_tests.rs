//! Tests for Engine
//!
//! These tests verify:
//! - Engine startup and config validation
//! - Run lifecycle (create, list, status, remove)
//! - Stage ordering, preconditions and status rollback
//! - Full fetch → extract → index flow with queries (unix only)
//! - Concurrent stage attempts on one run

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use keyscope::pipeline::{CancelToken, FetchTransport, LocalTransport};
use keyscope::run::{RunRegistry, Stage, StageState};
use keyscope::{Config, Engine, ExtractorCommand, KeyscopeError, Query, RunId};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Stand-in extraction tool: the dumps already hold one key per line
fn copying_extractor() -> ExtractorCommand {
    ExtractorCommand::new("sh", ["-c", "cp \"$0\" \"$1\"", "{dump}", "{keys}"])
}

fn config_for(temp_dir: &TempDir) -> keyscope::config::ConfigBuilder {
    Config::builder()
        .work_dir(temp_dir.path().join("data"))
        .delimiter('/')
        .extractor(copying_extractor())
        .fetch_timeout(Duration::from_secs(30))
        .extract_timeout(Duration::from_secs(30))
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(&temp_dir).build()).unwrap();
    (temp_dir, engine)
}

fn write_dumps(dir: &Path) -> (String, String) {
    let a = dir.join("a.rdb");
    let b = dir.join("b.rdb");
    fs::write(&a, "a/e\na/b/d\na/b/c\n").unwrap();
    fs::write(&b, "x/y\na/b/c\n").unwrap();
    (a.display().to_string(), b.display().to_string())
}

fn assert_states(engine: &Engine, id: &RunId, expected: [StageState; 3]) {
    let status = engine.status(id).unwrap();
    for (stage, state) in Stage::ALL.iter().zip(expected) {
        assert_eq!(status.state(*stage), state, "unexpected state for {}", stage);
    }
}

/// Blocks inside fetch until released, then copies from disk
struct GatedTransport {
    entered: AtomicBool,
    released: AtomicBool,
}

impl FetchTransport for GatedTransport {
    fn fetch(&self, locator: &str, dest: &Path, cancel: &CancelToken) -> keyscope::Result<u64> {
        self.entered.store(true, Ordering::SeqCst);
        while !self.released.load(Ordering::SeqCst) {
            cancel.check("fetch")?;
            thread::sleep(Duration::from_millis(5));
        }
        LocalTransport.fetch(locator, dest, cancel)
    }
}

// =============================================================================
// Startup Tests
// =============================================================================

#[test]
fn test_engine_open_creates_directories() {
    let temp_dir = TempDir::new().unwrap();
    let work_dir = temp_dir.path().join("scope");

    let engine = Engine::open(Config::builder().work_dir(&work_dir).build()).unwrap();

    assert!(work_dir.join("runs").is_dir());
    assert_eq!(engine.runs_root(), work_dir.join("runs"));
    assert_eq!(engine.work_dir(), work_dir);
}

#[test]
fn test_engine_open_path_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();

    let engine = Engine::open_path(temp_dir.path()).unwrap();

    assert_eq!(engine.config().delimiter, ':');
    assert_eq!(engine.config().index_timeout, Duration::from_secs(300));
}

#[test]
fn test_engine_rejects_invalid_config() {
    let temp_dir = TempDir::new().unwrap();

    let result = Engine::open(config_for(&temp_dir).fetch_workers(0).build());
    assert!(matches!(result, Err(KeyscopeError::Config(_))));

    let result = Engine::open(config_for(&temp_dir).sort_fan_in(1).build());
    assert!(matches!(result, Err(KeyscopeError::Config(_))));
}

// =============================================================================
// Run Lifecycle Tests
// =============================================================================

#[test]
fn test_create_run_generates_alphanumeric_id() {
    let (_temp, engine) = setup_temp_engine();

    let id = engine.create_run("a.rdb", "b.rdb");

    assert_eq!(id.as_str().len(), 10);
    assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    assert_eq!(engine.list_runs(), vec![id.clone()]);
    assert_eq!(engine.run(&id).unwrap().sources()[1], "b.rdb");
}

#[test]
fn test_new_run_has_nothing_started() {
    let (_temp, engine) = setup_temp_engine();
    let id = engine.create_run("a.rdb", "b.rdb");

    assert_states(&engine, &id, [StageState::NotStarted; 3]);
    assert_eq!(
        engine.status(&id).unwrap().to_string(),
        "Downloading has not started yet.\n\
         Parsing has not started yet.\n\
         Trie construction has not started yet."
    );
}

#[test]
fn test_unknown_run() {
    let (_temp, engine) = setup_temp_engine();
    let ghost = RunId::from("ghost00000");

    assert!(matches!(engine.status(&ghost), Err(KeyscopeError::RunNotFound(_))));
    assert!(matches!(engine.fetch(&ghost), Err(KeyscopeError::RunNotFound(_))));
    assert!(matches!(
        engine.execute(&ghost, Query::count("a")),
        Err(KeyscopeError::RunNotFound(_))
    ));
}

#[test]
fn test_remove_run_deletes_files_and_entry() {
    let (temp, engine) = setup_temp_engine();
    let (a, b) = write_dumps(temp.path());
    let id = engine.create_run(a, b);
    engine.fetch(&id).unwrap();
    let run_dir = engine.run(&id).unwrap().files().dir.clone();
    assert!(run_dir.join("dump-A.rdb").exists());

    engine.remove_run(&id).unwrap();

    assert!(!run_dir.exists());
    assert!(engine.list_runs().is_empty());
    assert!(matches!(engine.remove_run(&id), Err(KeyscopeError::RunNotFound(_))));
}

#[test]
fn test_engines_can_share_a_registry() {
    let temp_dir = TempDir::new().unwrap();
    let registry = Arc::new(RunRegistry::new());
    let first = Engine::with_context(
        config_for(&temp_dir).build(),
        Arc::clone(&registry),
        Arc::new(LocalTransport),
    )
    .unwrap();
    let second = Engine::with_context(
        config_for(&temp_dir).build(),
        Arc::clone(&registry),
        Arc::new(LocalTransport),
    )
    .unwrap();

    let id = first.create_run("a.rdb", "b.rdb");

    assert!(second.run(&id).is_ok());
    assert_eq!(registry.len(), 1);
}

// =============================================================================
// Stage Ordering Tests
// =============================================================================

#[test]
fn test_extract_requires_fetch() {
    let (_temp, engine) = setup_temp_engine();
    let id = engine.create_run("a.rdb", "b.rdb");

    let err = engine.extract(&id).unwrap_err();

    assert!(matches!(err, KeyscopeError::StagePrecondition { ref stage, .. } if stage == "extract"));
    assert_states(&engine, &id, [StageState::NotStarted; 3]);
}

#[test]
fn test_index_requires_extract() {
    let (temp, engine) = setup_temp_engine();
    let (a, b) = write_dumps(temp.path());
    let id = engine.create_run(a, b);
    engine.fetch(&id).unwrap();

    let err = engine.build_index(&id).unwrap_err();

    assert!(matches!(err, KeyscopeError::StagePrecondition { ref stage, .. } if stage == "index"));
}

#[test]
fn test_failed_fetch_never_runs_extraction() {
    let temp_dir = TempDir::new().unwrap();
    let marker = temp_dir.path().join("extractor-ran");
    let config = config_for(&temp_dir)
        .extractor(ExtractorCommand::new(
            "sh",
            [
                "-c".to_string(),
                format!("touch {}; cp \"$0\" \"$1\"", marker.display()),
                "{dump}".to_string(),
                "{keys}".to_string(),
            ],
        ))
        .build();
    let engine = Engine::open(config).unwrap();
    let (a, _) = write_dumps(temp_dir.path());
    let id = engine.create_run(a, "/no/such/dump.rdb");

    let err = engine.process(&id).unwrap_err();

    assert!(matches!(err, KeyscopeError::Fetch { .. }));
    assert_states(&engine, &id, [StageState::NotStarted; 3]);
    assert!(!marker.exists());

    let files = engine.run(&id).unwrap().files().clone();
    assert!(!files.dumps[0].exists());
    assert!(!files.dumps[1].exists());
}

#[test]
fn test_second_stage_on_busy_run_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let transport = Arc::new(GatedTransport {
        entered: AtomicBool::new(false),
        released: AtomicBool::new(false),
    });
    let engine = Engine::with_context(
        config_for(&temp_dir).build(),
        Arc::new(RunRegistry::new()),
        Arc::clone(&transport) as Arc<dyn FetchTransport>,
    )
    .unwrap();
    let (a, b) = write_dumps(temp_dir.path());
    let id = engine.create_run(a, b);

    thread::scope(|scope| {
        let fetching = scope.spawn(|| engine.fetch(&id));

        while !transport.entered.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(engine.status(&id).unwrap().state(Stage::Fetch), StageState::InProgress);
        assert!(matches!(engine.fetch(&id), Err(KeyscopeError::StageBusy(_))));
        assert!(matches!(engine.remove_run(&id), Err(KeyscopeError::StageBusy(_))));

        transport.released.store(true, Ordering::SeqCst);
        fetching.join().unwrap().unwrap();
    });

    assert_states(
        &engine,
        &id,
        [StageState::Done, StageState::NotStarted, StageState::NotStarted],
    );
}

// =============================================================================
// Full Flow Tests
// =============================================================================

#[cfg(unix)]
fn processed_engine(compact: bool) -> (TempDir, Engine, RunId) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(&temp_dir).compact_indices(compact).build()).unwrap();
    let (a, b) = write_dumps(temp_dir.path());
    let id = engine.create_run(a, b);
    engine.process(&id).unwrap();
    (temp_dir, engine, id)
}

#[cfg(unix)]
#[test]
fn test_process_runs_every_stage() {
    let (_temp, engine, id) = processed_engine(false);

    assert_states(&engine, &id, [StageState::Done; 3]);
    assert!(engine.run(&id).unwrap().status().is_ready());

    let files = engine.run(&id).unwrap().files().clone();
    assert_eq!(
        fs::read_to_string(&files.sorted_keys[0]).unwrap(),
        "a/b/c\na/b/d\na/e\n"
    );
    let status = engine.status(&id).unwrap().to_string();
    assert!(status.contains("Parsing completed in"));
    assert!(status.contains("Trie construction completed in"));
}

#[cfg(unix)]
#[test]
fn test_count_query_after_processing() {
    let (_temp, engine, id) = processed_engine(false);

    let report = engine.count_query(&id, "a/b").unwrap();
    assert_eq!(report.first().unwrap().count(), Some(2));
    assert_eq!(report.second().unwrap().count(), Some(1));
    assert!(report
        .to_string()
        .starts_with("Total keys with prefix *a/b*: in first database: 2, in second database: 1"));

    let report = engine.count_query(&id, "x").unwrap();
    assert!(report.first().unwrap().is_not_found());
    assert_eq!(report.second().unwrap().count(), Some(1));
}

#[cfg(unix)]
#[test]
fn test_top_k_query_after_processing() {
    let (_temp, engine, id) = processed_engine(false);

    let report = engine.top_k_query(&id, "a", 2).unwrap();
    let first = report.first().unwrap().breakdown().unwrap();

    assert_eq!(first.total, 3);
    assert_eq!(first.branches, 1);
    assert_eq!(first.top, vec![("a/b".to_string(), 2)]);
    assert!(report
        .to_string()
        .contains("`WARN: Found 1 prefixes only, less than the requested number (2)`"));
}

#[cfg(unix)]
#[test]
fn test_compacted_run_gives_the_same_answers() {
    let (_plain_temp, plain, plain_id) = processed_engine(false);
    let (_compact_temp, compact, compact_id) = processed_engine(true);

    let pair = compact.run(&compact_id).unwrap().indices().unwrap();
    assert!(pair.first.is_compact());

    for prefix in ["", "a", "a/b", "x", "a/e", "nope"] {
        let expected = plain.count_query(&plain_id, prefix).unwrap();
        let actual = compact.count_query(&compact_id, prefix).unwrap();
        for (e, a) in expected.outcomes.iter().zip(&actual.outcomes) {
            assert_eq!(e.count(), a.count(), "count mismatch for {:?}", prefix);
        }

        let expected = plain.top_k_query(&plain_id, prefix, 3).unwrap();
        let actual = compact.top_k_query(&compact_id, prefix, 3).unwrap();
        for (e, a) in expected.outcomes.iter().zip(&actual.outcomes) {
            assert_eq!(e.breakdown(), a.breakdown(), "top-k mismatch for {:?}", prefix);
        }
    }
}

#[cfg(unix)]
#[test]
fn test_refetch_resets_downstream_stages() {
    let (_temp, engine, id) = processed_engine(false);

    engine.fetch(&id).unwrap();

    assert_states(
        &engine,
        &id,
        [StageState::Done, StageState::NotStarted, StageState::NotStarted],
    );
    assert!(engine.run(&id).unwrap().indices().is_none());
    let report = engine.count_query(&id, "a").unwrap();
    assert!(matches!(
        report.first().unwrap().result,
        Err(KeyscopeError::IndexNotReady(_))
    ));
}

#[cfg(unix)]
#[test]
fn test_failed_extract_restores_previous_status() {
    let (_temp, engine, id) = processed_engine(false);
    let second_dump = engine.run(&id).unwrap().files().dumps[1].clone();

    // The tool copies the dump; a missing dump makes it exit non-zero
    fs::remove_file(&second_dump).unwrap();
    let err = engine.extract(&id).unwrap_err();

    assert!(matches!(err, KeyscopeError::ProcessFailure { .. }));
    assert_states(&engine, &id, [StageState::Done; 3]);
    assert!(engine.run(&id).unwrap().indices().is_some());

    // Key files still belong to the last successful extraction
    let files = engine.run(&id).unwrap().files().clone();
    assert_eq!(
        fs::read_to_string(&files.sorted_keys[0]).unwrap(),
        "a/b/c\na/b/d\na/e\n"
    );
    assert_eq!(fs::read_to_string(&files.sorted_keys[1]).unwrap(), "a/b/c\nx/y\n");
}

#[cfg(unix)]
#[test]
fn test_failed_refetch_keeps_previous_dumps() {
    let (temp, engine, id) = processed_engine(false);
    let dumps = engine.run(&id).unwrap().files().dumps.clone();

    fs::remove_file(temp.path().join("b.rdb")).unwrap();
    let err = engine.fetch(&id).unwrap_err();

    assert!(matches!(err, KeyscopeError::Fetch { .. }));
    assert_states(&engine, &id, [StageState::Done; 3]);
    assert_eq!(fs::read_to_string(&dumps[0]).unwrap(), "a/e\na/b/d\na/b/c\n");
    assert_eq!(fs::read_to_string(&dumps[1]).unwrap(), "x/y\na/b/c\n");

    // The kept dumps are still good for the next stage
    engine.extract(&id).unwrap();
    engine.build_index(&id).unwrap();
    let report = engine.count_query(&id, "a").unwrap();
    assert_eq!(report.first().unwrap().count(), Some(3));
}
