//! Extract Stage
//!
//! Runs the external key-extraction tool on each dump, then sorts the key
//! files it produced.
//!
//! ## Process Handling
//! 1. Spawn one process per dump, each leading its own process group, with
//!    piped stdout and stderr
//! 2. Attach two drain threads per process (`extract-A-stdout`,
//!    `extract-A-stderr`) that log every line
//! 3. Poll every process against one deadline shared by all of them
//! 4. Kill every process group and reap children still running; the drain
//!    threads see EOF even when a tool left helpers behind, and are joined
//!    before the stage returns
//!
//! Sorting starts only once every process has exited successfully. The tool
//! and the sorter write partial files, which replace the key files only when
//! the whole stage succeeded.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, Scope};
use std::time::{Duration, Instant};

use crate::config::{Config, ExtractorCommand};
use crate::error::{KeyscopeError, Result};

use super::{discard, partial_path, publish, CancelToken, ExternalSorter, WorkerPool};

/// Interval between exit checks of running extractors
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Extraction of one dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractJob {
    /// Short name used in thread names and errors ("A", "B")
    pub label: String,
    /// Dump file handed to the tool
    pub dump: PathBuf,
    /// Key file the tool writes
    pub keys: PathBuf,
    /// Sorted copy of `keys`
    pub sorted: PathBuf,
    /// Directory for sort runs
    pub scratch: PathBuf,
}

/// Runs the key-extraction tool and sorts its output
#[derive(Debug, Clone)]
pub struct Extractor {
    command: ExtractorCommand,
    timeout: Duration,
    sort_workers: usize,
    sort_timeout: Duration,
    sorter: ExternalSorter,
}

impl Extractor {
    pub fn from_config(config: &Config) -> Self {
        Self {
            command: config.extractor.clone(),
            timeout: config.extract_timeout,
            sort_workers: config.sort_workers,
            sort_timeout: config.sort_timeout,
            sorter: ExternalSorter::from_config(config),
        }
    }

    /// Extract and sort the keys of every job
    ///
    /// Key files and sorted key files are replaced only if every job
    /// succeeded; on failure the previous ones are left untouched.
    pub fn extract(&self, jobs: &[ExtractJob]) -> Result<Duration> {
        let started = Instant::now();
        let staged: Vec<ExtractJob> = jobs.iter().map(staged_job).collect();
        let outputs: Vec<&Path> = jobs
            .iter()
            .flat_map(|job| [job.keys.as_path(), job.sorted.as_path()])
            .collect();

        let outcome = self.extract_staged(&staged, started).and_then(|()| publish(&outputs));
        if let Err(e) = outcome {
            discard(&outputs);
            return Err(e);
        }

        let elapsed = started.elapsed();
        tracing::info!("Extracted and sorted {} key file(s) in {:?}", jobs.len(), elapsed);
        Ok(elapsed)
    }

    fn extract_staged(&self, jobs: &[ExtractJob], started: Instant) -> Result<()> {
        // Step 1: Run the tool on every dump
        self.run_processes(jobs)?;
        tracing::info!("Parsing completed in {} ms", started.elapsed().as_millis());

        // Step 2: Sort every key file
        self.sort_keys(jobs)
    }

    fn run_processes(&self, jobs: &[ExtractJob]) -> Result<()> {
        thread::scope(|scope| {
            let mut children: Vec<ChildGuard> = Vec::with_capacity(jobs.len());

            for job in jobs {
                let args = self.command.render_args(&job.dump, &job.keys);
                tracing::info!(
                    "Parsing dump {} with {} {}",
                    job.label,
                    self.command.program,
                    args.join(" ")
                );

                let mut command = Command::new(&self.command.program);
                command
                    .args(&args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
                #[cfg(unix)]
                {
                    use std::os::unix::process::CommandExt;
                    // Group id = child pid, so killpg reaches every helper it forks
                    command.process_group(0);
                }

                let child = command
                    .spawn()
                    .map_err(|source| KeyscopeError::Spawn {
                        label: job.label.clone(),
                        source,
                    })?;

                let mut guard = ChildGuard::new(job.label.clone(), child);
                if let Some(stdout) = guard.child.stdout.take() {
                    spawn_drain(scope, &job.label, "stdout", stdout)?;
                }
                if let Some(stderr) = guard.child.stderr.take() {
                    spawn_drain(scope, &job.label, "stderr", stderr)?;
                }
                children.push(guard);
            }

            // Returning drops the guards, which kills every process group
            // before the scope joins the drain threads
            wait_all(&mut children, self.timeout)
        })
    }

    fn sort_keys(&self, jobs: &[ExtractJob]) -> Result<()> {
        let pool = WorkerPool::new("sort", self.sort_workers, self.sort_timeout);
        let tasks: Vec<_> = jobs
            .iter()
            .map(|job| {
                let sorter = &self.sorter;
                move |cancel: &CancelToken| {
                    sorter.sort_file(&job.keys, &job.sorted, &job.scratch, cancel)
                }
            })
            .collect();

        for (job, stats) in jobs.iter().zip(pool.run(tasks)?) {
            tracing::debug!(
                "Sorted {} keys of dump {} ({} runs, {} merge passes)",
                stats.lines,
                job.label,
                stats.runs,
                stats.merge_passes
            );
        }
        Ok(())
    }
}

/// The same job writing to partial files
fn staged_job(job: &ExtractJob) -> ExtractJob {
    ExtractJob {
        keys: partial_path(&job.keys),
        sorted: partial_path(&job.sorted),
        ..job.clone()
    }
}

// =============================================================================
// Child Processes
// =============================================================================

/// Kills its child's process group on drop, and reaps the child unless it
/// already exited
struct ChildGuard {
    label: String,
    child: Child,
    exited: bool,
}

impl ChildGuard {
    fn new(label: String, child: Child) -> Self {
        Self {
            label,
            child,
            exited: false,
        }
    }

    /// SIGKILL every process left in the child's group
    #[cfg(unix)]
    fn kill_group(&self) {
        let pgid = self.child.id() as libc::pid_t;
        // SAFETY: killpg takes no pointers; an empty group fails with ESRCH
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
            tracing::debug!("Killed process group {} of dump {}", pgid, self.label);
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        // Helpers forked by a finished tool may still hold the output pipes
        self.kill_group();
        if self.exited {
            return;
        }
        tracing::warn!("Killing extractor for dump {} (pid {})", self.label, self.child.id());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Wait until every child exits successfully or `timeout` passes
fn wait_all(children: &mut [ChildGuard], timeout: Duration) -> Result<()> {
    let started = Instant::now();

    loop {
        let mut running = 0;
        for guard in children.iter_mut().filter(|guard| !guard.exited) {
            match guard.child.try_wait()? {
                Some(status) => {
                    guard.exited = true;
                    if !status.success() {
                        tracing::warn!("Extractor for dump {} failed: {}", guard.label, status);
                        return Err(KeyscopeError::ProcessFailure {
                            label: guard.label.clone(),
                            status: status.to_string(),
                        });
                    }
                    tracing::debug!("Extractor for dump {} finished", guard.label);
                }
                None => running += 1,
            }
        }

        if running == 0 {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            tracing::warn!(
                "{} extractor(s) still running after {:?}",
                running,
                timeout
            );
            return Err(KeyscopeError::Timeout {
                stage: "extract".to_string(),
                elapsed: started.elapsed(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Log every line of a child's output stream until EOF
fn spawn_drain<'scope, R>(
    scope: &'scope Scope<'scope, '_>,
    label: &str,
    stream: &'static str,
    pipe: R,
) -> Result<()>
where
    R: Read + Send + 'scope,
{
    let name = format!("extract-{}-{}", label, stream);
    thread::Builder::new()
        .name(name)
        .spawn_scoped(scope, move || {
            let mut reader = BufReader::new(pipe);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        let text = text.trim_end();
                        if stream == "stderr" {
                            tracing::warn!("{}", text);
                        } else {
                            tracing::info!("{}", text);
                        }
                    }
                }
            }
        })?;
    Ok(())
}
