//! Fetch Stage
//!
//! Copies the two dumps of a run from their source locators to local files.
//!
//! ## Transports
//! - [`LocalTransport`]: filesystem paths and `file://` URLs
//! - [`HttpTransport`]: `http://` and `https://` URLs
//! - [`SchemeTransport`]: picks one of the above by locator scheme
//!
//! Every transport copies in chunks and checks the stage's cancel token
//! between chunks, so a timed-out fetch stops writing promptly.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::error::{KeyscopeError, Result};

use super::{discard, partial_path, publish, CancelToken, WorkerPool};

/// Bytes copied between cancellation checks
const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Retrieves one remote object into a local file
pub trait FetchTransport: Send + Sync {
    /// Write the object at `locator` to `dest`, returning the bytes written
    fn fetch(&self, locator: &str, dest: &Path, cancel: &CancelToken) -> Result<u64>;
}

/// Copy `reader` into a new file at `dest` in chunks
fn copy_chunked(reader: &mut dyn Read, dest: &Path, cancel: &CancelToken) -> Result<u64> {
    let mut writer = BufWriter::new(File::create(dest)?);
    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    let mut written: u64 = 0;

    loop {
        cancel.check("fetch")?;
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buffer[..read])?;
        written += read as u64;
    }

    writer.flush()?;
    Ok(written)
}

// =============================================================================
// Local Transport
// =============================================================================

/// Reads dumps from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl LocalTransport {
    /// Filesystem path named by a plain path or a `file://` URL
    pub fn path_of(locator: &str) -> &Path {
        Path::new(locator.strip_prefix("file://").unwrap_or(locator))
    }
}

impl FetchTransport for LocalTransport {
    fn fetch(&self, locator: &str, dest: &Path, cancel: &CancelToken) -> Result<u64> {
        let source = Self::path_of(locator);
        let mut reader = File::open(source).map_err(|e| KeyscopeError::Fetch {
            locator: locator.to_string(),
            reason: e.to_string(),
        })?;
        copy_chunked(&mut reader, dest, cancel)
    }
}

// =============================================================================
// HTTP Transport
// =============================================================================

/// Downloads dumps over HTTP(S) with a blocking client
///
/// The client is built on first use.
#[derive(Debug)]
pub struct HttpTransport {
    timeout: Duration,
    client: OnceLock<reqwest::blocking::Client>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: OnceLock::new(),
        }
    }

    fn client(&self, locator: &str) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| KeyscopeError::Fetch {
                locator: locator.to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl FetchTransport for HttpTransport {
    fn fetch(&self, locator: &str, dest: &Path, cancel: &CancelToken) -> Result<u64> {
        let fetch_error = |reason: String| KeyscopeError::Fetch {
            locator: locator.to_string(),
            reason,
        };

        let mut response = self
            .client(locator)?
            .get(locator)
            .send()
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP status {}", status)));
        }

        copy_chunked(&mut response, dest, cancel)
    }
}

// =============================================================================
// Scheme Dispatch
// =============================================================================

/// Routes `http://` and `https://` locators to HTTP, everything else to disk
#[derive(Debug)]
pub struct SchemeTransport {
    local: LocalTransport,
    http: HttpTransport,
}

impl SchemeTransport {
    pub fn new(http_timeout: Duration) -> Self {
        Self {
            local: LocalTransport,
            http: HttpTransport::new(http_timeout),
        }
    }
}

impl FetchTransport for SchemeTransport {
    fn fetch(&self, locator: &str, dest: &Path, cancel: &CancelToken) -> Result<u64> {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            self.http.fetch(locator, dest, cancel)
        } else {
            self.local.fetch(locator, dest, cancel)
        }
    }
}

// =============================================================================
// Fetcher
// =============================================================================

/// Downloads a batch of dumps on a bounded pool
pub struct Fetcher {
    workers: usize,
    timeout: Duration,
    transport: Arc<dyn FetchTransport>,
}

impl Fetcher {
    pub fn new(workers: usize, timeout: Duration, transport: Arc<dyn FetchTransport>) -> Self {
        Self {
            workers,
            timeout,
            transport,
        }
    }

    /// Fetch every `(locator, dest)` pair
    ///
    /// Each dump is written to a partial file first; destinations are
    /// replaced only if every download succeeded. On any failure or on
    /// timeout the partial files are removed and existing destinations are
    /// left untouched.
    pub fn fetch(&self, jobs: &[(String, PathBuf)]) -> Result<Duration> {
        let started = Instant::now();
        let pool = WorkerPool::new("fetch", self.workers, self.timeout);
        let dests: Vec<&Path> = jobs.iter().map(|(_, dest)| dest.as_path()).collect();

        let tasks: Vec<_> = jobs
            .iter()
            .map(|(locator, dest)| {
                let transport = &self.transport;
                move |cancel: &CancelToken| -> Result<u64> {
                    tracing::info!("Downloading {} to {}", locator, dest.display());
                    let bytes = transport.fetch(locator, &partial_path(dest), cancel)?;
                    tracing::debug!("Downloaded {} bytes from {}", bytes, locator);
                    Ok(bytes)
                }
            })
            .collect();

        let outcome = pool.run(tasks).and_then(|sizes| {
            publish(&dests)?;
            Ok(sizes)
        });

        match outcome {
            Ok(sizes) => {
                let elapsed = started.elapsed();
                tracing::info!(
                    "Fetched {} dump(s), {} bytes in {:?}",
                    sizes.len(),
                    sizes.iter().sum::<u64>(),
                    elapsed
                );
                Ok(elapsed)
            }
            Err(e) => {
                discard(&dests);
                Err(e)
            }
        }
    }
}
