//! Indexing and quick-scan orchestration.
//!
//! Both flows share one pipeline: size a worker pool from the storage hint
//! (or an explicit override), discover archives under the roots, and extract
//! archives concurrently on blocking threads. Completed extractions come
//! back to the orchestrator one at a time, which either writes them to the
//! [`IndexStore`] or keeps them in memory for a single query.
//!
//! A failure on one archive, including a panic inside the extractor, is
//! logged and counted against that archive's path, never fatal. The shared
//! shutdown flag stops new extractions from starting; in-flight ones are
//! drained and kept, then the run ends with [`SearchError::Interrupted`].

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::discovery::{DiscoveredFile, Discovery};
use crate::error::{Result, SearchError};
use crate::extract;
use crate::models::{dedup_fragments, ArchiveFile, JsonFragment, SearchResult};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::query::{substring_filter, use_analytics, QueryOutcome};
use crate::storage;
use crate::store::IndexStore;

/// Emit a processing event every this many archives (and on the last one).
const PROGRESS_INTERVAL: u64 = 25;

/// Counters for one indexing or quick-scan run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSummary {
    pub found: u64,
    pub processed: u64,
    pub errors: u64,
    pub fragments: u64,
    pub elapsed: Duration,
}

impl IndexSummary {
    /// Archives processed per second.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Archives a quick scan kept, with the run's counters.
#[derive(Debug, Default)]
pub struct ScanResults {
    pub results: Vec<SearchResult>,
    pub summary: IndexSummary,
}

pub struct Orchestrator {
    scan: ScanConfig,
    reporter: Arc<dyn ProgressReporter>,
    shutdown: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(scan: ScanConfig, reporter: Arc<dyn ProgressReporter>, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            scan,
            reporter,
            shutdown,
        }
    }

    /// Persistently index every archive under `roots`.
    pub async fn index(&self, store: &IndexStore, roots: &[PathBuf]) -> Result<IndexSummary> {
        let start = Instant::now();
        let (files, workers) = self.prepare(roots).await?;
        let total = files.len() as u64;

        let mut summary = IndexSummary {
            found: total,
            ..Default::default()
        };
        let mut pool = ExtractionPool::new(files, workers, Arc::clone(&self.shutdown));
        let mut n = 0u64;

        while let Some(extracted) = pool.next().await {
            n += 1;
            let current = match extracted {
                Extracted::Done(result) => {
                    let path = result.archive.path.clone();
                    match store.upsert(&result.archive, &result.fragments).await {
                        Ok(_) => {
                            summary.processed += 1;
                            summary.fragments += result.fragments.len() as u64;
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "failed to index archive");
                            summary.errors += 1;
                        }
                    }
                    path
                }
                Extracted::Failed { path, reason } => {
                    warn!(path = %path.display(), error = %reason, "failed to process archive");
                    summary.errors += 1;
                    path
                }
            };
            self.report_processing(n, total, summary.fragments, current);
        }

        summary.elapsed = start.elapsed();
        if pool.interrupted() {
            info!(processed = summary.processed, "indexing interrupted");
            return Err(SearchError::Interrupted);
        }

        info!(
            found = summary.found,
            processed = summary.processed,
            errors = summary.errors,
            fragments = summary.fragments,
            "indexing complete"
        );
        Ok(summary)
    }

    /// Extract every archive under `roots` in memory and run one query over
    /// the fragments found. Nothing is persisted.
    ///
    /// With `analytics` (and the engine available) `query` is SQL against
    /// `mhtml_data`; otherwise it is a case-insensitive substring matched
    /// against each fragment's text.
    pub async fn scan_and_search(&self, roots: &[PathBuf], query: &str, analytics: bool) -> Result<QueryOutcome> {
        let scanned = self.collect(roots).await?;
        debug!(archives = scanned.results.len(), "quick scan extracted");

        if use_analytics(analytics) {
            return Ok(run_analytics(&scanned.results, query).await);
        }
        Ok(QueryOutcome::rows(substring_filter(&scanned.results, query)))
    }

    /// Extract every archive under `roots`, keeping those with at least one fragment.
    pub async fn collect(&self, roots: &[PathBuf]) -> Result<ScanResults> {
        let start = Instant::now();
        let (files, workers) = self.prepare(roots).await?;
        let total = files.len() as u64;

        let mut scanned = ScanResults {
            summary: IndexSummary {
                found: total,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut pool = ExtractionPool::new(files, workers, Arc::clone(&self.shutdown));
        let mut n = 0u64;

        while let Some(extracted) = pool.next().await {
            n += 1;
            let current = match extracted {
                Extracted::Done(result) => {
                    let path = result.archive.path.clone();
                    scanned.summary.processed += 1;
                    scanned.summary.fragments += result.fragments.len() as u64;
                    if !result.fragments.is_empty() {
                        scanned.results.push(result);
                    }
                    path
                }
                Extracted::Failed { path, reason } => {
                    warn!(path = %path.display(), error = %reason, "failed to process archive");
                    scanned.summary.errors += 1;
                    path
                }
            };
            self.report_processing(n, total, scanned.summary.fragments, current);
        }

        scanned.summary.elapsed = start.elapsed();
        if pool.interrupted() {
            return Err(SearchError::Interrupted);
        }

        info!(
            found = scanned.summary.found,
            processed = scanned.summary.processed,
            errors = scanned.summary.errors,
            fragments = scanned.summary.fragments,
            "quick scan complete"
        );
        Ok(scanned)
    }

    /// Size the worker pool, then list the archives it will work through.
    async fn prepare(&self, roots: &[PathBuf]) -> Result<(Vec<DiscoveredFile>, usize)> {
        let workers = self.workers().await;
        let files = self.discover(roots).await?;
        self.reporter.report(ProgressEvent::Discovered {
            files: files.len() as u64,
            workers,
        });
        Ok((files, workers))
    }

    async fn discover(&self, roots: &[PathBuf]) -> Result<Vec<DiscoveredFile>> {
        let discovery = Discovery::new(&self.scan).map_err(|e| SearchError::Config(e.to_string()))?;
        self.reporter.report(ProgressEvent::Discovering {
            roots: roots.to_vec(),
        });
        let files = discovery.find_archives(roots).await;
        info!(files = files.len(), strategy = ?discovery.strategy(), "discovery complete");

        if self.shutdown.load(Ordering::SeqCst) {
            return Err(SearchError::Interrupted);
        }
        Ok(files)
    }

    /// Explicit thread count if configured, else the storage probe's hint.
    async fn workers(&self) -> usize {
        match self.scan.threads {
            Some(threads) => threads.max(1),
            None => {
                let hint = storage::probe_storage(self.scan.probe_timeout()).await;
                info!(workers = hint.workers, medium = ?hint.medium, probed = hint.probed, "worker count from storage hint");
                hint.workers
            }
        }
    }

    fn report_processing(&self, n: u64, total: u64, fragments: u64, current: PathBuf) {
        if n % PROGRESS_INTERVAL == 0 || n == total {
            self.reporter.report(ProgressEvent::Processing {
                n,
                total,
                fragments,
                current,
            });
        }
    }
}

#[cfg(feature = "analytics")]
async fn run_analytics(results: &[SearchResult], query: &str) -> QueryOutcome {
    use crate::analytics::AnalyticsEngine;
    use crate::models::flatten_results;
    use crate::query::QueryBackend;

    match AnalyticsEngine::build(&flatten_results(results)) {
        Ok(engine) => engine.execute(query).await,
        Err(e) => QueryOutcome::failed(e.to_string()),
    }
}

#[cfg(not(feature = "analytics"))]
async fn run_analytics(results: &[SearchResult], query: &str) -> QueryOutcome {
    QueryOutcome::rows(substring_filter(results, query))
}

/// Result of extracting one archive on a worker.
enum Extracted {
    Done(SearchResult),
    Failed { path: PathBuf, reason: String },
}

/// Runs at most `workers` extractions at a time on the blocking pool.
struct ExtractionPool {
    pending: std::vec::IntoIter<DiscoveredFile>,
    tasks: JoinSet<Extracted>,
    workers: usize,
    shutdown: Arc<AtomicBool>,
    interrupted: bool,
    job: fn(DiscoveredFile) -> Extracted,
}

impl ExtractionPool {
    fn new(files: Vec<DiscoveredFile>, workers: usize, shutdown: Arc<AtomicBool>) -> Self {
        Self::with_job(files, workers, shutdown, extract_file)
    }

    fn with_job(
        files: Vec<DiscoveredFile>,
        workers: usize,
        shutdown: Arc<AtomicBool>,
        job: fn(DiscoveredFile) -> Extracted,
    ) -> Self {
        Self {
            pending: files.into_iter(),
            tasks: JoinSet::new(),
            workers: workers.max(1),
            shutdown,
            interrupted: false,
            job,
        }
    }

    /// Next finished extraction, in completion order.
    async fn next(&mut self) -> Option<Extracted> {
        self.fill();
        let joined = self.tasks.join_next().await?;
        // tasks catch their own panics, so this only fails if the runtime cancels them
        Some(joined.unwrap_or_else(|e| Extracted::Failed {
            path: PathBuf::from("<cancelled>"),
            reason: format!("worker failed: {}", e),
        }))
    }

    fn fill(&mut self) {
        while self.tasks.len() < self.workers && !self.interrupted {
            if self.shutdown.load(Ordering::SeqCst) {
                self.interrupted = !self.pending.as_slice().is_empty();
                return;
            }
            let Some(file) = self.pending.next() else {
                return;
            };
            let job = self.job;
            self.tasks.spawn_blocking(move || {
                let path = file.path.clone();
                panic::catch_unwind(AssertUnwindSafe(|| job(file))).unwrap_or_else(|payload| {
                    Extracted::Failed {
                        path,
                        reason: format!("extraction panicked: {}", panic_message(payload.as_ref())),
                    }
                })
            });
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupted
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn extract_file(file: DiscoveredFile) -> Extracted {
    let archive = match ArchiveFile::from_path(&file.path, file.depth) {
        Ok(archive) => archive,
        Err(e) => {
            return Extracted::Failed {
                path: file.path,
                reason: e.to_string(),
            }
        }
    };

    match extract::extract_archive(&archive.path) {
        Ok(objects) => {
            let fragments = dedup_fragments(objects.into_iter().map(JsonFragment::new).collect());
            Extracted::Done(SearchResult { archive, fragments })
        }
        Err(e) => Extracted::Failed {
            path: archive.path,
            reason: e.to_string(),
        },
    }
}
