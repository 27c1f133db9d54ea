//! Batch scheduling over a bounded worker pool
//!
//! [`BatchScheduler`] enumerates inputs, queues one [`ImageTask`] per file and
//! runs them on a fixed-size rayon pool. Workers pull from a shared FIFO
//! queue and check the [`CancellationToken`] between tasks; results flow back
//! over a channel to the calling thread, which folds them into the
//! [`BatchReport`] in completion order and drives the progress callback.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::analysis::{KeywordGenerator, VisionBackend};
use crate::backup::{BackupManager, BackupMode};
use crate::config::Config;
use crate::error::{Result, ConverterError};
use crate::ledger::ProcessedLedger;
use crate::naming::NameResolver;
use crate::processing::{compression_ratio, is_supported_input_path, ImageOptimizer, OptimizeOptions};

pub mod progress;
pub mod scheduler;
pub mod task;

pub use progress::*;
pub use scheduler::*;
pub use task::{ImageTask, ProcessingResult, TaskError, TaskOutcome, TaskState};

use task::TaskContext;

/// Aggregate outcome of one batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub status: BatchStatus,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Tasks never dispatched because the batch was stopped
    pub not_started: usize,
    pub original_bytes: u64,
    pub optimized_bytes: u64,
    /// Signed: negative when outputs grew
    pub bytes_saved: i64,
    pub elapsed: Duration,
    /// In completion order
    pub results: Vec<ProcessingResult>,
}

impl BatchReport {
    fn new(total: usize) -> Self {
        Self {
            status: BatchStatus::Completed,
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            not_started: 0,
            original_bytes: 0,
            optimized_bytes: 0,
            bytes_saved: 0,
            elapsed: Duration::ZERO,
            results: Vec::with_capacity(total),
        }
    }

    fn record(&mut self, result: ProcessingResult) {
        match result.outcome {
            TaskOutcome::Succeeded => self.succeeded += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::Skipped => self.skipped += 1,
        }

        if let Some(stats) = &result.optimization {
            if result.is_success() {
                self.original_bytes += stats.original_bytes;
                self.optimized_bytes += stats.optimized_bytes;
                self.bytes_saved += stats.bytes_saved();
            }
        }

        self.results.push(result);
    }

    fn finish(&mut self, status: BatchStatus, elapsed: Duration) {
        self.status = status;
        self.not_started = self.total - self.results.len();
        self.elapsed = elapsed;
    }

    /// Tasks that reached a terminal state
    pub fn completed(&self) -> usize {
        self.results.len()
    }

    /// Every failed item with its classification, for targeted retries
    pub fn failed_items(&self) -> Vec<&ProcessingResult> {
        self.results.iter().filter(|r| r.is_failure()).collect()
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Savings over all successful items, as a percentage
    pub fn compression_ratio(&self) -> f64 {
        compression_ratio(self.original_bytes, self.optimized_bytes)
    }

    /// Mean of the per-item savings percentages
    pub fn average_compression_ratio(&self) -> f64 {
        let ratios: Vec<f64> = self
            .results
            .iter()
            .filter(|r| r.is_success())
            .filter_map(ProcessingResult::compression_ratio)
            .collect();

        if ratios.is_empty() {
            0.0
        } else {
            ratios.iter().sum::<f64>() / ratios.len() as f64
        }
    }

    pub fn files_per_second(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }
        self.completed() as f64 / self.elapsed.as_secs_f64()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs batches of images through analysis, naming, backup and encoding
///
/// A scheduler runs one batch at a time; a second `run` while one is in
/// progress fails with a parallel error. It can be reused once the batch
/// returns, whether it completed, was cancelled or timed out.
pub struct BatchScheduler {
    config: Arc<Config>,
    backend: Arc<dyn VisionBackend>,
    cancel: CancellationToken,
    progress: Arc<ProgressTracker>,
    running: AtomicBool,
}

impl BatchScheduler {
    /// Validate `config` and build a scheduler around `backend`
    pub fn new(config: Config, backend: Arc<dyn VisionBackend>) -> Result<Self> {
        config.validate()?;
        if config.seo.max_suffix_attempts == 0 {
            warn!("max_suffix_attempts is 0, name collisions will fail items");
        }

        Ok(Self {
            config: Arc::new(config),
            backend,
            cancel: CancellationToken::new(),
            progress: Arc::new(ProgressTracker::new()),
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token that stops the running batch at the next task boundary
    ///
    /// Every run re-arms the token when it starts, so a stop only affects
    /// the batch in progress.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Live counters of the batch in progress, or of the last one
    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    /// Supported image files under `input_dir`, sorted by path
    pub fn discover(&self, input_dir: &Path) -> Result<Vec<PathBuf>> {
        self.discover_excluding(input_dir, &[])
    }

    fn discover_excluding(&self, input_dir: &Path, excluded: &[PathBuf]) -> Result<Vec<PathBuf>> {
        if !input_dir.is_dir() {
            return Err(ConverterError::config(format!(
                "Input directory does not exist or is not a directory: {:?}",
                input_dir
            )));
        }

        let max_depth = if self.config.processing.recursive { usize::MAX } else { 1 };

        let mut files: Vec<PathBuf> = WalkDir::new(input_dir)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|entry| !excluded.iter().any(|dir| entry.path() == dir))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_supported_input_path(entry.path()))
            .map(|entry| entry.into_path())
            .collect();

        files.sort();
        debug!("Discovered {} images in {:?}", files.len(), input_dir);
        Ok(files)
    }

    /// Process every image in `input_dir` with `concurrency` workers
    pub fn run(&self, input_dir: &Path, output_dir: &Path, concurrency: usize) -> Result<BatchReport> {
        self.run_with_progress(input_dir, output_dir, concurrency, |_, _, _| {})
    }

    /// Like [`run`](Self::run), calling `on_progress(completed, total, latest)`
    /// on the calling thread after every finished task
    pub fn run_with_progress<F>(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        concurrency: usize,
        on_progress: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(usize, usize, &ProcessingResult),
    {
        // Generated directories nested in the input tree are not inputs
        let excluded: Vec<PathBuf> = [output_dir.to_path_buf(), self.backup_root(output_dir)]
            .into_iter()
            .filter(|dir| dir.as_path() != input_dir)
            .collect();

        let files = self.discover_excluding(input_dir, &excluded)?;
        self.run_files(files, output_dir, concurrency, on_progress)
    }

    /// Process an explicit list of files
    pub fn run_files<F>(
        &self,
        files: Vec<PathBuf>,
        output_dir: &Path,
        concurrency: usize,
        mut on_progress: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(usize, usize, &ProcessingResult),
    {
        if concurrency == 0 {
            return Err(ConverterError::config("Concurrency must be at least 1"));
        }

        let _run = RunGuard::acquire(&self.running)?;
        self.cancel.reset();

        let start = Instant::now();
        let context = self.build_context(output_dir)?;
        let total = files.len();
        let workers = concurrency.min(total.max(1));

        info!(
            "Processing {} images with {} workers{}",
            total,
            workers,
            if context.dry_run { " (dry run)" } else { "" }
        );

        let tasks = files
            .into_iter()
            .enumerate()
            .map(|(id, path)| ImageTask::new(id, path, output_dir))
            .collect();
        let queue = WorkQueue::new(tasks);
        let deadline = self.config.processing.batch_timeout().map(|limit| start + limit);

        self.progress.start(total);
        let mut report = BatchReport::new(total);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("seo-worker-{}", i))
            .build()
            .map_err(|e| ConverterError::parallel(format!("Failed to build worker pool: {}", e)))?;

        pool.in_place_scope(|scope| {
            let (result_tx, result_rx) = channel::unbounded();

            for worker_id in 0..workers {
                let result_tx = result_tx.clone();
                let (context, queue, cancel) = (&context, &queue, &self.cancel);
                scope.spawn(move |_| worker_loop(worker_id, context, queue, result_tx, cancel, deadline));
            }
            drop(result_tx);

            // Ends once every worker has dropped its sender
            for result in result_rx.iter() {
                self.progress.record(&result);
                report.record(result);

                let completed = report.completed();
                if let Some(latest) = report.results.last() {
                    on_progress(completed, total, latest);
                }

                if completed % 10 == 0 || completed == total {
                    let state = self.progress.snapshot();
                    info!(
                        "Progress: {} ({}, ETA {})",
                        state.status_text(),
                        state.speed_text(),
                        state.eta_text()
                    );
                }
            }
        });

        report.finish(self.cancel.status(), start.elapsed());
        if report.not_started > 0 {
            info!("{} tasks were not started ({:?})", queue.remaining(), report.status);
        }

        info!(
            "Batch {:?}: {} succeeded, {} failed, {} skipped in {:.2}s",
            report.status,
            report.succeeded,
            report.failed,
            report.skipped,
            report.elapsed.as_secs_f64()
        );

        Ok(report)
    }

    fn backup_root(&self, output_dir: &Path) -> PathBuf {
        self.config
            .processing
            .backup_dir
            .clone()
            .unwrap_or_else(|| output_dir.join("originals_backup"))
    }

    fn build_context(&self, output_dir: &Path) -> Result<TaskContext> {
        let config = &self.config;
        let processing = &config.processing;

        if !processing.dry_run {
            std::fs::create_dir_all(output_dir).map_err(|e| {
                ConverterError::write(format!("Cannot create output directory: {}", e), output_dir.to_path_buf())
            })?;
        }

        let backup = (processing.backup_originals && !processing.dry_run).then(|| {
            let mode = if processing.move_originals { BackupMode::Move } else { BackupMode::Copy };
            BackupManager::new(&self.backup_root(output_dir), chrono::Local::now(), mode)
        });

        Ok(TaskContext {
            generator: KeywordGenerator::new(Arc::clone(&self.backend), config),
            optimizer: ImageOptimizer::new(processing.max_file_size),
            resolver: NameResolver::new(&config.seo),
            backup,
            ledger: ProcessedLedger::open(output_dir)?,
            options: OptimizeOptions::from_config(&config.image),
            skip_existing: processing.skip_existing,
            dry_run: processing.dry_run,
        })
    }
}

/// Marks a scheduler busy for the lifetime of one batch
#[derive(Debug)]
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| Self(flag))
            .map_err(|_| ConverterError::parallel("A batch is already running on this scheduler"))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Pull tasks until the queue drains or the batch is stopped
fn worker_loop(
    worker_id: usize,
    context: &TaskContext,
    queue: &WorkQueue,
    results: Sender<ProcessingResult>,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            cancel.time_out();
        }
        if cancel.is_cancelled() {
            break;
        }

        let Some(task) = queue.next() else {
            break;
        };

        let source = task.source_path.clone();
        let result = catch_unwind(AssertUnwindSafe(|| context.execute(task))).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            warn!("Worker {} panicked on {:?}: {}", worker_id, source, message);
            ProcessingResult::panicked(source, message, context.dry_run)
        });

        if results.send(result).is_err() {
            break;
        }
    }

    debug!("Worker {} finished", worker_id);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
