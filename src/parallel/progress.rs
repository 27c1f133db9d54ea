//! Progress tracking for batch runs

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

use super::task::{ProcessingResult, TaskOutcome};

/// Thread-safe progress tracker for a batch
pub struct ProgressTracker {
    start_time: Mutex<Option<Instant>>,
    total: AtomicUsize,

    // Atomic counters for high-frequency updates
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    bytes_saved: AtomicI64,
    bytes_written: AtomicU64,
}

/// Point-in-time view of a running batch
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    pub total_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes_saved: i64,
    pub bytes_written: u64,
    pub elapsed_time: Duration,
    pub estimated_remaining: Option<Duration>,
    pub files_per_second: f64,
    pub completion_percentage: f64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            start_time: Mutex::new(None),
            total: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            bytes_saved: AtomicI64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// Reset counters for a batch of `total_files`
    pub fn start(&self, total_files: usize) {
        *self.start_time.lock().unwrap_or_else(|p| p.into_inner()) = Some(Instant::now());
        self.total.store(total_files, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.bytes_saved.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);

        info!("Started progress tracking for {} files", total_files);
    }

    /// Count a finished task
    pub fn record(&self, result: &ProcessingResult) {
        let counter = match result.outcome {
            TaskOutcome::Succeeded => &self.succeeded,
            TaskOutcome::Failed => &self.failed,
            TaskOutcome::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Some(stats) = &result.optimization {
            self.bytes_saved.fetch_add(stats.bytes_saved(), Ordering::Relaxed);
            self.bytes_written.fetch_add(stats.optimized_bytes, Ordering::Relaxed);
        }
    }

    /// Current progress with derived rates
    pub fn snapshot(&self) -> ProgressState {
        let started = *self.start_time.lock().unwrap_or_else(|p| p.into_inner());
        let elapsed = started.map(|start| start.elapsed()).unwrap_or_default();

        let mut state = ProgressState {
            total_files: self.total.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            elapsed_time: elapsed,
            ..ProgressState::default()
        };

        let done = state.processed();
        if state.total_files > 0 {
            state.completion_percentage = (done as f64 / state.total_files as f64) * 100.0;
        }

        if elapsed.as_secs_f64() > 0.0 {
            state.files_per_second = done as f64 / elapsed.as_secs_f64();

            if done > 0 && state.total_files > done {
                let remaining = (state.total_files - done) as f64;
                let per_file = elapsed.as_secs_f64() / done as f64;
                state.estimated_remaining = Some(Duration::from_secs_f64(remaining * per_file));
            }
        }

        state
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressState {
    /// Tasks that reached a terminal state
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Get human-readable completion status
    pub fn status_text(&self) -> String {
        if self.total_files > 0 && self.processed() >= self.total_files {
            "Completed".to_string()
        } else {
            format!("{}/{} files processed", self.processed(), self.total_files)
        }
    }

    /// Get estimated time remaining as human-readable string
    pub fn eta_text(&self) -> String {
        match self.estimated_remaining {
            Some(duration) => {
                let seconds = duration.as_secs();
                if seconds < 60 {
                    format!("{}s", seconds)
                } else if seconds < 3600 {
                    format!("{}m {}s", seconds / 60, seconds % 60)
                } else {
                    format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
                }
            }
            None => "Unknown".to_string(),
        }
    }

    /// Get processing speed as human-readable string
    pub fn speed_text(&self) -> String {
        if self.files_per_second >= 1.0 {
            format!("{:.1} files/sec", self.files_per_second)
        } else if self.files_per_second > 0.0 {
            format!("{:.1} sec/file", 1.0 / self.files_per_second)
        } else {
            "Unknown".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::error::ErrorKind;
    use crate::parallel::task::TaskError;
    use crate::processing::OptimizationStats;
    use std::path::PathBuf;

    fn result(outcome: TaskOutcome, original: u64, optimized: u64) -> ProcessingResult {
        let mut result = ProcessingResult::new(PathBuf::from("a.jpg"), false);
        result.outcome = outcome;
        if outcome == TaskOutcome::Succeeded {
            result.optimization = Some(OptimizationStats {
                original_bytes: original,
                optimized_bytes: optimized,
                format: OutputFormat::WebP,
                width: 1,
                height: 1,
                lossless: true,
            });
        } else if outcome == TaskOutcome::Failed {
            result.error = Some(TaskError::new(ErrorKind::Decode, "bad"));
        }
        result
    }

    #[test]
    fn test_progress_tracker_basic() {
        let tracker = ProgressTracker::new();
        tracker.start(10);

        let state = tracker.snapshot();
        assert_eq!(state.total_files, 10);
        assert_eq!(state.processed(), 0);

        tracker.record(&result(TaskOutcome::Succeeded, 1000, 400));
        tracker.record(&result(TaskOutcome::Succeeded, 100, 150));
        tracker.record(&result(TaskOutcome::Failed, 0, 0));
        tracker.record(&result(TaskOutcome::Skipped, 0, 0));

        let state = tracker.snapshot();
        assert_eq!((state.succeeded, state.failed, state.skipped), (2, 1, 1));
        assert_eq!(state.bytes_saved, 550);
        assert_eq!(state.bytes_written, 550);
        assert_eq!(state.completion_percentage, 40.0);
        assert!(state.status_text().contains("4/10"));
    }

    #[test]
    fn test_progress_state_text() {
        let mut state = ProgressState {
            total_files: 4,
            succeeded: 4,
            files_per_second: 2.5,
            estimated_remaining: Some(Duration::from_secs(125)),
            ..ProgressState::default()
        };

        assert_eq!(state.status_text(), "Completed");
        assert!(state.speed_text().contains("2.5 files/sec"));
        assert_eq!(state.eta_text(), "2m 5s");

        state.files_per_second = 0.25;
        assert_eq!(state.speed_text(), "4.0 sec/file");
        state.estimated_remaining = None;
        assert_eq!(state.eta_text(), "Unknown");
    }
}
