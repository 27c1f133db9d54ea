//! A single image's trip through the pipeline

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::analysis::{KeywordGenerator, KeywordResult};
use crate::backup::BackupManager;
use crate::error::{ErrorContext, ErrorKind, Result, ConverterError};
use crate::ledger::{sha256_hex, LedgerEntry, ProcessedLedger};
use crate::naming::{ClaimedPath, NameResolver};
use crate::processing::{decode_image, ImageOptimizer, OptimizationStats, OptimizeOptions};

/// Lifecycle of an [`ImageTask`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Pending,
    AnalyzingKeywords,
    Optimizing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What a finished task amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskOutcome {
    Succeeded,
    Skipped,
    Failed,
}

/// One unit of work, owned by exactly one worker
#[derive(Debug)]
pub struct ImageTask {
    pub id: usize,
    pub source_path: PathBuf,
    pub output_dir: PathBuf,
    state: TaskState,
}

impl ImageTask {
    pub fn new(id: usize, source_path: PathBuf, output_dir: &Path) -> Self {
        Self {
            id,
            source_path,
            output_dir: output_dir.to_path_buf(),
            state: TaskState::Pending,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Move to `next`; terminal states are final
    fn advance(&mut self, next: TaskState) {
        if self.state.is_terminal() {
            warn!("Task {} already {:?}, ignoring move to {:?}", self.id, self.state, next);
            return;
        }
        debug!("Task {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}

/// Classified failure of one task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ConverterError> for TaskError {
    fn from(err: &ConverterError) -> Self {
        Self::new(err.kind(), err.user_message())
    }
}

/// Final record for one input
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub source_path: PathBuf,
    /// Written (or, in dry-run, would-be) output; the earlier output when skipped
    pub output_path: Option<PathBuf>,
    pub backup_path: Option<PathBuf>,
    pub state: TaskState,
    pub outcome: TaskOutcome,
    pub keywords: Option<KeywordResult>,
    pub optimization: Option<OptimizationStats>,
    pub error: Option<TaskError>,
    pub dry_run: bool,
    pub duration: Duration,
}

impl ProcessingResult {
    /// Empty record for `source_path`, filled in as the task progresses
    pub fn new(source_path: PathBuf, dry_run: bool) -> Self {
        Self {
            source_path,
            output_path: None,
            backup_path: None,
            state: TaskState::Pending,
            outcome: TaskOutcome::Failed,
            keywords: None,
            optimization: None,
            error: None,
            dry_run,
            duration: Duration::ZERO,
        }
    }

    /// Record for a task whose worker panicked
    pub fn panicked(source_path: PathBuf, message: String, dry_run: bool) -> Self {
        let mut result = Self::new(source_path, dry_run);
        result.state = TaskState::Failed;
        result.error = Some(TaskError::new(ErrorKind::Internal, format!("worker panicked: {}", message)));
        result
    }

    pub fn is_success(&self) -> bool {
        self.outcome == TaskOutcome::Succeeded
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == TaskOutcome::Failed
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Savings percentage of the encode, if one happened
    pub fn compression_ratio(&self) -> Option<f64> {
        self.optimization.as_ref().map(OptimizationStats::compression_ratio)
    }
}

/// Shared, read-only collaborators used by every worker
pub(crate) struct TaskContext {
    pub generator: KeywordGenerator,
    pub optimizer: ImageOptimizer,
    pub resolver: NameResolver,
    pub backup: Option<BackupManager>,
    pub ledger: ProcessedLedger,
    pub options: OptimizeOptions,
    pub skip_existing: bool,
    pub dry_run: bool,
}

impl TaskContext {
    /// Run `task` to a terminal state; never fails
    pub fn execute(&self, mut task: ImageTask) -> ProcessingResult {
        let start = Instant::now();
        let mut result = ProcessingResult::new(task.source_path.clone(), self.dry_run);

        match self.run_pipeline(&mut task, &mut result) {
            Ok(outcome) => {
                task.advance(TaskState::Completed);
                result.outcome = outcome;
                match outcome {
                    TaskOutcome::Skipped => info!("Skipped {:?}, already processed", task.source_path),
                    _ => info!(
                        "{} {:?} -> {:?} ({:.1}%)",
                        if self.dry_run { "Would write" } else { "Wrote" },
                        task.source_path,
                        result.output_path.as_deref().unwrap_or(Path::new("?")),
                        result.compression_ratio().unwrap_or(0.0)
                    ),
                }
            }
            Err(e) => {
                task.advance(TaskState::Failed);
                error!("Failed {:?}: {}", task.source_path, e);
                result.outcome = TaskOutcome::Failed;
                result.error = Some(TaskError::from(&e));
            }
        }

        result.state = task.state();
        result.duration = start.elapsed();
        result
    }

    fn run_pipeline(&self, task: &mut ImageTask, result: &mut ProcessingResult) -> Result<TaskOutcome> {
        let source = task.source_path.clone();
        let validator = self.optimizer.validator();

        validator.validate_file(&source)?;
        let data = std::fs::read(&source).map_err(|e| {
            ConverterError::decode(format!("Cannot read file: {}", e), Some(source.clone()))
        })?;
        validator.validate_contents(&data, &source)?;

        let source_hash = sha256_hex(&data);
        if self.skip_existing {
            if let Some(existing) = self.ledger.lookup(&source_hash) {
                result.output_path = Some(existing.to_path_buf());
                return Ok(TaskOutcome::Skipped);
            }
        }

        // Decoded once, before any network or filesystem side effect
        let image = decode_image(&data, self.options.auto_orient).with_file_context(source.clone())?;

        task.advance(TaskState::AnalyzingKeywords);
        let keywords = self.generator.analyze_bytes(&source, &data);
        let extension = self.options.format.extension();

        let resolved = if self.dry_run {
            self.resolver
                .resolve(&keywords.keywords, &task.output_dir, extension)
                .map(|path| (path, None))
        } else {
            self.resolver
                .claim(&keywords.keywords, &task.output_dir, extension)
                .map(|claim| (claim.path().to_path_buf(), Some(claim)))
        };
        result.keywords = Some(keywords);
        let (output_path, claim): (PathBuf, Option<ClaimedPath>) = resolved?;
        result.output_path = Some(output_path);

        if let Some(backup) = &self.backup {
            result.backup_path = Some(backup.backup(&source)?);
        }

        task.advance(TaskState::Optimizing);
        let optimized = self
            .optimizer
            .optimize_image(image, data.len() as u64, &self.options)
            .with_file_context(source.clone())?;
        result.optimization = Some(optimized.stats.clone());

        if let Some(claim) = claim {
            let written = claim.commit(&optimized.encoded_data)?;

            let entry = LedgerEntry {
                source: source.clone(),
                output: written,
                source_hash,
                output_hash: sha256_hex(&optimized.encoded_data),
                bytes: optimized.stats.optimized_bytes,
                timestamp: chrono::Utc::now().timestamp(),
            };
            if let Err(e) = self.ledger.record(&entry) {
                warn!("Output written but not recorded in ledger: {}", e);
            }
        }

        Ok(TaskOutcome::Succeeded)
    }
}
