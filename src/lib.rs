//! SEO Image Converter - batch image optimizer with descriptive filenames
//!
//! Takes a directory of photos and, for each one, asks a local vision model
//! for a handful of keywords, turns them into a collision-free slug filename,
//! backs up the original and re-encodes it into a web-friendly format. The
//! whole batch runs on a bounded worker pool; one bad file never stops it.
//!
//! # Features
//!
//! - **Keyword analysis**: Ollama vision models, with deterministic fallback names when the model is unreachable
//! - **Safe naming**: atomic name claims, `-2`/`-3` suffixes and timestamp fallback on collisions
//! - **Backups**: timestamped per-run backup directory, copy or move
//! - **Formats**: JPEG, PNG, WebP, GIF, TIFF, BMP in; WebP, PNG, JPEG out
//! - **Reruns**: content-hash ledger to skip images already converted
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use seo_image_converter::{BatchScheduler, Config, OllamaBackend};
//!
//! let config = Config::default();
//! let backend = Arc::new(OllamaBackend::new(&config.ollama));
//! let jobs = config.processing.worker_count();
//!
//! let scheduler = BatchScheduler::new(config, backend)?;
//! let report = scheduler.run(Path::new("photos"), Path::new("photos/seo"), jobs)?;
//!
//! println!("{} converted, {} failed", report.succeeded, report.failed);
//! # Ok::<(), seo_image_converter::ConverterError>(())
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

use std::sync::Mutex;

use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

pub mod analysis;
pub mod backup;
pub mod config;
pub mod error;
pub mod ledger;
pub mod naming;
pub mod parallel;
pub mod processing;

// Re-export commonly used types
pub use analysis::{KeywordGenerator, KeywordResult, KeywordSource, OllamaBackend, VisionBackend};
pub use config::{Config, LoggingConfig, OutputFormat};
pub use error::{ConverterError, ErrorKind, Result};
pub use parallel::{BatchReport, BatchScheduler, BatchStatus, CancellationToken, ProcessingResult};
pub use processing::{ImageOptimizer, OptimizeOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with default settings and check the host
///
/// Honours `RUST_LOG`. Safe to call more than once; only the first call
/// installs a subscriber.
pub fn init() -> Result<()> {
    init_with_config(&LoggingConfig::default())
}

/// Initialize logging from the `[logging]` section
///
/// `RUST_LOG` takes precedence over `config.level`. Logs go to stderr unless
/// `config.file` is set, so stdout stays free for reports.
pub fn init_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, ansi) = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ConverterError::config(format!("Cannot open log file {:?}: {}", path, e)))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi);

    let installed = if config.json_format {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        info!("SEO Image Converter v{} initialized", VERSION);
    }

    validate_system_requirements()?;

    Ok(())
}

/// Log host capabilities and warn about obvious shortfalls
pub fn validate_system_requirements() -> Result<()> {
    use sysinfo::{System, SystemExt};

    let mut system = System::new();
    system.refresh_memory();

    // Decoded 24MP images need a few hundred MB per worker
    let available_memory = system.available_memory();
    const MIN_MEMORY_MB: u64 = 512;

    if available_memory < MIN_MEMORY_MB * 1024 * 1024 {
        warn!(
            "Low available memory: {}MB (recommended: >{}MB)",
            available_memory / (1024 * 1024),
            MIN_MEMORY_MB
        );
    }

    info!(
        "Detected {} logical CPUs, default pool size {}",
        num_cpus::get(),
        parallel::default_worker_count()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_init() {
        // Should not fail on multiple calls
        let _ = init();
        let _ = init();
    }

    #[test]
    fn test_system_validation() {
        assert!(validate_system_requirements().is_ok());
    }
}
