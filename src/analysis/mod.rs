//! Keyword generation for SEO filenames
//!
//! [`KeywordGenerator::analyze`] never fails: backend errors, timeouts and
//! unusable replies are retried, and once retries run out the result degrades
//! to fallback keywords built from the original filename. The reason for the
//! degradation is kept in [`KeywordResult::degraded_by`].

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;

pub mod backend;
pub mod keywords;

pub use backend::{keyword_prompt, BackendError, OllamaBackend, VisionBackend};
pub use keywords::{fallback_keywords, normalize_response};

/// Where a set of keywords came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeywordSource {
    AIGenerated,
    Fallback,
}

/// Why analysis fell back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnalysisErrorKind {
    BackendUnavailable,
    Timeout,
    MalformedResponse,
    ImageUnreadable,
}

impl From<&BackendError> for AnalysisErrorKind {
    fn from(err: &BackendError) -> Self {
        match err {
            BackendError::Unavailable(_) => Self::BackendUnavailable,
            BackendError::Timeout(_) => Self::Timeout,
            BackendError::Malformed(_) => Self::MalformedResponse,
        }
    }
}

/// Outcome of analysing one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordResult {
    /// Lowercase, unique, never empty
    pub keywords: Vec<String>,
    pub source: KeywordSource,
    pub latency: Duration,
    pub attempts_used: u32,
    /// Set when `source` is `Fallback`
    pub degraded_by: Option<AnalysisErrorKind>,
}

impl KeywordResult {
    pub fn is_fallback(&self) -> bool {
        self.source == KeywordSource::Fallback
    }

    /// Keywords joined with hyphens
    pub fn joined(&self) -> String {
        self.keywords.join("-")
    }
}

/// Retrying client around a [`VisionBackend`]
pub struct KeywordGenerator {
    backend: Arc<dyn VisionBackend>,
    keyword_count: usize,
    min_keywords: usize,
    max_retries: u32,
    retry_delay: Duration,
    fallback_prefix: String,
}

impl KeywordGenerator {
    pub fn new(backend: Arc<dyn VisionBackend>, config: &Config) -> Self {
        Self {
            backend,
            keyword_count: config.seo.keyword_count,
            min_keywords: config.seo.min_keywords.max(1),
            max_retries: config.ollama.max_retries.max(1),
            retry_delay: config.ollama.retry_delay(),
            fallback_prefix: config.seo.fallback_prefix.clone(),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Read the image at `path` and analyse it
    pub fn analyze(&self, path: &Path) -> KeywordResult {
        let start = Instant::now();
        match std::fs::read(path) {
            Ok(data) => self.analyze_bytes(path, &data),
            Err(e) => {
                warn!("Cannot read {:?} for analysis: {}", path, e);
                self.fallback(path, start, 0, AnalysisErrorKind::ImageUnreadable)
            }
        }
    }

    /// Analyse already loaded image bytes; `path` only feeds fallback naming
    pub fn analyze_bytes(&self, path: &Path, image: &[u8]) -> KeywordResult {
        let start = Instant::now();
        let mut last_error = AnalysisErrorKind::BackendUnavailable;

        for attempt in 1..=self.max_retries {
            debug!(
                "Analysing {:?} with {} (attempt {}/{})",
                path,
                self.backend.name(),
                attempt,
                self.max_retries
            );

            match self.backend.describe(image, self.keyword_count) {
                Ok(reply) => {
                    let keywords = normalize_response(&reply, self.keyword_count);
                    if keywords.len() >= self.min_keywords {
                        return KeywordResult {
                            keywords,
                            source: KeywordSource::AIGenerated,
                            latency: start.elapsed(),
                            attempts_used: attempt,
                            degraded_by: None,
                        };
                    }
                    warn!(
                        "Unusable reply for {:?} (attempt {}): {} keyword(s) from {:?}",
                        path,
                        attempt,
                        keywords.len(),
                        reply
                    );
                    last_error = AnalysisErrorKind::MalformedResponse;
                }
                Err(e) => {
                    warn!("Analysis of {:?} failed (attempt {}): {}", path, attempt, e);
                    last_error = AnalysisErrorKind::from(&e);
                }
            }

            if attempt < self.max_retries && !self.retry_delay.is_zero() {
                std::thread::sleep(self.retry_delay);
            }
        }

        self.fallback(path, start, self.max_retries, last_error)
    }

    fn fallback(
        &self,
        path: &Path,
        start: Instant,
        attempts_used: u32,
        reason: AnalysisErrorKind,
    ) -> KeywordResult {
        let keywords = fallback_keywords(&self.fallback_prefix, path, chrono::Utc::now().timestamp());
        warn!("Using fallback name for {:?} ({:?}): {}", path, reason, keywords.join("-"));

        KeywordResult {
            keywords,
            source: KeywordSource::Fallback,
            latency: start.elapsed(),
            attempts_used,
            degraded_by: Some(reason),
        }
    }
}
