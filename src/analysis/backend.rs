//! Vision backend collaborator
//!
//! The pipeline only needs "describe this image in N keywords". [`VisionBackend`]
//! is that seam; [`OllamaBackend`] implements it against an Ollama server's
//! `/api/generate` endpoint.

use std::io;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::OllamaConfig;

/// Classified failure of a single backend call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("vision backend unavailable: {0}")]
    Unavailable(String),

    #[error("vision backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// Image description service
pub trait VisionBackend: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Return raw text describing `image` in `keyword_count` keywords
    fn describe(&self, image: &[u8], keyword_count: usize) -> Result<String, BackendError>;

    /// Check that the service is reachable and ready
    fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Instruction sent alongside every image
pub fn keyword_prompt(keyword_count: usize) -> String {
    format!(
        "Look at this image and write exactly {count} keywords that describe it for search engines.\n\
         \n\
         Rules:\n\
         - lowercase letters and digits only\n\
         - join the keywords with hyphens, no spaces\n\
         - cover subjects, actions, setting, colors and mood\n\
         - be specific: prefer \"golden-retriever\" over \"dog\"\n\
         - leave out articles, prepositions and other stop words\n\
         \n\
         Example: red-vintage-bicycle-cobblestone-street-sunny-afternoon-europe\n\
         \n\
         Reply with the {count} hyphen-separated keywords and nothing else.",
        count = keyword_count
    )
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Blocking client for an Ollama vision model
pub struct OllamaBackend {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    timeout: Duration,
    temperature: f32,
    top_p: f32,
    top_k: u32,
}

impl OllamaBackend {
    pub fn new(config: &OllamaConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout())
            .build();

        Self {
            agent,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            timeout: config.timeout(),
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
        }
    }

    /// Model listing URL derived from the generate endpoint
    fn tags_url(&self) -> String {
        let base = self
            .endpoint
            .strip_suffix("/api/generate")
            .unwrap_or_else(|| self.endpoint.trim_end_matches('/'));
        format!("{}/api/tags", base)
    }

    fn map_call_error(&self, err: ureq::Error) -> BackendError {
        match err {
            ureq::Error::Status(code, response) => {
                let body = response.into_string().unwrap_or_default();
                BackendError::Unavailable(format!("HTTP {}: {}", code, body.trim()))
            }
            ureq::Error::Transport(transport) => {
                if is_timeout(&transport) {
                    BackendError::Timeout(self.timeout)
                } else {
                    BackendError::Unavailable(transport.to_string())
                }
            }
        }
    }
}

impl VisionBackend for OllamaBackend {
    fn name(&self) -> &str {
        &self.model
    }

    fn describe(&self, image: &[u8], keyword_count: usize) -> Result<String, BackendError> {
        let payload = serde_json::json!({
            "model": self.model,
            "prompt": keyword_prompt(keyword_count),
            "images": [general_purpose::STANDARD.encode(image)],
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "top_p": self.top_p,
                "top_k": self.top_k,
            },
        });

        debug!("POST {} ({} image bytes)", self.endpoint, image.len());

        let response = self
            .agent
            .post(&self.endpoint)
            .send_json(payload)
            .map_err(|e| self.map_call_error(e))?;

        let body: GenerateResponse = response.into_json().map_err(|e| {
            if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                BackendError::Timeout(self.timeout)
            } else {
                BackendError::Malformed(format!("invalid JSON body: {}", e))
            }
        })?;

        let text = body.response.trim();
        if text.is_empty() {
            return Err(BackendError::Malformed("empty response field".to_string()));
        }

        Ok(text.to_string())
    }

    fn health_check(&self) -> Result<(), BackendError> {
        let url = self.tags_url();
        let response = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build()
            .get(&url)
            .call()
            .map_err(|e| self.map_call_error(e))?;

        let tags: TagsResponse = response
            .into_json()
            .map_err(|e| BackendError::Malformed(format!("invalid model list: {}", e)))?;

        let wanted = self.model.split(':').next().unwrap_or(&self.model);
        let available = tags
            .models
            .iter()
            .any(|m| m.name == self.model || m.name.split(':').next() == Some(wanted));

        if available {
            Ok(())
        } else {
            let names: Vec<&str> = tags.models.iter().map(|m| m.name.as_str()).collect();
            warn!("Model '{}' not found, available: {:?}", self.model, names);
            Err(BackendError::Unavailable(format!("model '{}' is not installed", self.model)))
        }
    }
}

/// Whether a transport failure was caused by an I/O timeout
fn is_timeout(err: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if matches!(io_err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}
