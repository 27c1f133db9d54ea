//! Configuration management for the SEO image converter

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{Result, ConverterError};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output encoding settings
    pub image: ImageConfig,

    /// Vision backend settings
    pub ollama: OllamaConfig,

    /// Keyword and filename settings
    pub seo: SeoConfig,

    /// Batch processing settings
    pub processing: ProcessingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Output encoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Target output format
    pub format: OutputFormat,

    /// Prefer lossless encoding where the codec offers it
    pub lossless: bool,

    /// Request progressive encoding where the codec offers it
    pub progressive: bool,

    /// Rotate according to EXIF orientation before encoding
    pub auto_orient: bool,

    /// Downscale images larger than `max_dimension`
    pub resize_large: bool,

    /// Longest side in pixels when `resize_large` is set
    pub max_dimension: u32,

    /// Quality settings per format
    pub quality: QualityConfig,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::WebP,
            lossless: false,
            progressive: true,
            auto_orient: true,
            resize_large: false,
            max_dimension: 1920,
            quality: QualityConfig::default(),
        }
    }
}

impl ImageConfig {
    /// Quality value for the configured output format
    pub fn quality_for(&self, format: OutputFormat) -> u8 {
        match format {
            OutputFormat::WebP => self.quality.webp,
            OutputFormat::Jpeg => self.quality.jpeg,
            OutputFormat::Png => self.quality.png_compression,
        }
    }
}

/// Per-format quality
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// WebP quality (1-100)
    pub webp: u8,
    /// JPEG quality (1-100)
    pub jpeg: u8,
    /// PNG optimization level (0-6)
    pub png_compression: u8,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            webp: 85,
            jpeg: 90,
            png_compression: 6,
        }
    }
}

/// Ollama vision backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Generate endpoint
    pub endpoint: String,

    /// Vision model name
    pub model: String,

    /// Per-call timeout in seconds
    pub timeout_secs: u64,

    /// Attempts before falling back
    pub max_retries: u32,

    /// Fixed delay between attempts in seconds
    pub retry_delay_secs: f64,

    /// Sampling temperature
    pub temperature: f32,

    /// Nucleus sampling threshold
    pub top_p: f32,

    /// Top-k sampling
    pub top_k: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/generate".to_string(),
            model: "qwen2.5vl:7b".to_string(),
            timeout_secs: 45,
            max_retries: 3,
            retry_delay_secs: 2.0,
            temperature: 0.2,
            top_p: 0.95,
            top_k: 50,
        }
    }
}

impl OllamaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs.max(0.0))
    }
}

/// Keyword and filename configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeoConfig {
    /// Keywords requested from the backend
    pub keyword_count: usize,

    /// Fewer usable keywords than this is a malformed response
    pub min_keywords: usize,

    /// Maximum filename length including the extension
    pub max_filename_length: usize,

    /// First token of fallback names
    pub fallback_prefix: String,

    /// Numeric suffixes tried before the timestamp fallback
    pub max_suffix_attempts: u32,
}

impl Default for SeoConfig {
    fn default() -> Self {
        Self {
            keyword_count: 8,
            min_keywords: 3,
            max_filename_length: 100,
            fallback_prefix: "image".to_string(),
            max_suffix_attempts: 999,
        }
    }
}

/// Batch processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of workers (0 = 80% of available cores)
    pub parallel_jobs: usize,

    /// Enable recursive directory processing
    pub recursive: bool,

    /// Copy originals into a per-run backup directory before writing
    pub backup_originals: bool,

    /// Move instead of copy when backing up
    pub move_originals: bool,

    /// Backup root (None = `<output>/originals_backup`)
    pub backup_dir: Option<PathBuf>,

    /// Skip inputs already recorded in the output ledger
    pub skip_existing: bool,

    /// Analyze and encode without writing anything
    pub dry_run: bool,

    /// Stop dispatching new items after this many seconds
    pub batch_timeout_secs: Option<u64>,

    /// Maximum input file size in bytes
    pub max_file_size: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel_jobs: 0,
            recursive: false,
            backup_originals: true,
            move_originals: false,
            backup_dir: None,
            skip_existing: false,
            dry_run: false,
            batch_timeout_secs: None,
            max_file_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

impl ProcessingConfig {
    /// Effective worker count for this configuration
    pub fn worker_count(&self) -> usize {
        if self.parallel_jobs > 0 {
            self.parallel_jobs
        } else {
            crate::parallel::default_worker_count()
        }
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_secs.map(Duration::from_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON logging
    pub json_format: bool,

    /// Log file path (None = stderr)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file: None,
        }
    }
}

/// Supported output formats
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    WebP,
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
}

impl OutputFormat {
    /// Get file extension for this format
    pub fn extension(self) -> &'static str {
        match self {
            Self::WebP => "webp",
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    /// Get MIME type for this format
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::WebP => "image/webp",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::WebP => "WebP",
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputFormat {
    type Err = ConverterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "webp" => Ok(Self::WebP),
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            other => Err(ConverterError::unsupported_format(other)),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConverterError::config(
                format!("Failed to read config file {:?}: {}", path.as_ref(), e)
            ))?;

        let extension = path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        match extension.to_lowercase().as_str() {
            "toml" => toml::from_str(&content).map_err(Into::into),
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(Into::into),
            _ => Err(ConverterError::config(
                "Unsupported config file format. Use .toml or .yaml"
            )),
        }
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let extension = path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        let content = match extension.to_lowercase().as_str() {
            "toml" => toml::to_string_pretty(self)
                .map_err(|e| ConverterError::config(format!("TOML serialization failed: {}", e)))?,
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map_err(|e| ConverterError::config(format!("YAML serialization failed: {}", e)))?,
            _ => return Err(ConverterError::config(
                "Unsupported config file format. Use .toml or .yaml"
            )),
        };

        std::fs::write(&path, content)
            .map_err(|e| ConverterError::config(
                format!("Failed to write config file {:?}: {}", path.as_ref(), e)
            ))?;

        Ok(())
    }

    /// Apply `OLLAMA_ENDPOINT`, `OLLAMA_MODEL`, `MAX_PARALLEL_JOBS` and `LOG_LEVEL`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("OLLAMA_ENDPOINT") {
            self.ollama.endpoint = endpoint;
        }
        if let Some(model) = lookup("OLLAMA_MODEL") {
            self.ollama.model = model;
        }
        if let Some(jobs) = lookup("MAX_PARALLEL_JOBS") {
            self.processing.parallel_jobs = jobs.trim().parse().map_err(|_| {
                ConverterError::config(format!("MAX_PARALLEL_JOBS must be a number, got '{}'", jobs))
            })?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let quality = &self.image.quality;
        for (name, value) in [("webp", quality.webp), ("jpeg", quality.jpeg)] {
            if value == 0 || value > 100 {
                return Err(ConverterError::config(
                    format!("{} quality must be between 1-100, got {}", name, value)
                ));
            }
        }
        if quality.png_compression > 6 {
            return Err(ConverterError::config(
                format!("PNG compression level must be between 0-6, got {}", quality.png_compression)
            ));
        }

        if self.image.resize_large && self.image.max_dimension == 0 {
            return Err(ConverterError::config("max_dimension must be greater than 0"));
        }

        if self.seo.keyword_count == 0 {
            return Err(ConverterError::config("keyword_count must be greater than 0"));
        }
        if self.seo.min_keywords > self.seo.keyword_count {
            return Err(ConverterError::config(
                format!("min_keywords ({}) cannot exceed keyword_count ({})",
                       self.seo.min_keywords, self.seo.keyword_count)
            ));
        }
        // Room for at least one short token plus ".webp"
        if self.seo.max_filename_length < 16 {
            return Err(ConverterError::config(
                "max_filename_length must be at least 16"
            ));
        }

        if self.ollama.max_retries == 0 {
            return Err(ConverterError::config("max_retries must be at least 1"));
        }
        if self.ollama.timeout_secs == 0 {
            return Err(ConverterError::config("Ollama timeout must be greater than 0"));
        }

        if self.processing.max_file_size == 0 {
            return Err(ConverterError::config("max_file_size must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.image.format, OutputFormat::WebP);
        assert_eq!(config.seo.keyword_count, 8);
        assert_eq!(config.ollama.max_retries, 3);
        assert!(config.processing.backup_originals);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.ollama.model, config.ollama.model);

        let yaml_str = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml_str).unwrap();
        assert_eq!(parsed.image.quality.webp, 85);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "seo:\n  keyword_count: 10\n  max_filename_length: 120\nimage:\n  format: jpg\n";
        let parsed: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.seo.keyword_count, 10);
        assert_eq!(parsed.seo.max_filename_length, 120);
        assert_eq!(parsed.seo.fallback_prefix, "image");
        assert_eq!(parsed.image.format, OutputFormat::Jpeg);
        assert_eq!(parsed.ollama.timeout_secs, 45);
    }

    #[test]
    fn test_config_file_io() {
        let config = Config::default();

        let toml_file = NamedTempFile::new().unwrap();
        let toml_path = toml_file.path().with_extension("toml");
        config.to_file(&toml_path).unwrap();
        let loaded = Config::from_file(&toml_path).unwrap();
        assert!(loaded.validate().is_ok());

        let yaml_file = NamedTempFile::new().unwrap();
        let yaml_path = yaml_file.path().with_extension("yaml");
        config.to_file(&yaml_path).unwrap();
        let loaded = Config::from_file(&yaml_path).unwrap();
        assert!(loaded.validate().is_ok());

        assert!(config.to_file(toml_file.path().with_extension("ini")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("OLLAMA_ENDPOINT", "http://gpu-box:11434/api/generate"),
            ("MAX_PARALLEL_JOBS", "6"),
            ("LOG_LEVEL", "DEBUG"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.ollama.endpoint, "http://gpu-box:11434/api/generate");
        assert_eq!(config.ollama.model, "qwen2.5vl:7b");
        assert_eq!(config.processing.parallel_jobs, 6);
        assert_eq!(config.logging.level, "debug");

        let mut config = Config::default();
        let bad = config.apply_overrides_from(|key| {
            (key == "MAX_PARALLEL_JOBS").then(|| "many".to_string())
        });
        assert!(bad.is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.image.quality.jpeg = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.seo.min_keywords = 20;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.image.quality.png_compression = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_output_format_properties() {
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
        assert_eq!(OutputFormat::WebP.mime_type(), "image/webp");
        assert_eq!("JPEG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("webp".parse::<OutputFormat>().unwrap(), OutputFormat::WebP);

        let err = "gif".parse::<OutputFormat>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_worker_count() {
        let mut processing = ProcessingConfig::default();
        assert!(processing.worker_count() >= 1);
        processing.parallel_jobs = 3;
        assert_eq!(processing.worker_count(), 3);
    }
}
