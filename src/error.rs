//! Error types and handling for the SEO image converter

use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for converter operations
pub type Result<T> = std::result::Result<T, ConverterError>;

/// Main error type for converter operations
#[derive(Debug, Error)]
pub enum ConverterError {
    /// I/O related errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Source is not a decodable image
    #[error("Failed to decode image: {message} (file: {file:?})")]
    DecodeError {
        message: String,
        file: Option<PathBuf>,
    },

    /// Requested output format is not one of the supported codecs
    #[error("Unsupported output format: {format}")]
    UnsupportedFormat { format: String },

    /// Encoder failed on an already decoded image
    #[error("Failed to encode {format} output: {message}")]
    EncodeError { format: String, message: String },

    /// Original could not be preserved before processing
    #[error("Backup failed for {file:?}: {message}")]
    BackupWriteError { message: String, file: PathBuf },

    /// No collision-free output name could be produced
    #[error("Could not resolve a free output name for '{base}'")]
    NameResolutionExhausted { base: String },

    /// Final output could not be written
    #[error("Failed to write output {file:?}: {message}")]
    FilesystemWriteError { message: String, file: PathBuf },

    /// Worker pool errors
    #[error("Parallel processing error: {message}")]
    ParallelError { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    SerdeError(String),
}

/// Classification recorded on every failed item of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Decode,
    UnsupportedFormat,
    Encode,
    BackupWrite,
    NameResolutionExhausted,
    FilesystemWrite,
    Config,
    Io,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Decode => "DecodeError",
            Self::UnsupportedFormat => "UnsupportedFormat",
            Self::Encode => "EncodeError",
            Self::BackupWrite => "BackupWriteError",
            Self::NameResolutionExhausted => "NameResolutionExhausted",
            Self::FilesystemWrite => "FilesystemWriteError",
            Self::Config => "ConfigError",
            Self::Io => "IoError",
            Self::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

impl ConverterError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(message: S, file: Option<PathBuf>) -> Self {
        Self::DecodeError {
            message: message.into(),
            file,
        }
    }

    /// Create a new unsupported format error
    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Create a new encode error
    pub fn encode<F: Into<String>, S: Into<String>>(format: F, message: S) -> Self {
        Self::EncodeError {
            format: format.into(),
            message: message.into(),
        }
    }

    /// Create a new backup error
    pub fn backup<S: Into<String>>(message: S, file: PathBuf) -> Self {
        Self::BackupWriteError {
            message: message.into(),
            file,
        }
    }

    /// Create a new output write error
    pub fn write<S: Into<String>>(message: S, file: PathBuf) -> Self {
        Self::FilesystemWriteError {
            message: message.into(),
            file,
        }
    }

    /// Create a new parallel processing error
    pub fn parallel<S: Into<String>>(message: S) -> Self {
        Self::ParallelError {
            message: message.into(),
        }
    }

    /// Classify this error for the batch report
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IoError(_) => ErrorKind::Io,
            Self::ConfigError { .. } | Self::SerdeError(_) => ErrorKind::Config,
            Self::DecodeError { .. } => ErrorKind::Decode,
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::EncodeError { .. } => ErrorKind::Encode,
            Self::BackupWriteError { .. } => ErrorKind::BackupWrite,
            Self::NameResolutionExhausted { .. } => ErrorKind::NameResolutionExhausted,
            Self::FilesystemWriteError { .. } => ErrorKind::FilesystemWrite,
            Self::ParallelError { .. } => ErrorKind::Internal,
        }
    }

    /// Check if this error is recoverable (the batch can continue)
    pub fn is_recoverable(&self) -> bool {
        match self {
            // These errors affect individual files but processing can continue
            Self::IoError(_)
            | Self::DecodeError { .. }
            | Self::UnsupportedFormat { .. }
            | Self::EncodeError { .. }
            | Self::BackupWriteError { .. }
            | Self::FilesystemWriteError { .. } => true,

            // Misconfiguration or a broken pool stops the run
            Self::ConfigError { .. }
            | Self::SerdeError(_)
            | Self::NameResolutionExhausted { .. }
            | Self::ParallelError { .. } => false,
        }
    }

    /// Get the associated file path if available
    pub fn file_path(&self) -> Option<&PathBuf> {
        match self {
            Self::DecodeError { file, .. } => file.as_ref(),
            Self::BackupWriteError { file, .. } | Self::FilesystemWriteError { file, .. } => Some(file),
            _ => None,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::IoError(e) => format!("File system error: {}", e),
            Self::DecodeError { message, .. } => format!("Not a readable image: {}", message),
            Self::UnsupportedFormat { format } => {
                format!("Unsupported output format: {}. Supported formats: WebP, PNG, JPEG", format)
            }
            Self::BackupWriteError { message, .. } => {
                format!("Could not back up the original, file left untouched: {}", message)
            }
            Self::NameResolutionExhausted { .. } => {
                "Name collision handling is disabled (max_suffix_attempts = 0)".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<image::ImageError> for ConverterError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => Self::IoError(e),
            image::ImageError::Encoding(e) => Self::encode("image", e.to_string()),
            other => Self::decode(other.to_string(), None),
        }
    }
}

// Convert serde errors to our error type
impl From<toml::de::Error> for ConverterError {
    fn from(err: toml::de::Error) -> Self {
        Self::SerdeError(format!("TOML parsing error: {}", err))
    }
}

impl From<serde_yaml::Error> for ConverterError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::SerdeError(format!("YAML parsing error: {}", err))
    }
}

impl From<serde_json::Error> for ConverterError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerdeError(format!("JSON error: {}", err))
    }
}

/// Error context extension for adding file path information
pub trait ErrorContext<T> {
    /// Add file context to an error
    fn with_file_context(self, file: PathBuf) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<ConverterError>,
{
    fn with_file_context(self, file: PathBuf) -> Result<T> {
        self.map_err(|e| {
            let mut error = e.into();

            if let ConverterError::DecodeError { file: ref mut f, .. } = error {
                if f.is_none() {
                    *f = Some(file);
                }
            }

            error
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ConverterError::config("test message");
        assert!(matches!(err, ConverterError::ConfigError { .. }));
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(ConverterError::decode("bad header", None).is_recoverable());
        assert!(ConverterError::backup("denied", PathBuf::from("a.jpg")).is_recoverable());
        assert!(!ConverterError::parallel("pool").is_recoverable());
        assert!(!ConverterError::config("zero workers").is_recoverable());
    }

    #[test]
    fn test_kind_classification() {
        let err = ConverterError::write("disk full", PathBuf::from("out.webp"));
        assert_eq!(err.kind(), ErrorKind::FilesystemWrite);
        assert_eq!(err.kind().to_string(), "FilesystemWriteError");

        let err = ConverterError::NameResolutionExhausted { base: "cat".into() };
        assert_eq!(err.kind(), ErrorKind::NameResolutionExhausted);
    }

    #[test]
    fn test_user_messages() {
        let err = ConverterError::unsupported_format("BMP");
        let msg = err.user_message();
        assert!(msg.contains("Unsupported output format"));
        assert!(msg.contains("WebP, PNG, JPEG"));
    }

    #[test]
    fn test_file_context() {
        let result: Result<()> = Err(ConverterError::decode("truncated", None));
        let err = result
            .with_file_context(PathBuf::from("broken.jpg"))
            .unwrap_err();

        assert_eq!(err.file_path(), Some(&PathBuf::from("broken.jpg")));
    }

    #[test]
    fn test_image_error_maps_to_decode() {
        let err: ConverterError = image::load_from_memory(b"definitely not an image")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
