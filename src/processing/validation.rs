//! Input validation before decoding

use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Result, ConverterError};
use crate::processing::formats::{detect_format_from_header, detect_format_from_path};

/// Image validator for checking file integrity before decode
pub struct ImageValidator {
    max_file_size: u64,
}

impl ImageValidator {
    /// Create a validator with the given size limit in bytes
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    /// Check that `path` is a non-empty regular file within the size limit
    pub fn validate_file(&self, path: &Path) -> Result<u64> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| ConverterError::decode(
                format!("Cannot access file: {}", e),
                Some(path.to_path_buf()),
            ))?;

        if !metadata.is_file() {
            return Err(ConverterError::decode(
                "Path is not a regular file",
                Some(path.to_path_buf()),
            ));
        }

        self.check_size(metadata.len(), path)?;
        Ok(metadata.len())
    }

    /// Check already loaded file contents
    pub fn validate_contents(&self, data: &[u8], path: &Path) -> Result<()> {
        self.check_size(data.len() as u64, path)?;

        if !infer::is_image(data) && detect_format_from_header(data).is_none() {
            return Err(ConverterError::decode(
                "Content is not a recognised image",
                Some(path.to_path_buf()),
            ));
        }

        if let (Some(header_fmt), Some(path_fmt)) =
            (detect_format_from_header(data), detect_format_from_path(path))
        {
            if header_fmt != path_fmt {
                warn!(
                    "Format mismatch for {:?}: header indicates {:?}, extension indicates {:?}",
                    path, header_fmt, path_fmt
                );
            }
        }

        debug!("Validated {:?} ({} bytes)", path, data.len());
        Ok(())
    }

    fn check_size(&self, size: u64, path: &Path) -> Result<()> {
        if size == 0 {
            return Err(ConverterError::decode("File is empty", Some(path.to_path_buf())));
        }

        if size > self.max_file_size {
            return Err(ConverterError::decode(
                format!(
                    "File too large: {} bytes (limit: {} bytes)",
                    size, self.max_file_size
                ),
                Some(path.to_path_buf()),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.jpg");
        std::fs::write(&path, b"").unwrap();

        let err = ImageValidator::new(1024).validate_file(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_directory_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(ImageValidator::new(1024).validate_file(dir.path()).is_err());
    }

    #[test]
    fn test_size_limit() {
        let validator = ImageValidator::new(8);
        let data = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0];
        let err = validator.validate_contents(&data, Path::new("big.jpg")).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_non_image_content() {
        let validator = ImageValidator::new(1024);
        let err = validator
            .validate_contents(b"this is a text file pretending", Path::new("fake.jpg"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_png_header_accepted() {
        let validator = ImageValidator::new(1024);
        let data = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
        assert!(validator.validate_contents(&data, Path::new("ok.png")).is_ok());
    }
}
