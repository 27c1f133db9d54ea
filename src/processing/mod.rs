//! Image re-encoding
//!
//! [`ImageOptimizer`] decodes a source once, normalises orientation and color
//! model for the target container, optionally downsamples it, and hands the
//! result to the format's [`Codec`]. Nothing is written to disk here; callers
//! own the returned buffer.

use std::io::Cursor;
use std::path::Path;
use std::time::Instant;

use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{ImageConfig, OutputFormat};
use crate::error::{ErrorContext, Result, ConverterError};

pub mod codecs;
pub mod formats;
pub mod resize;
pub mod validation;

pub use codecs::*;
pub use formats::*;
pub use resize::*;
pub use validation::*;

/// Per-call encode settings
#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    pub format: OutputFormat,
    pub quality: u8,
    pub lossless: bool,
    pub progressive: bool,
    pub auto_orient: bool,
    /// Longest side after downsampling; `None` keeps original dimensions
    pub max_dimension: Option<u32>,
}

impl OptimizeOptions {
    /// Derive options from the image section of the configuration
    pub fn from_config(config: &ImageConfig) -> Self {
        Self {
            format: config.format,
            quality: config.quality_for(config.format),
            lossless: config.lossless,
            progressive: config.progressive,
            auto_orient: config.auto_orient,
            max_dimension: config.resize_large.then_some(config.max_dimension),
        }
    }
}

/// Size and shape metrics of one re-encode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationStats {
    pub original_bytes: u64,
    pub optimized_bytes: u64,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    /// Whether the codec actually encoded losslessly
    pub lossless: bool,
}

impl OptimizationStats {
    /// Savings as a percentage of the original; negative when the output grew
    pub fn compression_ratio(&self) -> f64 {
        compression_ratio(self.original_bytes, self.optimized_bytes)
    }

    /// Signed byte savings
    pub fn bytes_saved(&self) -> i64 {
        self.original_bytes as i64 - self.optimized_bytes as i64
    }
}

/// Encoded output plus its metrics
#[derive(Debug)]
pub struct OptimizationResult {
    pub stats: OptimizationStats,
    pub encoded_data: Vec<u8>,
}

/// `(1 - optimized / original) * 100`, zero for an empty original
pub fn compression_ratio(original_bytes: u64, optimized_bytes: u64) -> f64 {
    if original_bytes == 0 {
        return 0.0;
    }
    (1.0 - optimized_bytes as f64 / original_bytes as f64) * 100.0
}

/// Re-encodes single images into the configured output format
pub struct ImageOptimizer {
    validator: ImageValidator,
}

impl ImageOptimizer {
    /// Create an optimizer rejecting inputs above `max_file_size` bytes
    pub fn new(max_file_size: u64) -> Self {
        Self {
            validator: ImageValidator::new(max_file_size),
        }
    }

    pub fn validator(&self) -> &ImageValidator {
        &self.validator
    }

    /// Read, decode and re-encode the image at `path`
    pub fn optimize(&self, path: &Path, options: &OptimizeOptions) -> Result<OptimizationResult> {
        self.validator.validate_file(path)?;

        let data = std::fs::read(path).map_err(|e| {
            ConverterError::decode(format!("Cannot read file: {}", e), Some(path.to_path_buf()))
        })?;

        self.validator.validate_contents(&data, path)?;
        self.optimize_bytes(&data, options)
            .with_file_context(path.to_path_buf())
    }

    /// Re-encode already loaded source bytes
    pub fn optimize_bytes(&self, data: &[u8], options: &OptimizeOptions) -> Result<OptimizationResult> {
        let image = decode_image(data, options.auto_orient)?;
        self.optimize_image(image, data.len() as u64, options)
    }

    /// Re-encode an image decoded by [`decode_image`]; `original_bytes` is the
    /// size of the source file it came from
    pub fn optimize_image(
        &self,
        image: DynamicImage,
        original_bytes: u64,
        options: &OptimizeOptions,
    ) -> Result<OptimizationResult> {
        let start = Instant::now();
        let codec = codec_for(options.format);
        let (source_width, source_height) = (image.width(), image.height());

        let image = match options.max_dimension {
            Some(max) => downscale_to_fit(image, max),
            None => image,
        };
        let image = codec.prepare(image);

        let capabilities = codec.capabilities();
        if options.lossless && !capabilities.lossless {
            warn!("{} cannot encode losslessly, using lossy quality {}", codec.format(), options.quality);
        }

        let params = EncodeParams {
            quality: options.quality,
            lossless: options.lossless,
            progressive: options.progressive && capabilities.progressive,
        };
        let encoded = codec.encode(&image, &params)?;

        let stats = OptimizationStats {
            original_bytes,
            optimized_bytes: encoded.data.len() as u64,
            format: options.format,
            width: image.width(),
            height: image.height(),
            lossless: encoded.lossless,
        };

        debug!(
            "Encoded {}x{} -> {}x{} {}: {} -> {} bytes ({:.1}%) in {:?}",
            source_width,
            source_height,
            stats.width,
            stats.height,
            stats.format,
            stats.original_bytes,
            stats.optimized_bytes,
            stats.compression_ratio(),
            start.elapsed()
        );

        Ok(OptimizationResult {
            stats,
            encoded_data: encoded.data,
        })
    }
}

/// Decode image bytes, applying the EXIF orientation when requested
pub fn decode_image(data: &[u8], auto_orient: bool) -> Result<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ConverterError::decode(e.to_string(), None))?
        .into_decoder()
        .map_err(|e| ConverterError::decode(e.to_string(), None))?;

    let orientation = if auto_orient {
        decoder.orientation().unwrap_or(Orientation::NoTransforms)
    } else {
        Orientation::NoTransforms
    };

    let mut image = DynamicImage::from_decoder(decoder)
        .map_err(|e| ConverterError::decode(e.to_string(), None))?;

    if orientation != Orientation::NoTransforms {
        debug!("Applying orientation {:?}", orientation);
        image.apply_orientation(orientation);
    }

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 64]));
        let mut data = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut data), image::ImageFormat::Jpeg)
            .unwrap();
        data
    }

    fn options(format: OutputFormat) -> OptimizeOptions {
        let mut config = ImageConfig::default();
        config.format = format;
        OptimizeOptions::from_config(&config)
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(compression_ratio(1000, 250), 75.0);
        assert_eq!(compression_ratio(0, 100), 0.0);
        // Growth is reported, not clamped
        assert_eq!(compression_ratio(100, 150), -50.0);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = ImageConfig::default();
        assert_eq!(OptimizeOptions::from_config(&config).max_dimension, None);
        assert_eq!(OptimizeOptions::from_config(&config).quality, 85);

        config.resize_large = true;
        config.format = OutputFormat::Jpeg;
        let opts = OptimizeOptions::from_config(&config);
        assert_eq!(opts.max_dimension, Some(1920));
        assert_eq!(opts.quality, 90);
    }

    #[test]
    fn test_optimize_bytes_to_each_format() {
        let optimizer = ImageOptimizer::new(u64::MAX);
        let data = jpeg_bytes(64, 48);

        for format in [OutputFormat::WebP, OutputFormat::Png, OutputFormat::Jpeg] {
            let result = optimizer.optimize_bytes(&data, &options(format)).unwrap();
            assert_eq!(result.stats.format, format);
            assert_eq!((result.stats.width, result.stats.height), (64, 48));
            assert_eq!(result.stats.original_bytes, data.len() as u64);
            assert_eq!(result.stats.optimized_bytes, result.encoded_data.len() as u64);
            assert!(image::load_from_memory(&result.encoded_data).is_ok());
        }
    }

    #[test]
    fn test_default_webp_shrinks_photo() {
        let mut seed = 7u32;
        let photo = RgbImage::from_fn(400, 300, |x, y| {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let grain = ((seed >> 16) % 24) as u8;
            Rgb([(x / 2) as u8 + grain, (y * 3 / 4) as u8 + grain, 90 + grain])
        });
        let mut source = Vec::new();
        DynamicImage::ImageRgb8(photo)
            .write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(&mut source, 92))
            .unwrap();

        let opts = OptimizeOptions::from_config(&ImageConfig::default());
        let result = ImageOptimizer::new(u64::MAX).optimize_bytes(&source, &opts).unwrap();

        assert_eq!(result.stats.format, OutputFormat::WebP);
        assert!(!result.stats.lossless);
        assert!(
            result.stats.compression_ratio() > 0.0,
            "default WebP grew {} -> {} bytes",
            result.stats.original_bytes,
            result.stats.optimized_bytes
        );
    }

    #[test]
    fn test_resize_constraint_applied() {
        let optimizer = ImageOptimizer::new(u64::MAX);
        let mut opts = options(OutputFormat::Jpeg);
        opts.max_dimension = Some(32);

        let result = optimizer.optimize_bytes(&jpeg_bytes(128, 64), &opts).unwrap();
        assert_eq!((result.stats.width, result.stats.height), (32, 16));
    }

    #[test]
    fn test_corrupt_input_is_decode_error() {
        let optimizer = ImageOptimizer::new(u64::MAX);
        let mut data = jpeg_bytes(16, 16);
        data.truncate(20);

        let err = optimizer.optimize_bytes(&data, &options(OutputFormat::WebP)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_optimize_from_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, jpeg_bytes(40, 30)).unwrap();

        let optimizer = ImageOptimizer::new(u64::MAX);
        let result = optimizer.optimize(&path, &options(OutputFormat::Png)).unwrap();
        assert!(result.stats.lossless);

        let empty = dir.path().join("empty.jpg");
        std::fs::write(&empty, b"").unwrap();
        let err = optimizer.optimize(&empty, &options(OutputFormat::Png)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(err.file_path(), Some(&empty));
    }
}
