//! Per-format encode paths
//!
//! Each output format is an independent codec. A codec advertises which of
//! the lossy / lossless / progressive modes it can honour, normalises the
//! color model for its container, and encodes into an in-memory buffer.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use tracing::{debug, warn};

use crate::config::OutputFormat;
use crate::error::{Result, ConverterError};

/// Encoding modes a codec can honour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeCapabilities {
    pub lossy: bool,
    pub lossless: bool,
    pub progressive: bool,
}

/// Requested encoding parameters
#[derive(Debug, Clone, Copy)]
pub struct EncodeParams {
    /// Quality (1-100) for lossy codecs, optimization level (0-6) for PNG
    pub quality: u8,
    pub lossless: bool,
    pub progressive: bool,
}

/// Encoded output plus the mode that was actually used
#[derive(Debug)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub lossless: bool,
    pub progressive: bool,
}

/// A single output format's encode path
pub trait Codec: Send + Sync {
    fn format(&self) -> OutputFormat;

    fn capabilities(&self) -> EncodeCapabilities;

    /// Convert the decoded image into the color model the container expects
    fn prepare(&self, image: DynamicImage) -> DynamicImage;

    fn encode(&self, image: &DynamicImage, params: &EncodeParams) -> Result<EncodedImage>;
}

static WEBP: WebPCodec = WebPCodec;
static PNG: PngCodec = PngCodec;
static JPEG: JpegCodec = JpegCodec;

/// Select the codec for an output format
pub fn codec_for(format: OutputFormat) -> &'static dyn Codec {
    match format {
        OutputFormat::WebP => &WEBP,
        OutputFormat::Png => &PNG,
        OutputFormat::Jpeg => &JPEG,
    }
}

/// WebP: lossy through libwebp, lossless through the pure-Rust encoder
pub struct WebPCodec;

impl Codec for WebPCodec {
    fn format(&self) -> OutputFormat {
        OutputFormat::WebP
    }

    fn capabilities(&self) -> EncodeCapabilities {
        EncodeCapabilities { lossy: true, lossless: true, progressive: false }
    }

    fn prepare(&self, image: DynamicImage) -> DynamicImage {
        keep_alpha(image)
    }

    fn encode(&self, image: &DynamicImage, params: &EncodeParams) -> Result<EncodedImage> {
        if params.lossless {
            let mut data = Vec::new();
            image
                .write_with_encoder(WebPEncoder::new_lossless(&mut data))
                .map_err(|e| ConverterError::encode("WebP", e.to_string()))?;
            return Ok(EncodedImage { data, lossless: true, progressive: false });
        }

        let (width, height) = (image.width(), image.height());
        let quality = params.quality.clamp(1, 100) as f32;
        let converted;
        let encoder = match image {
            DynamicImage::ImageRgba8(rgba) => webp::Encoder::from_rgba(rgba.as_raw(), width, height),
            other => {
                converted = other.to_rgb8();
                webp::Encoder::from_rgb(converted.as_raw(), width, height)
            }
        };
        let data = encoder.encode(quality).to_vec();

        if data.is_empty() {
            return Err(ConverterError::encode("WebP", "libwebp returned no data"));
        }
        debug!("Lossy WebP at quality {}: {} bytes", quality, data.len());

        Ok(EncodedImage { data, lossless: false, progressive: false })
    }
}

/// PNG at best zlib compression, then re-optimized with oxipng
pub struct PngCodec;

impl Codec for PngCodec {
    fn format(&self) -> OutputFormat {
        OutputFormat::Png
    }

    fn capabilities(&self) -> EncodeCapabilities {
        EncodeCapabilities { lossy: false, lossless: true, progressive: false }
    }

    fn prepare(&self, image: DynamicImage) -> DynamicImage {
        keep_alpha(image)
    }

    fn encode(&self, image: &DynamicImage, params: &EncodeParams) -> Result<EncodedImage> {
        let mut data = Vec::new();
        image
            .write_with_encoder(PngEncoder::new_with_quality(
                &mut data,
                CompressionType::Best,
                PngFilter::Adaptive,
            ))
            .map_err(|e| ConverterError::encode("PNG", e.to_string()))?;

        let mut options = oxipng::Options::from_preset(params.quality.min(6));
        options.strip = oxipng::StripChunks::Safe;

        match oxipng::optimize_from_memory(&data, &options) {
            Ok(optimized) if optimized.len() < data.len() => {
                debug!("oxipng saved {} bytes", data.len() - optimized.len());
                data = optimized;
            }
            Ok(_) => {}
            Err(e) => warn!("oxipng optimization failed, keeping encoder output: {}", e),
        }

        Ok(EncodedImage { data, lossless: true, progressive: false })
    }
}

/// Baseline JPEG; transparency is flattened onto white
pub struct JpegCodec;

impl Codec for JpegCodec {
    fn format(&self) -> OutputFormat {
        OutputFormat::Jpeg
    }

    fn capabilities(&self) -> EncodeCapabilities {
        EncodeCapabilities { lossy: true, lossless: false, progressive: false }
    }

    fn prepare(&self, image: DynamicImage) -> DynamicImage {
        flatten_onto_white(image)
    }

    fn encode(&self, image: &DynamicImage, params: &EncodeParams) -> Result<EncodedImage> {
        if params.progressive {
            debug!("Progressive JPEG not available, writing baseline");
        }

        let mut data = Vec::new();
        image
            .write_with_encoder(JpegEncoder::new_with_quality(&mut data, params.quality.clamp(1, 100)))
            .map_err(|e| ConverterError::encode("JPEG", e.to_string()))?;

        Ok(EncodedImage { data, lossless: false, progressive: false })
    }
}

/// 8-bit RGB or RGBA depending on whether the source carries alpha
fn keep_alpha(image: DynamicImage) -> DynamicImage {
    if image.color().has_alpha() {
        DynamicImage::ImageRgba8(image.into_rgba8())
    } else {
        DynamicImage::ImageRgb8(image.into_rgb8())
    }
}

/// Composite any alpha channel over a white background
pub fn flatten_onto_white(image: DynamicImage) -> DynamicImage {
    if !image.color().has_alpha() {
        return DynamicImage::ImageRgb8(image.into_rgb8());
    }

    let rgba = image.into_rgba8();
    let mut flat = RgbImage::new(rgba.width(), rgba.height());

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as u32;
        let blend = |channel: u8| -> u8 {
            ((channel as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8
        };
        flat.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }

    DynamicImage::ImageRgb8(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ColorType, Rgba, RgbaImage};

    fn params(quality: u8) -> EncodeParams {
        EncodeParams { quality, lossless: false, progressive: true }
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128])
        }))
    }

    #[test]
    fn test_codec_selection() {
        assert_eq!(codec_for(OutputFormat::WebP).format(), OutputFormat::WebP);
        assert_eq!(codec_for(OutputFormat::Png).format(), OutputFormat::Png);
        assert!(codec_for(OutputFormat::Jpeg).capabilities().lossy);
        assert!(!codec_for(OutputFormat::Jpeg).capabilities().lossless);
    }

    #[test]
    fn test_flatten_transparent_to_white() {
        let rgba = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 0]));
        let flat = flatten_onto_white(DynamicImage::ImageRgba8(rgba)).into_rgb8();
        assert_eq!(flat.get_pixel(0, 0), &Rgb([255, 255, 255]));

        let rgba = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        let flat = flatten_onto_white(DynamicImage::ImageRgba8(rgba)).into_rgb8();
        assert_eq!(flat.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_png_keeps_alpha() {
        let codec = codec_for(OutputFormat::Png);
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 128])));
        let prepared = codec.prepare(rgba);
        assert_eq!(prepared.color(), ColorType::Rgba8);

        let encoded = codec.encode(&prepared, &params(2)).unwrap();
        let decoded = image::load_from_memory(&encoded.data).unwrap();
        assert!(decoded.color().has_alpha());
        assert!(encoded.lossless);
    }

    #[test]
    fn test_jpeg_drops_alpha() {
        let codec = codec_for(OutputFormat::Jpeg);
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 128])));
        let prepared = codec.prepare(rgba);
        assert_eq!(prepared.color(), ColorType::Rgb8);

        let encoded = codec.encode(&prepared, &params(80)).unwrap();
        assert!(encoded.data.starts_with(&[0xFF, 0xD8, 0xFF]));
        assert!(!encoded.progressive);
    }

    fn noisy(width: u32, height: u32) -> DynamicImage {
        let mut seed = 0x2545_f491_u32;
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let n = (seed & 0x3f) as u8;
            Rgb([(x % 192) as u8 + n, (y % 192) as u8 + n, 96 + n])
        }))
    }

    #[test]
    fn test_webp_lossless_roundtrips_pixels() {
        let codec = codec_for(OutputFormat::WebP);
        let image = codec.prepare(gradient(32, 16));
        let lossless = EncodeParams { quality: 85, lossless: true, progressive: false };
        let encoded = codec.encode(&image, &lossless).unwrap();

        assert!(encoded.lossless);
        assert_eq!(&encoded.data[0..4], b"RIFF");
        assert_eq!(&encoded.data[8..12], b"WEBP");

        let decoded = image::load_from_memory(&encoded.data).unwrap().into_rgb8();
        assert_eq!(decoded, image.into_rgb8());
    }

    #[test]
    fn test_webp_lossy_honours_quality() {
        let codec = codec_for(OutputFormat::WebP);
        assert!(codec.capabilities().lossy);

        let image = codec.prepare(noisy(200, 150));
        let high = codec.encode(&image, &params(95)).unwrap();
        let low = codec.encode(&image, &params(30)).unwrap();
        let lossless = codec
            .encode(&image, &EncodeParams { quality: 85, lossless: true, progressive: false })
            .unwrap();

        assert!(!high.lossless && !low.lossless);
        assert_eq!(&low.data[8..12], b"WEBP");
        assert!(low.data.len() < high.data.len());
        assert!(high.data.len() < lossless.data.len());

        let decoded = image::load_from_memory(&low.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 150));
    }

    #[test]
    fn test_webp_lossy_keeps_alpha() {
        let codec = codec_for(OutputFormat::WebP);
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([200, 10, 10, 100])));
        let encoded = codec.encode(&codec.prepare(rgba), &params(80)).unwrap();
        let decoded = image::load_from_memory(&encoded.data).unwrap();
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn test_lower_jpeg_quality_is_smaller() {
        let codec = codec_for(OutputFormat::Jpeg);
        let image = codec.prepare(gradient(128, 128));
        let high = codec.encode(&image, &params(95)).unwrap();
        let low = codec.encode(&image, &params(20)).unwrap();
        assert!(low.data.len() < high.data.len());
    }
}
