//! Input format detection and supported extensions

use std::path::Path;

/// Input image kinds recognised by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
    Tiff,
    Bmp,
}

/// Detect input format from file extension
pub fn detect_format_from_path<P: AsRef<Path>>(path: P) -> Option<InputFormat> {
    let extension = path.as_ref().extension()?.to_str()?;

    match extension.to_lowercase().as_str() {
        "jpg" | "jpeg" => Some(InputFormat::Jpeg),
        "png" => Some(InputFormat::Png),
        "webp" => Some(InputFormat::WebP),
        "gif" => Some(InputFormat::Gif),
        "tiff" | "tif" => Some(InputFormat::Tiff),
        "bmp" => Some(InputFormat::Bmp),
        _ => None,
    }
}

/// Detect input format from file header (magic bytes)
pub fn detect_format_from_header(data: &[u8]) -> Option<InputFormat> {
    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(InputFormat::Jpeg);
    }

    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(InputFormat::Png);
    }

    // GIF: GIF87a or GIF89a
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some(InputFormat::Gif);
    }

    // WebP: RIFF....WEBP
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some(InputFormat::WebP);
    }

    // TIFF: II*. (little-endian) or MM.* (big-endian)
    if data.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || data.starts_with(&[0x4D, 0x4D, 0x00, 0x2A]) {
        return Some(InputFormat::Tiff);
    }

    // BMP: BM
    if data.starts_with(b"BM") {
        return Some(InputFormat::Bmp);
    }

    None
}

/// Get supported input extensions
pub fn supported_input_formats() -> &'static [&'static str] {
    &["jpg", "jpeg", "png", "webp", "gif", "tiff", "tif", "bmp"]
}

/// Check if a file extension is supported for input
pub fn is_supported_input_format(extension: &str) -> bool {
    supported_input_formats()
        .iter()
        .any(|&fmt| fmt.eq_ignore_ascii_case(extension))
}

/// Check if a path carries a supported input extension
pub fn is_supported_input_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(is_supported_input_format)
        .unwrap_or(false)
}
