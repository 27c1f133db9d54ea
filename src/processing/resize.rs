//! Downscaling to a maximum dimension

use image::DynamicImage;
use image::imageops::FilterType;
use tracing::debug;

/// Calculate dimensions that fit within `max_dimension` on the longest side,
/// preserving aspect ratio. Never upscales.
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension || max_dimension == 0 {
        return (width, height);
    }

    let ratio = max_dimension as f64 / longest as f64;
    let new_width = ((width as f64 * ratio).round() as u32).clamp(1, max_dimension);
    let new_height = ((height as f64 * ratio).round() as u32).clamp(1, max_dimension);
    (new_width, new_height)
}

/// Downscale an image with Lanczos3 if it exceeds `max_dimension`
pub fn downscale_to_fit(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (target_width, target_height) = fit_within(image.width(), image.height(), max_dimension);

    if target_width == image.width() && target_height == image.height() {
        return image;
    }

    debug!(
        "Resizing {}x{} -> {}x{}",
        image.width(),
        image.height(),
        target_width,
        target_height
    );

    image.resize_exact(target_width, target_height, FilterType::Lanczos3)
}
