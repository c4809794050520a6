//! Thumbnail generation.

use image::DynamicImage;
use image::imageops::FilterType;

/// Computes the size of `(width, height)` scaled to fit within `(max_width, max_height)`.
///
/// The aspect ratio is preserved, and the image is scaled up if it is smaller than the bounds.
/// Neither side of the result is ever smaller than `1`.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }

    let ratio = f64::min(
        f64::from(max_width) / f64::from(width),
        f64::from(max_height) / f64::from(height),
    );

    let scale = |side: u32| ((f64::from(side) * ratio).round() as u32).max(1);
    (scale(width), scale(height))
}

/// Scales `image` to fit within `width` x `height`.
pub fn make_thumbnail(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (new_width, new_height) = fit_within(image.width(), image.height(), width, height);
    if (new_width, new_height) == (image.width(), image.height()) {
        return image.clone();
    }
    image.resize_exact(new_width, new_height, FilterType::Triangle)
}
