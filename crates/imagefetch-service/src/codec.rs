//! Conversion between raw bytes and decoded images.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, ImageError, ImageReader};

use crate::caching::FetchError;

/// The JPEG quality used for images written to disk.
pub const DISK_QUALITY: u8 = 100;

/// Decodes a payload into an image, guessing its format from the content.
pub fn decode(data: &[u8]) -> Result<DynamicImage, FetchError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|err| FetchError::DecodeFailure(err.to_string()))?;

    Ok(reader.decode()?)
}

/// Re-encodes an image as JPEG at [`DISK_QUALITY`].
///
/// JPEG has no alpha channel, so transparency is dropped.
pub fn encode(image: &DynamicImage) -> Result<Vec<u8>, ImageError> {
    let rgb = image.to_rgb8();
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, DISK_QUALITY);
    encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)?;
    Ok(buf)
}
