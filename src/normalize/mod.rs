//! Conversion between native pixel buffers and the 8-bit RGB working image.
//!
//! Detection and reconstruction operate on 3-channel 8-bit images. The
//! native buffer is min/max rescaled into 0..=255 and the single channel is
//! replicated three times. Going back, channel 0 of the reconstructed image
//! becomes the new native buffer.
//!
//! The forward mapping is lossy: a 16-bit image keeps only 256 grey levels.
//! By default the way back is a plain numeric cast of the 8-bit values into
//! the native element type, so a redacted 16-bit file holds values in
//! 0..=255. With [`RangePolicy::Restore`] the 8-bit values are instead
//! mapped back onto the source's original value range; for sources whose
//! value span is at most 255 that makes the round trip exact.

use image::{Rgb, RgbImage};

use crate::dicom::{NativePixels, PixelElement};
use crate::error::ScrubError;

/// How working values are mapped back into native values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RangePolicy {
    /// Cast the 8-bit value straight into the native element type.
    #[default]
    Cast,
    /// Undo the min/max rescale before casting.
    Restore,
}

/// An 8-bit RGB working image plus what is needed to map it back.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkingImage {
    pub image: RgbImage,
    /// Element type of the source buffer.
    pub element: PixelElement,
    /// (min, max) of the source buffer.
    pub source_range: (f64, f64),
}

/// Rescales a native buffer to 0..=255 and expands it to three channels.
///
/// A constant image maps to 0 everywhere.
pub fn to_working(pixels: &NativePixels) -> Result<WorkingImage, ScrubError> {
    let (rows, columns) = pixels.shape();
    let (min, max) = pixels
        .value_range()
        .ok_or_else(|| ScrubError::Reconstruction("pixel buffer is empty".to_string()))?;
    let span = max - min;
    let scale = if span > f64::EPSILON { 255.0 / span } else { 0.0 };

    let mut raw = Vec::with_capacity(rows * columns * 3);
    for v in pixels.values() {
        let g = ((v - min) * scale).round_ties_even().clamp(0.0, 255.0) as u8;
        raw.extend_from_slice(&[g, g, g]);
    }

    let image = RgbImage::from_raw(columns as u32, rows as u32, raw).ok_or_else(|| {
        ScrubError::Reconstruction(format!("cannot build {}x{} working image", columns, rows))
    })?;

    Ok(WorkingImage {
        image,
        element: pixels.element(),
        source_range: (min, max),
    })
}

/// Takes channel 0 of a working image and converts it to the native element type.
pub fn to_native(
    working: &RgbImage,
    element: PixelElement,
    source_range: (f64, f64),
    policy: RangePolicy,
) -> Result<NativePixels, ScrubError> {
    let (width, height) = working.dimensions();
    let (min, max) = source_range;
    let span = max - min;

    let samples = working.pixels().map(|px| {
        let x = px[0] as f64;
        match policy {
            RangePolicy::Cast => x as i64,
            RangePolicy::Restore if span > f64::EPSILON => {
                (x * span / 255.0 + min).round_ties_even() as i64
            }
            RangePolicy::Restore => min as i64,
        }
    });

    NativePixels::from_samples(element, height as usize, width as usize, samples)
}

/// Returns true if every pixel has identical R, G and B values.
pub fn channels_agree(image: &RgbImage) -> bool {
    image.pixels().all(|&Rgb([r, g, b])| r == g && g == b)
}
