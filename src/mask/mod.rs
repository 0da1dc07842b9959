//! Reconstruction masks built from detected text regions.
//!
//! Each region is replaced by the solid axis-aligned bounding box of its
//! polygon. The box is a superset of the text outline: slightly more of the
//! surrounding image is reconstructed, but no stroke of a glyph that the
//! detector outlined can survive outside the mask.

mod region;

pub use region::{DetectedRegion, PixelBox, Point};

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

/// Mask value for pixels to reconstruct.
pub const MASKED: u8 = 255;

/// A binary mask the size of the working image: 255 = reconstruct, 0 = keep.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconstructionMask {
    image: GrayImage,
}

impl ReconstructionMask {
    /// An all-clear mask.
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::new(width, height),
        }
    }

    /// Builds the mask for a `width` x `height` image.
    ///
    /// A pixel is set if and only if it lies inside the bounding box of at
    /// least one region. Empty polygons and boxes entirely outside the
    /// image contribute nothing.
    pub fn from_regions(width: u32, height: u32, regions: &[DetectedRegion]) -> Self {
        let mut mask = Self::empty(width, height);
        for region in regions {
            if let Some(bbox) = region.bounding_box() {
                mask.fill_box(bbox);
            }
        }
        mask
    }

    /// Sets every pixel of `bbox` that falls inside the mask.
    pub fn fill_box(&mut self, bbox: PixelBox) {
        let (width, height) = self.image.dimensions();
        if let Some(clipped) = bbox.clip(width, height) {
            let rect = Rect::at(clipped.xmin, clipped.ymin).of_size(clipped.width(), clipped.height());
            draw_filled_rect_mut(&mut self.image, rect, Luma([MASKED]));
        }
    }

    /// (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Returns true if the pixel at column `x`, row `y` is masked.
    #[inline]
    pub fn is_masked(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y)[0] == MASKED
    }

    /// Number of masked pixels.
    pub fn masked_count(&self) -> usize {
        self.image.pixels().filter(|p| p[0] == MASKED).count()
    }

    /// Returns true if nothing is masked.
    pub fn is_clear(&self) -> bool {
        self.image.pixels().all(|p| p[0] != MASKED)
    }

    /// The underlying grayscale image.
    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }
}
