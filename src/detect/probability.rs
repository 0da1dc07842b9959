//! Model input preparation and probability-map post-processing for
//! segmentation-style (DBNet) text detectors.
//!
//! These parts need no inference runtime and are always compiled.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array2, Array3, Array4, ArrayView2, Axis};

use crate::mask::{DetectedRegion, Point};

/// Longest side the model input is scaled down to.
pub const LIMIT_SIDE: u32 = 960;
/// Smallest model input side; inputs are multiples of this.
pub const LIMIT_MIN: u32 = 32;

/// Pixel probability above which a pixel counts as text.
pub const THRESH: f32 = 0.3;
/// Mean probability a component needs to be reported.
pub const BOX_THRESH: f32 = 0.5;
/// Components narrower or shorter than this (in model pixels) are dropped.
pub const MIN_SIZE: f32 = 5.0;
/// Growth applied to each component box; DBNet predicts shrunken kernels.
pub const UNCLIP_RATIO: f32 = 1.6;

const MEAN: f32 = 0.5;
const STD: f32 = 0.5;

/// Resizes and normalizes a working image into an NCHW batch of one.
///
/// Returns the tensor and the model input (width, height).
pub fn prepare_input(image: &RgbImage) -> (Array4<f32>, u32, u32) {
    let (orig_w, orig_h) = image.dimensions();
    let ratio = input_ratio(orig_w, orig_h);
    let new_w = ((orig_w as f32 * ratio) as u32 / LIMIT_MIN * LIMIT_MIN).max(LIMIT_MIN);
    let new_h = ((orig_h as f32 * ratio) as u32 / LIMIT_MIN * LIMIT_MIN).max(LIMIT_MIN);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Lanczos3);
    let tensor = normalize(&resized).insert_axis(Axis(0));
    (tensor, new_w, new_h)
}

fn input_ratio(width: u32, height: u32) -> f32 {
    let max_side = width.max(height) as f32;
    let min_side = width.min(height).max(1) as f32;
    let mut ratio = 1.0f32;
    if max_side > LIMIT_SIDE as f32 {
        ratio = LIMIT_SIDE as f32 / max_side;
    }
    if min_side * ratio < LIMIT_MIN as f32 {
        ratio = LIMIT_MIN as f32 / min_side;
    }
    ratio
}

/// CHW tensor in BGR order, `(x / 255 - 0.5) / 0.5`.
fn normalize(image: &RgbImage) -> Array3<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut tensor = Array3::<f32>::zeros((3, h, w));
    for (x, y, px) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, y, x]] = (px[2] as f32 / 255.0 - MEAN) / STD;
        tensor[[1, y, x]] = (px[1] as f32 / 255.0 - MEAN) / STD;
        tensor[[2, y, x]] = (px[0] as f32 / 255.0 - MEAN) / STD;
    }
    tensor
}

/// Turns a (height, width) probability map into text regions in working
/// image coordinates.
///
/// Pixels above [`THRESH`] are grouped into 4-connected components. Each
/// component large and confident enough becomes an expanded rectangle,
/// scaled from model input size back to the original image size and
/// labelled with its mean score.
pub fn regions_from_probability(
    prob: ArrayView2<f32>,
    input_w: u32,
    input_h: u32,
    orig_w: u32,
    orig_h: u32,
) -> Vec<DetectedRegion> {
    let (h, w) = prob.dim();
    let mut visited = Array2::<bool>::from_elem((h, w), false);
    let scale_x = orig_w as f32 / input_w.max(1) as f32;
    let scale_y = orig_h as f32 / input_h.max(1) as f32;
    let mut found: Vec<(f32, DetectedRegion)> = Vec::new();

    for start_y in 0..h {
        for start_x in 0..w {
            if prob[[start_y, start_x]] <= THRESH || visited[[start_y, start_x]] {
                continue;
            }
            let (mut min_x, mut max_x, mut min_y, mut max_y) = (start_x, start_x, start_y, start_y);
            let mut score_sum = 0.0f32;
            let mut count = 0usize;
            let mut stack = vec![(start_x, start_y)];
            visited[[start_y, start_x]] = true;

            while let Some((x, y)) = stack.pop() {
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);
                score_sum += prob[[y, x]];
                count += 1;

                let neighbours = [
                    (x > 0).then(|| (x - 1, y)),
                    (x + 1 < w).then(|| (x + 1, y)),
                    (y > 0).then(|| (x, y - 1)),
                    (y + 1 < h).then(|| (x, y + 1)),
                ];
                for (nx, ny) in neighbours.into_iter().flatten() {
                    if prob[[ny, nx]] > THRESH && !visited[[ny, nx]] {
                        visited[[ny, nx]] = true;
                        stack.push((nx, ny));
                    }
                }
            }

            let box_w = (max_x - min_x) as f32;
            let box_h = (max_y - min_y) as f32;
            if box_w < MIN_SIZE || box_h < MIN_SIZE {
                continue;
            }
            let score = score_sum / count as f32;
            if score < BOX_THRESH {
                continue;
            }

            let expand_w = box_w * (UNCLIP_RATIO - 1.0) / 2.0;
            let expand_h = box_h * (UNCLIP_RATIO - 1.0) / 2.0;
            let x1 = (min_x as f32 - expand_w).max(0.0) * scale_x;
            let y1 = (min_y as f32 - expand_h).max(0.0) * scale_y;
            let x2 = (max_x as f32 + expand_w).min(w as f32 - 1.0) * scale_x;
            let y2 = (max_y as f32 + expand_h).min(h as f32 - 1.0) * scale_y;

            let region = DetectedRegion::new(vec![
                Point::from_f32(x1, y1),
                Point::from_f32(x2, y1),
                Point::from_f32(x2, y2),
                Point::from_f32(x1, y2),
            ])
            .with_label(format!("score={:.3}", score));
            found.push((y1, region));
        }
    }

    found.sort_by(|a, b| a.0.total_cmp(&b.0));
    found.into_iter().map(|(_, region)| region).collect()
}
