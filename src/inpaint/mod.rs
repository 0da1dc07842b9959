//! Mask-driven image reconstruction.
//!
//! Two fill policies are offered:
//!
//! - [`InpaintMethod::Telea`]: onion-peel fill. Masked pixels are grouped
//!   into layers by their 4-connected distance from the nearest unmasked
//!   pixel. Each layer is filled with the distance-weighted mean of every
//!   already-known pixel within `radius`, working inward from the hole's
//!   boundary.
//! - [`InpaintMethod::NavierStokes`] (default): the onion-peel fill as an
//!   initial guess, followed by a fixed number of explicit iterations that
//!   transport image smoothness along isophotes and add a small amount of
//!   diffusion. Large rectangular holes come out with fewer seams than with
//!   onion peeling alone.
//!
//! Both policies only ever write masked pixels, use exactly the same
//! arithmetic on each channel, and read values computed in a previous step
//! (never in the current one), so results do not depend on iteration order.

use std::collections::VecDeque;

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::ScrubError;
use crate::mask::ReconstructionMask;

/// Neighbourhood radius used when none is configured.
pub const DEFAULT_RADIUS: u32 = 7;

const NS_ITERATIONS: usize = 64;
const NS_TIME_STEP: f32 = 0.1;
const UNREACHED: u32 = u32::MAX;

/// Fill policy for masked pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InpaintMethod {
    #[default]
    NavierStokes,
    Telea,
}

impl std::fmt::Display for InpaintMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NavierStokes => write!(f, "navier-stokes"),
            Self::Telea => write!(f, "telea"),
        }
    }
}

/// Reconstructs the masked pixels of `image` from their surroundings.
///
/// Pixels outside the mask are copied unchanged. If every pixel is masked
/// there is nothing to propagate from and the result is black.
///
/// # Errors
/// Returns `Reconstruction` if the mask and image sizes differ or `radius`
/// is zero.
pub fn inpaint(
    image: &RgbImage,
    mask: &ReconstructionMask,
    radius: u32,
    method: InpaintMethod,
) -> Result<RgbImage, ScrubError> {
    let (width, height) = image.dimensions();
    if mask.dimensions() != (width, height) {
        let (mw, mh) = mask.dimensions();
        return Err(ScrubError::Reconstruction(format!(
            "mask is {}x{} but image is {}x{}",
            mw, mh, width, height
        )));
    }
    if radius == 0 {
        return Err(ScrubError::Reconstruction(
            "inpainting radius must be at least 1".to_string(),
        ));
    }

    let mut out = image.clone();
    if mask.is_clear() {
        return Ok(out);
    }

    let mut field = Field::from_image(image);
    let layers = peel_layers(mask);
    onion_fill(&mut field, &layers, radius);
    if method == InpaintMethod::NavierStokes {
        transport_and_diffuse(&mut field, &layers);
    }

    for (i, &layer) in layers.iter().enumerate() {
        if layer != 0 {
            let x = (i % width as usize) as u32;
            let y = (i / width as usize) as u32;
            out.put_pixel(x, y, field.rgb(i));
        }
    }
    Ok(out)
}

/// Per-pixel floating point working copy of an RGB image.
struct Field {
    width: usize,
    height: usize,
    values: Vec<[f32; 3]>,
}

impl Field {
    fn from_image(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width: width as usize,
            height: height as usize,
            values: image
                .pixels()
                .map(|&Rgb([r, g, b])| [r as f32, g as f32, b as f32])
                .collect(),
        }
    }

    /// Value at (x, y) with coordinates clamped to the image.
    #[inline]
    fn at(&self, x: isize, y: isize) -> [f32; 3] {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.values[y * self.width + x]
    }

    /// 4-neighbour Laplacian at (x, y).
    #[inline]
    fn laplacian(&self, x: isize, y: isize) -> [f32; 3] {
        let c = self.at(x, y);
        let l = self.at(x - 1, y);
        let r = self.at(x + 1, y);
        let u = self.at(x, y - 1);
        let d = self.at(x, y + 1);
        std::array::from_fn(|k| l[k] + r[k] + u[k] + d[k] - 4.0 * c[k])
    }

    fn rgb(&self, i: usize) -> Rgb<u8> {
        let v = self.values[i];
        Rgb(v.map(|c| c.round().clamp(0.0, 255.0) as u8))
    }
}

/// Layer index per pixel: 0 for unmasked pixels, k >= 1 for masked pixels at
/// 4-connected distance k from the nearest unmasked pixel.
fn peel_layers(mask: &ReconstructionMask) -> Vec<u32> {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    let mut layers = vec![UNREACHED; w * h];
    let mut queue = VecDeque::new();

    for y in 0..height {
        for x in 0..width {
            if !mask.is_masked(x, y) {
                let i = y as usize * w + x as usize;
                layers[i] = 0;
                queue.push_back(i);
            }
        }
    }

    while let Some(i) = queue.pop_front() {
        let (x, y) = (i % w, i / w);
        let next = layers[i] + 1;
        let neighbours = [
            (x > 0).then(|| i - 1),
            (x + 1 < w).then(|| i + 1),
            (y > 0).then(|| i - w),
            (y + 1 < h).then(|| i + w),
        ];
        for n in neighbours.into_iter().flatten() {
            if layers[n] == UNREACHED {
                layers[n] = next;
                queue.push_back(n);
            }
        }
    }
    layers
}

/// Fills masked pixels layer by layer from known pixels within `radius`.
fn onion_fill(field: &mut Field, layers: &[u32], radius: u32) {
    let mut order: Vec<usize> = (0..layers.len()).filter(|&i| layers[i] != 0).collect();
    order.sort_by_key(|&i| (layers[i], i));

    let r = radius as isize;
    let (w, h) = (field.width as isize, field.height as isize);
    for i in order {
        let layer = layers[i];
        if layer == UNREACHED {
            field.values[i] = [0.0; 3];
            continue;
        }
        let (px, py) = ((i % field.width) as isize, (i / field.width) as isize);
        let mut sum = [0.0f32; 3];
        let mut total = 0.0f32;
        for dy in -r..=r {
            for dx in -r..=r {
                let d2 = dx * dx + dy * dy;
                if d2 == 0 || d2 > r * r {
                    continue;
                }
                let (qx, qy) = (px + dx, py + dy);
                if qx < 0 || qy < 0 || qx >= w || qy >= h {
                    continue;
                }
                let q = (qy * w + qx) as usize;
                if layers[q] >= layer {
                    continue;
                }
                let weight = 1.0 / d2 as f32;
                let v = field.values[q];
                for k in 0..3 {
                    sum[k] += weight * v[k];
                }
                total += weight;
            }
        }
        // The previous layer always has a 4-neighbour, so total > 0.
        if total > 0.0 {
            field.values[i] = sum.map(|s| s / total);
        }
    }
}

/// Explicit isophote transport of the Laplacian plus diffusion, restricted
/// to masked pixels.
fn transport_and_diffuse(field: &mut Field, layers: &[u32]) {
    let masked: Vec<usize> = (0..layers.len()).filter(|&i| layers[i] != 0).collect();
    let mut next = vec![[0.0f32; 3]; masked.len()];

    for _ in 0..NS_ITERATIONS {
        for (slot, &i) in next.iter_mut().zip(&masked) {
            let (x, y) = ((i % field.width) as isize, (i / field.width) as isize);
            let c = field.at(x, y);
            let (l, r) = (field.at(x - 1, y), field.at(x + 1, y));
            let (u, d) = (field.at(x, y - 1), field.at(x, y + 1));
            let lap = field.laplacian(x, y);
            let (lap_l, lap_r) = (field.laplacian(x - 1, y), field.laplacian(x + 1, y));
            let (lap_u, lap_d) = (field.laplacian(x, y - 1), field.laplacian(x, y + 1));

            *slot = std::array::from_fn(|k| {
                let ix = (r[k] - l[k]) * 0.5;
                let iy = (d[k] - u[k]) * 0.5;
                let dlx = (lap_r[k] - lap_l[k]) * 0.5;
                let dly = (lap_d[k] - lap_u[k]) * 0.5;
                let norm = (ix * ix + iy * iy).sqrt() + 1.0;
                let transport = (dlx * -iy + dly * ix) / norm;
                (c[k] + NS_TIME_STEP * (transport + lap[k])).clamp(0.0, 255.0)
            });
        }
        for (&i, &v) in masked.iter().zip(&next) {
            field.values[i] = v;
        }
    }
}
