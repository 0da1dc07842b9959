#![allow(dead_code)]

use dcmscrub::mask::DetectedRegion;
use image::{Rgb, RgbImage};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// Axis-aligned regions that may extend past the image on any side.
pub fn arb_region(width: u32, height: u32) -> impl Strategy<Value = DetectedRegion> {
    let w = width as i32;
    let h = height as i32;
    (-4..w + 4, -4..h + 4, 0..w / 2 + 1, 0..h / 2 + 1)
        .prop_map(|(x0, y0, dx, dy)| DetectedRegion::rect(x0, y0, x0 + dx, y0 + dy))
}

pub fn arb_regions(width: u32, height: u32, max: usize) -> impl Strategy<Value = Vec<DetectedRegion>> {
    prop::collection::vec(arb_region(width, height), 0..=max)
}

/// Grey working images: every pixel has equal channels.
pub fn arb_grey_image(max_side: u32) -> impl Strategy<Value = RgbImage> {
    (4..=max_side, 4..=max_side).prop_flat_map(|(w, h)| {
        prop::collection::vec(any::<u8>(), (w * h) as usize).prop_map(move |values| {
            RgbImage::from_fn(w, h, |x, y| {
                let v = values[(y * w + x) as usize];
                Rgb([v, v, v])
            })
        })
    })
}
