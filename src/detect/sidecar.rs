//! Regions supplied by an external detector as JSON next to each input.
//!
//! For `scan/ct_001.dcm` the sidecar is `scan/ct_001.dcm.regions.json`:
//!
//! ```json
//! [
//!   { "points": [[200, 100], [260, 100], [260, 150], [200, 150]], "label": "DOE^JANE" }
//! ]
//! ```
//!
//! Coordinates are in pixel space of the image (column, row) and may be
//! fractional; they are truncated toward zero. A missing sidecar means no
//! text was found.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::Deserialize;

use super::TextDetector;
use crate::error::ScrubError;
use crate::mask::{DetectedRegion, Point};

const SIDECAR_SUFFIX: &str = ".regions.json";

#[derive(Debug, Deserialize)]
struct SidecarRegion {
    points: Vec<[f32; 2]>,
    #[serde(default)]
    label: Option<String>,
}

/// Path of the sidecar for an input file.
pub fn sidecar_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// Reads `<input>.regions.json`.
#[derive(Clone, Debug, Default)]
pub struct SidecarDetector {
    files_read: usize,
}

impl SidecarDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TextDetector for SidecarDetector {
    fn name(&self) -> &str {
        "sidecar"
    }

    fn infer(&mut self, source: &Path, _image: &RgbImage) -> Result<Vec<DetectedRegion>, ScrubError> {
        let path = sidecar_path(source);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("no sidecar for {}", source.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(ScrubError::Detector(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let parsed: Vec<SidecarRegion> = serde_json::from_str(&text).map_err(|e| {
            ScrubError::Detector(format!("invalid region file {}: {}", path.display(), e))
        })?;
        self.files_read += 1;

        Ok(parsed
            .into_iter()
            .map(|r| DetectedRegion {
                points: r.points.iter().map(|&[x, y]| Point::from_f32(x, y)).collect(),
                label: r.label,
            })
            .collect())
    }

    fn release(&mut self) {
        log::debug!("sidecar detector read {} region file(s)", self.files_read);
    }
}
