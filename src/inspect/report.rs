//! Inspection report types.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::dicom::{PixelAttributes, PixelElement};

/// Summary of one file.
#[derive(Clone, Debug, Serialize)]
pub struct InspectReport {
    pub path: PathBuf,
    pub transfer_syntax: String,
    /// Number of top-level data set elements.
    pub elements: usize,
    /// Absent if the file has no pixel data.
    pub pixels: Option<PixelSection>,
    /// Identifying attributes that are present, as (keyword, value).
    pub identifying: Vec<(String, String)>,
}

/// Pixel description and checks.
#[derive(Clone, Debug, Serialize)]
pub struct PixelSection {
    pub declared: PixelAttributes,
    pub element: Option<PixelElement>,
    pub value_range: Option<(f64, f64)>,
    /// Why the pixels could not be decoded, if they could not.
    pub decode_error: Option<String>,
    /// Why the declared attributes disagree with the pixel bytes, if they do.
    pub consistency_error: Option<String>,
}

impl InspectReport {
    /// Returns true unless pixel attributes disagree with the pixel data.
    pub fn is_consistent(&self) -> bool {
        self.pixels
            .as_ref()
            .map_or(true, |p| p.consistency_error.is_none())
    }
}

impl fmt::Display for InspectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.path.display())?;
        writeln!(f, "  transfer syntax: {}", self.transfer_syntax)?;
        writeln!(f, "  elements: {}", self.elements)?;

        match &self.pixels {
            None => writeln!(f, "  pixel data: none")?,
            Some(p) => {
                let d = &p.declared;
                writeln!(
                    f,
                    "  pixel data: {}x{}, {} sample(s), {}",
                    d.rows, d.columns, d.samples_per_pixel, d.photometric_interpretation
                )?;
                writeln!(
                    f,
                    "  bits: allocated {}, stored {}, high bit {}, representation {}",
                    d.bits_allocated, d.bits_stored, d.high_bit, d.pixel_representation
                )?;
                if let (Some(element), Some((lo, hi))) = (p.element, p.value_range) {
                    writeln!(f, "  samples: {:?}, range {}..={}", element, lo, hi)?;
                }
                if let Some(e) = &p.decode_error {
                    writeln!(f, "  not decodable: {}", e)?;
                }
                match &p.consistency_error {
                    None => writeln!(f, "  attributes: consistent")?,
                    Some(e) => writeln!(f, "  attributes: INCONSISTENT ({})", e)?,
                }
            }
        }

        if !self.identifying.is_empty() {
            writeln!(f, "  identifying attributes:")?;
            for (name, value) in &self.identifying {
                writeln!(f, "    {}: {}", name, value)?;
            }
        }
        Ok(())
    }
}
