//! Text detection capability.
//!
//! A [`TextDetector`] turns one working image into polygons around burned-in
//! text. Detectors are stateful (model sessions, file handles) and not
//! re-entrant, so every batch worker builds its own through a
//! [`DetectorFactory`] and drives it through an explicit lifecycle:
//!
//! ```text
//! initialize -> infer (once per image) ... -> release
//! ```
//!
//! Available detectors:
//! - [`NullDetector`]: never finds text; only metadata is redacted.
//! - [`FixedRegions`]: returns the same regions for every image.
//! - [`SidecarDetector`]: reads regions produced by an external tool from
//!   `<input>.regions.json`.
//! - `DbNetDetector` (feature `onnx`): runs a DBNet text detection model.

#[cfg(feature = "onnx")]
mod dbnet;
pub mod probability;
mod sidecar;

use std::fmt;
use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::ScrubError;
use crate::mask::DetectedRegion;

#[cfg(feature = "onnx")]
pub use dbnet::DbNetDetector;
pub use sidecar::{sidecar_path, SidecarDetector};

/// A text detector with an explicit lifecycle.
///
/// Detectors are moved into the worker that owns them, hence `Send`.
pub trait TextDetector: Send {
    /// Short name for logs and reports.
    fn name(&self) -> &str;

    /// Acquires resources. Called once before the first `infer`.
    fn initialize(&mut self) -> Result<(), ScrubError> {
        Ok(())
    }

    /// Detects text regions in `image`, the working image of `source`.
    fn infer(&mut self, source: &Path, image: &RgbImage) -> Result<Vec<DetectedRegion>, ScrubError>;

    /// Releases resources. Called once after the last `infer`.
    fn release(&mut self) {}
}

/// Builds one detector per worker.
pub trait DetectorFactory {
    fn create(&self) -> Result<Box<dyn TextDetector>, ScrubError>;
}

impl<F> DetectorFactory for F
where
    F: Fn() -> Result<Box<dyn TextDetector>, ScrubError>,
{
    fn create(&self) -> Result<Box<dyn TextDetector>, ScrubError> {
        self()
    }
}

/// Detector selection for configuration and the CLI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// No pixel redaction.
    None,
    /// Regions from `<input>.regions.json`.
    #[default]
    Sidecar,
    /// DBNet ONNX model (requires the `onnx` feature).
    Dbnet,
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Sidecar => write!(f, "sidecar"),
            Self::Dbnet => write!(f, "dbnet"),
        }
    }
}

/// Factory for the built-in detectors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltinDetectors {
    pub kind: DetectorKind,
    /// Model file, used by `Dbnet` only.
    pub model: Option<PathBuf>,
}

impl DetectorFactory for BuiltinDetectors {
    fn create(&self) -> Result<Box<dyn TextDetector>, ScrubError> {
        match self.kind {
            DetectorKind::None => Ok(Box::new(NullDetector)),
            DetectorKind::Sidecar => Ok(Box::new(SidecarDetector::new())),
            DetectorKind::Dbnet => self.create_dbnet(),
        }
    }
}

impl BuiltinDetectors {
    #[cfg(feature = "onnx")]
    fn create_dbnet(&self) -> Result<Box<dyn TextDetector>, ScrubError> {
        let model = self.model.as_deref().ok_or_else(|| {
            ScrubError::Detector("the dbnet detector needs a model path".to_string())
        })?;
        Ok(Box::new(DbNetDetector::new(model)))
    }

    #[cfg(not(feature = "onnx"))]
    fn create_dbnet(&self) -> Result<Box<dyn TextDetector>, ScrubError> {
        Err(ScrubError::Detector(
            "the dbnet detector is not available: rebuild with `--features onnx`".to_string(),
        ))
    }
}

/// Finds nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullDetector;

impl TextDetector for NullDetector {
    fn name(&self) -> &str {
        "none"
    }

    fn infer(&mut self, _source: &Path, _image: &RgbImage) -> Result<Vec<DetectedRegion>, ScrubError> {
        Ok(Vec::new())
    }
}

/// Returns the same regions for every image.
#[derive(Clone, Debug, Default)]
pub struct FixedRegions {
    regions: Vec<DetectedRegion>,
}

impl FixedRegions {
    pub fn new(regions: Vec<DetectedRegion>) -> Self {
        Self { regions }
    }
}

impl TextDetector for FixedRegions {
    fn name(&self) -> &str {
        "fixed"
    }

    fn infer(&mut self, _source: &Path, _image: &RgbImage) -> Result<Vec<DetectedRegion>, ScrubError> {
        Ok(self.regions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_factory_kinds() {
        let none = BuiltinDetectors {
            kind: DetectorKind::None,
            model: None,
        };
        assert_eq!(none.create().expect("create").name(), "none");

        let sidecar = BuiltinDetectors {
            kind: DetectorKind::Sidecar,
            model: None,
        };
        assert_eq!(sidecar.create().expect("create").name(), "sidecar");
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_dbnet_requires_feature() {
        let dbnet = BuiltinDetectors {
            kind: DetectorKind::Dbnet,
            model: Some(PathBuf::from("det.onnx")),
        };
        assert!(matches!(dbnet.create(), Err(ScrubError::Detector(_))));
    }

    #[test]
    fn test_closure_factory() {
        let factory = || -> Result<Box<dyn TextDetector>, ScrubError> {
            Ok(Box::new(FixedRegions::new(vec![DetectedRegion::rect(0, 0, 1, 1)])))
        };
        let mut detector = factory.create().expect("create");
        let regions = detector
            .infer(Path::new("a.dcm"), &RgbImage::new(4, 4))
            .expect("infer");
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn test_kind_names_round_trip_through_serde() {
        let kind: DetectorKind = serde_json::from_str("\"dbnet\"").expect("parse");
        assert_eq!(kind, DetectorKind::Dbnet);
        assert_eq!(kind.to_string(), "dbnet");
    }
}
