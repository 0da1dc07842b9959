//! The per-file redaction pipeline.
//!
//! One job owns one record from load to write and moves it through a fixed
//! sequence of stages:
//!
//! ```text
//! Loaded -> Validated -> Normalized -> Detected -> Reconstructed
//!        -> Denormalized -> MetadataRedacted -> Serialized
//! ```
//!
//! A record without pixel data stops after `Loaded` and is skipped. Any
//! other error stops the job at the stage it was trying to reach and is
//! returned as a [`StageFailure`]; nothing is written for that file. A
//! panic inside a stage is caught and reported the same way.
//!
//! Pixel data is always rebuilt from the working image, even when no text
//! is found, so every written file goes through the same depth and
//! attribute conversion.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use serde::Serialize;

use crate::detect::TextDetector;
use crate::dicom::{check_pixel_consistency, decode_pixels, io_part10, Record};
use crate::error::ScrubError;
use crate::inpaint::{inpaint, InpaintMethod, DEFAULT_RADIUS};
use crate::mask::ReconstructionMask;
use crate::normalize::{channels_agree, to_native, to_working, RangePolicy};
use crate::redact::redact_metadata;
use crate::rules::RuleTable;

/// Pipeline stages, named by the state a job reaches when the stage succeeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Loaded,
    Validated,
    Normalized,
    Detected,
    Reconstructed,
    Denormalized,
    MetadataRedacted,
    Serialized,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Loaded => "load",
            Stage::Validated => "validate",
            Stage::Normalized => "normalize",
            Stage::Detected => "detect",
            Stage::Reconstructed => "reconstruct",
            Stage::Denormalized => "denormalize",
            Stage::MetadataRedacted => "redact metadata",
            Stage::Serialized => "serialize",
        };
        f.write_str(name)
    }
}

/// An error together with the stage that raised it.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: ScrubError,
}

impl StageFailure {
    /// Returns true if the job should be skipped rather than failed.
    pub fn is_skip(&self) -> bool {
        matches!(self.error, ScrubError::MissingPixelData { .. })
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageFailure>;
}

impl<T> AtStage<T> for Result<T, ScrubError> {
    fn at(self, stage: Stage) -> Result<T, StageFailure> {
        self.map_err(|error| StageFailure { stage, error })
    }
}

/// Runs one stage, turning a panic inside it into a failure of that stage.
fn guarded<T>(
    stage: Stage,
    run: impl FnOnce() -> Result<T, ScrubError>,
) -> Result<T, StageFailure> {
    match panic::catch_unwind(AssertUnwindSafe(run)) {
        Ok(result) => result.at(stage),
        Err(payload) => Err(StageFailure {
            stage,
            error: ScrubError::Panicked(panic_message(payload.as_ref())),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Reconstruction and depth conversion settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineOptions {
    pub radius: u32,
    pub method: InpaintMethod,
    pub range: RangePolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            radius: DEFAULT_RADIUS,
            method: InpaintMethod::default(),
            range: RangePolicy::default(),
        }
    }
}

/// What a successful job changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Redacted {
    /// Text regions reported by the detector.
    pub regions: usize,
    /// Working-image pixels that were reconstructed.
    pub masked_pixels: usize,
    /// Attributes overwritten or emptied by rules.
    pub fields_redacted: usize,
}

/// Shared, read-only context for every job of a batch.
#[derive(Clone, Copy, Debug)]
pub struct Pipeline<'a> {
    rules: &'a RuleTable,
    options: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(rules: &'a RuleTable, options: PipelineOptions) -> Self {
        Self { rules, options }
    }

    /// The active rule table.
    pub fn rules(&self) -> &'a RuleTable {
        self.rules
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    /// Reads `input`, redacts it and writes the result to `output`.
    pub fn process_file(
        &self,
        detector: &mut dyn TextDetector,
        input: &Path,
        output: &Path,
    ) -> Result<Redacted, StageFailure> {
        let mut record = guarded(Stage::Loaded, || io_part10::read_part10(input))?;
        log::debug!("{}: loaded ({})", input.display(), record.transfer_syntax.uid());

        let redacted = self.redact_record(detector, input, &mut record)?;

        guarded(Stage::Serialized, || {
            check_pixel_consistency(&record)?;
            io_part10::write_part10(output, &record)
        })?;
        log::debug!("{}: wrote {}", input.display(), output.display());
        Ok(redacted)
    }

    /// Runs every in-memory stage on a record.
    ///
    /// `source` is the file the record came from; detectors may use it to
    /// find side information and errors mention it.
    pub fn redact_record(
        &self,
        detector: &mut dyn TextDetector,
        source: &Path,
        record: &mut Record,
    ) -> Result<Redacted, StageFailure> {
        if !record.has_pixel_data() {
            return Err(ScrubError::MissingPixelData {
                path: source.to_path_buf(),
            })
            .at(Stage::Loaded);
        }
        let pixels = guarded(Stage::Validated, || decode_pixels(record, source))?;

        let working = guarded(Stage::Normalized, || to_working(&pixels))?;
        let (width, height) = working.image.dimensions();
        log::debug!("{}: working image {}x{}", source.display(), width, height);

        let regions = guarded(Stage::Detected, || detector.infer(source, &working.image))?;
        log::debug!(
            "{}: {} reported {} region(s)",
            source.display(),
            detector.name(),
            regions.len()
        );

        let (mask, reconstructed) = guarded(Stage::Reconstructed, || {
            let mask = ReconstructionMask::from_regions(width, height, &regions);
            let reconstructed =
                inpaint(&working.image, &mask, self.options.radius, self.options.method)?;
            Ok((mask, reconstructed))
        })?;
        let masked_pixels = mask.masked_count();
        if !channels_agree(&reconstructed) {
            log::warn!(
                "{}: reconstructed channels disagree, keeping channel 0",
                source.display()
            );
        }

        guarded(Stage::Denormalized, || {
            let native = to_native(
                &reconstructed,
                working.element,
                working.source_range,
                self.options.range,
            )?;
            record.replace_pixels(&native).map(|_| ())
        })?;

        let changed = guarded(Stage::MetadataRedacted, || {
            let changed = redact_metadata(&mut record.dataset, self.rules);
            let emptied: Vec<String> = changed
                .iter()
                .filter(|(tag, _)| tag.is_pixel_descriptive())
                .map(|(tag, _)| tag.to_string())
                .collect();
            if !emptied.is_empty() {
                return Err(ScrubError::InconsistentPixelAttributes {
                    message: format!(
                        "active rule(s) for {} overwrite pixel attributes",
                        emptied.join(", ")
                    ),
                });
            }
            Ok(changed)
        })?;

        Ok(Redacted {
            regions: regions.len(),
            masked_pixels,
            fields_redacted: changed.len(),
        })
    }
}
