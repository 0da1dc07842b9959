//! Run configuration.
//!
//! A `RedactConfig` can be loaded from YAML and then overridden field by
//! field from the command line:
//!
//! ```yaml
//! input_dir: scans/
//! output_dir: redacted/
//! rules: rules.csv
//! detector: dbnet
//! model: models/det.onnx
//! jobs: 4
//! recursive: true
//! preserve_range: false
//! inpaint_radius: 7
//! inpaint_method: navier-stokes
//! ```
//!
//! Every key is optional in the file; the directories and the rule file
//! must be known by the time [`RedactConfig::validate`] runs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::batch::BatchOptions;
use crate::detect::{BuiltinDetectors, DetectorKind};
use crate::error::ScrubError;
use crate::inpaint::{InpaintMethod, DEFAULT_RADIUS};
use crate::normalize::RangePolicy;
use crate::pipeline::PipelineOptions;

fn default_jobs() -> usize {
    1
}

fn default_radius() -> u32 {
    DEFAULT_RADIUS
}

/// Everything a batch run needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedactConfig {
    #[serde(default)]
    pub input_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub rules: Option<PathBuf>,
    #[serde(default)]
    pub detector: DetectorKind,
    #[serde(default)]
    pub model: Option<PathBuf>,
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub preserve_range: bool,
    #[serde(default = "default_radius")]
    pub inpaint_radius: u32,
    #[serde(default)]
    pub inpaint_method: InpaintMethod,
}

impl Default for RedactConfig {
    fn default() -> Self {
        Self {
            input_dir: None,
            output_dir: None,
            rules: None,
            detector: DetectorKind::default(),
            model: None,
            jobs: default_jobs(),
            recursive: false,
            preserve_range: false,
            inpaint_radius: default_radius(),
            inpaint_method: InpaintMethod::default(),
        }
    }
}

/// A validated configuration with every required path present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub rules: PathBuf,
    pub detectors: BuiltinDetectors,
    pub pipeline: PipelineOptions,
    pub batch: BatchOptions,
}

impl RedactConfig {
    /// Loads a configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ScrubError> {
        let data = fs::read_to_string(path)?;
        serde_yaml::from_str(&data).map_err(|source| ScrubError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks the configuration and splits it into per-component options.
    pub fn validate(&self) -> Result<ResolvedConfig, ScrubError> {
        let required = |value: &Option<PathBuf>, name: &str| {
            value
                .clone()
                .ok_or_else(|| ScrubError::InvalidConfig(format!("{} is required", name)))
        };
        let input_dir = required(&self.input_dir, "input_dir")?;
        let output_dir = required(&self.output_dir, "output_dir")?;
        let rules = required(&self.rules, "rules")?;

        if self.jobs == 0 {
            return Err(ScrubError::InvalidConfig("jobs must be at least 1".to_string()));
        }
        if self.inpaint_radius == 0 {
            return Err(ScrubError::InvalidConfig(
                "inpaint_radius must be at least 1".to_string(),
            ));
        }
        if self.detector == DetectorKind::Dbnet && self.model.is_none() {
            return Err(ScrubError::InvalidConfig(
                "detector dbnet needs a model path".to_string(),
            ));
        }
        if input_dir == output_dir {
            return Err(ScrubError::InvalidConfig(
                "output_dir must differ from input_dir".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            input_dir,
            output_dir,
            rules,
            detectors: BuiltinDetectors {
                kind: self.detector,
                model: self.model.clone(),
            },
            pipeline: PipelineOptions {
                radius: self.inpaint_radius,
                method: self.inpaint_method,
                range: if self.preserve_range {
                    RangePolicy::Restore
                } else {
                    RangePolicy::Cast
                },
            },
            batch: BatchOptions {
                recursive: self.recursive,
                jobs: self.jobs,
            },
        })
    }
}
