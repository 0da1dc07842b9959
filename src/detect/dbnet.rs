//! DBNet text detection through ONNX Runtime.

use std::path::{Path, PathBuf};

use image::RgbImage;
use ort::session::builder::SessionBuilder;
use ort::session::Session;
use ort::value::Tensor;

use super::probability::{prepare_input, regions_from_probability};
use super::TextDetector;
use crate::error::ScrubError;
use crate::mask::DetectedRegion;

const DEFAULT_MAX_THREADS: usize = 4;

/// A DBNet model session. The session is created by `initialize` and
/// dropped by `release`.
pub struct DbNetDetector {
    model: PathBuf,
    session: Option<Session>,
}

impl DbNetDetector {
    pub fn new(model: &Path) -> Self {
        Self {
            model: model.to_path_buf(),
            session: None,
        }
    }
}

impl TextDetector for DbNetDetector {
    fn name(&self) -> &str {
        "dbnet"
    }

    fn initialize(&mut self) -> Result<(), ScrubError> {
        let load_error =
            |e: ort::Error| ScrubError::Detector(format!("cannot load {}: {}", self.model.display(), e));
        let builder = Session::builder().map_err(load_error)?;
        let builder = apply_session_threads(builder).map_err(load_error)?;
        let session = builder.commit_from_file(&self.model).map_err(load_error)?;
        self.session = Some(session);
        Ok(())
    }

    fn infer(&mut self, _source: &Path, image: &RgbImage) -> Result<Vec<DetectedRegion>, ScrubError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ScrubError::Detector("dbnet detector used before initialize".to_string()))?;
        let (orig_w, orig_h) = image.dimensions();
        let (input, input_w, input_h) = prepare_input(image);

        let tensor = Tensor::from_array(input).map_err(|e| ScrubError::Detector(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| ScrubError::Detector(format!("detection inference failed: {}", e)))?;
        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| ScrubError::Detector(e.to_string()))?
            .to_owned();
        drop(outputs);

        let shape = output.shape().to_vec();
        let (h, w) = match shape.as_slice() {
            [1, 1, h, w] | [1, h, w] => (*h, *w),
            other => {
                return Err(ScrubError::Detector(format!(
                    "unexpected output shape {:?}",
                    other
                )))
            }
        };
        let prob = output
            .into_shape_with_order((h, w))
            .map_err(|e| ScrubError::Detector(e.to_string()))?;

        Ok(regions_from_probability(prob.view(), input_w, input_h, orig_w, orig_h))
    }

    fn release(&mut self) {
        self.session = None;
    }
}

fn parse_env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse::<usize>().ok()
}

fn thread_settings() -> (usize, usize) {
    let intra = parse_env_usize("DCMSCRUB_ORT_THREADS")
        .filter(|v| *v > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(DEFAULT_MAX_THREADS)
                .clamp(1, DEFAULT_MAX_THREADS)
        });
    let inter = parse_env_usize("DCMSCRUB_ORT_INTER_THREADS")
        .filter(|v| *v > 0)
        .unwrap_or(1);
    (intra, inter)
}

fn apply_session_threads(builder: SessionBuilder) -> Result<SessionBuilder, ort::Error> {
    let (intra, inter) = thread_settings();
    log::debug!("onnx runtime threads: intra={}, inter={}", intra, inter);
    let builder = builder.with_intra_threads(intra)?;
    let builder = builder.with_inter_threads(inter)?;
    builder.with_parallel_execution(false)
}
