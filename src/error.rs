use std::path::PathBuf;
use thiserror::Error;

use crate::batch::BatchReport;

/// The main error type for dcmscrub operations.
#[derive(Debug, Error)]
pub enum ScrubError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read rule file {path}: {source}")]
    RuleCsv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Malformed rule in {path} at line {line}: {message}")]
    MalformedRule {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("Failed to read {path}: {message}")]
    UnreadableFile { path: PathBuf, message: String },

    #[error("No pixel data in {path}")]
    MissingPixelData { path: PathBuf },

    #[error("Unsupported pixel format in {path}: {message}")]
    UnsupportedPixelFormat { path: PathBuf, message: String },

    #[error("Text detection failed: {0}")]
    Detector(String),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("Reconstruction failed: {0}")]
    Reconstruction(String),

    #[error("Pixel attributes disagree with pixel data: {message}")]
    InconsistentPixelAttributes { message: String },

    #[error("Failed to write {path}: {message}")]
    Serialization { path: PathBuf, message: String },

    #[error("Failed to parse config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("A batch worker panicked")]
    WorkerPanicked,

    #[error("Batch finished with {failed} failed file(s)")]
    BatchHadFailures { failed: usize, report: BatchReport },
}
