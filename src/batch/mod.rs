//! Batch orchestration: discover inputs, run one job per file, collect a report.
//!
//! # Inputs and outputs
//!
//! Candidates are regular files with a `.dcm` or `.dicom` extension (any
//! case) directly inside the input directory, or anywhere below it in
//! recursive mode. They are processed in sorted path order.
//!
//! Each input `<input_dir>/<sub>/<stem>.<ext>` is written to
//! `<output_dir>/<sub>/<stem>_redacted.<ext>`. Distinct inputs therefore
//! never share an output path. The output directory is created if needed.
//!
//! # Failure isolation
//!
//! A file without pixel data is skipped. Any error while processing a file
//! is recorded in the report with the stage it happened in, and the batch
//! moves on, including when a stage panics. Only problems that would
//! affect every file are fatal: an unreadable input directory, an output
//! directory that cannot be created or resolves to the input directory, or
//! a detector that cannot be initialized. Detectors already initialized
//! when another fails are released before the error is returned.
//!
//! # Concurrency
//!
//! Jobs run on `jobs` scoped worker threads that pull the next input from a
//! shared counter. The rule table is shared read-only; each worker owns its
//! own detector, initialized before the first job and released after the
//! last. The report lists jobs in input order whatever the worker count.
//!
//! # Re-running
//!
//! Redaction is not idempotent. Feeding a redacted output back in reruns
//! detection and reconstruction, and may alter pixels again if text is still
//! found. Outputs are never picked up during the run that wrote them:
//! inputs are listed before the first job starts.

mod report;

pub use report::{BatchReport, JobOutcome, JobReport};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use walkdir::WalkDir;

use crate::detect::{DetectorFactory, TextDetector};
use crate::error::ScrubError;
use crate::pipeline::{Pipeline, Stage};

/// File extensions treated as inputs.
pub const EXTENSIONS: &[&str] = &["dcm", "dicom"];

/// Suffix appended to the stem of every output file.
pub const OUTPUT_SUFFIX: &str = "_redacted";

/// Traversal and parallelism settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchOptions {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Number of worker threads (at least 1).
    pub jobs: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            jobs: 1,
        }
    }
}

/// Lists input files in sorted order.
pub fn discover_inputs(input_dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, ScrubError> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(input_dir)
        .follow_links(true)
        .min_depth(1)
        .max_depth(max_depth)
    {
        let entry = entry.map_err(|source| ScrubError::UnreadableFile {
            path: input_dir.to_path_buf(),
            message: format!("failed while traversing directory: {source}"),
        })?;

        if entry.file_type().is_file() && has_extension(entry.path(), EXTENSIONS) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    allowed
        .iter()
        .any(|allowed_ext| ext.eq_ignore_ascii_case(allowed_ext))
}

/// Output path for `input`, mirroring its position below `input_dir`.
pub fn output_path(input_dir: &Path, output_dir: &Path, input: &Path) -> PathBuf {
    let relative = input.strip_prefix(input_dir).unwrap_or(input);
    let parent = relative.parent().unwrap_or_else(|| Path::new(""));
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{}{}.{}", stem, OUTPUT_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, OUTPUT_SUFFIX),
    };
    output_dir.join(parent).join(name)
}

/// Redacts every input file below `input_dir` into `output_dir`.
///
/// # Errors
/// Only fatal problems are returned as errors (see the module docs);
/// per-file problems are recorded in the report.
pub fn run_batch(
    input_dir: &Path,
    output_dir: &Path,
    pipeline: &Pipeline<'_>,
    detectors: &dyn DetectorFactory,
    options: BatchOptions,
) -> Result<BatchReport, ScrubError> {
    if !input_dir.is_dir() {
        return Err(ScrubError::UnreadableFile {
            path: input_dir.to_path_buf(),
            message: "not a directory".to_string(),
        });
    }
    fs::create_dir_all(output_dir)?;
    if fs::canonicalize(input_dir)? == fs::canonicalize(output_dir)? {
        return Err(ScrubError::InvalidConfig(format!(
            "output_dir must differ from input_dir ({} and {} are the same directory)",
            input_dir.display(),
            output_dir.display()
        )));
    }

    let inputs = discover_inputs(input_dir, options.recursive)?;
    let workers = options.jobs.clamp(1, inputs.len().max(1));

    let mut owned: Vec<Box<dyn TextDetector>> = Vec::with_capacity(workers);
    for _ in 0..workers {
        let ready = detectors.create().and_then(|mut detector| {
            detector.initialize()?;
            Ok(detector)
        });
        match ready {
            Ok(detector) => owned.push(detector),
            Err(e) => {
                for detector in &mut owned {
                    detector.release();
                }
                return Err(e);
            }
        }
    }
    let detector_name = owned
        .first()
        .map(|d| d.name().to_string())
        .unwrap_or_default();

    log::info!(
        "redacting {} file(s) from {} with {} worker(s), detector {}",
        inputs.len(),
        input_dir.display(),
        workers,
        detector_name
    );

    let cursor = AtomicUsize::new(0);
    let results = std::thread::scope(|scope| {
        let handles: Vec<_> = owned
            .into_iter()
            .map(|mut detector| {
                let inputs = &inputs;
                let cursor = &cursor;
                scope.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let index = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(input) = inputs.get(index) else {
                            break;
                        };
                        let output = output_path(input_dir, output_dir, input);
                        let outcome = run_job(pipeline, detector.as_mut(), input, &output);
                        done.push((
                            index,
                            JobReport {
                                input: input.clone(),
                                outcome,
                            },
                        ));
                    }
                    detector.release();
                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| ScrubError::WorkerPanicked))
            .collect::<Result<Vec<_>, _>>()
    })?;

    let mut jobs: Vec<(usize, JobReport)> = results.into_iter().flatten().collect();
    jobs.sort_by_key(|(index, _)| *index);

    let report = BatchReport {
        input_dir: input_dir.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        detector: detector_name,
        active_rules: pipeline.rules().len(),
        jobs: jobs.into_iter().map(|(_, job)| job).collect(),
    };
    log::info!(
        "finished: {} written, {} skipped, {} failed",
        report.written_count(),
        report.skipped_count(),
        report.failed_count()
    );
    Ok(report)
}

fn run_job(
    pipeline: &Pipeline<'_>,
    detector: &mut dyn TextDetector,
    input: &Path,
    output: &Path,
) -> JobOutcome {
    if let Some(parent) = output.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            log::warn!("{}: cannot create {}: {}", input.display(), parent.display(), e);
            return JobOutcome::Failed {
                stage: Stage::Serialized,
                reason: e.to_string(),
            };
        }
    }

    match pipeline.process_file(detector, input, output) {
        Ok(redacted) => {
            log::info!(
                "{} -> {} ({} region(s), {} field(s))",
                input.display(),
                output.display(),
                redacted.regions,
                redacted.fields_redacted
            );
            JobOutcome::Written {
                output: output.to_path_buf(),
                regions: redacted.regions,
                masked_pixels: redacted.masked_pixels,
                fields_redacted: redacted.fields_redacted,
            }
        }
        Err(failure) if failure.is_skip() => {
            log::info!("{}: skipped, no pixel data", input.display());
            JobOutcome::Skipped {
                reason: "no pixel data".to_string(),
            }
        }
        Err(failure) => {
            log::warn!("{}: {}", input.display(), failure);
            JobOutcome::Failed {
                stage: failure.stage,
                reason: failure.error.to_string(),
            }
        }
    }
}
