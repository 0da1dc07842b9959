//! Batch report types: one outcome per input file plus summary counts.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::pipeline::Stage;

/// How one job ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// A redacted copy was written.
    Written {
        output: PathBuf,
        regions: usize,
        masked_pixels: usize,
        fields_redacted: usize,
    },
    /// Nothing to do for this file (no pixel data).
    Skipped { reason: String },
    /// The job stopped at `stage`; no output was written.
    Failed { stage: Stage, reason: String },
}

/// One input file and its outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub input: PathBuf,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

/// The result of a batch run, in input order.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BatchReport {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Detector name.
    pub detector: String,
    /// Number of active rules.
    pub active_rules: usize,
    pub jobs: Vec<JobReport>,
}

impl BatchReport {
    /// Number of files written.
    pub fn written_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.outcome, JobOutcome::Written { .. }))
            .count()
    }

    /// Number of files skipped.
    pub fn skipped_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.outcome, JobOutcome::Skipped { .. }))
            .count()
    }

    /// Number of files that failed.
    pub fn failed_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.outcome, JobOutcome::Failed { .. }))
            .count()
    }

    /// Returns true if no job failed.
    pub fn is_clean(&self) -> bool {
        self.failed_count() == 0
    }

    /// Text regions reconstructed over the whole batch.
    pub fn total_regions(&self) -> usize {
        self.jobs
            .iter()
            .map(|j| match j.outcome {
                JobOutcome::Written { regions, .. } => regions,
                _ => 0,
            })
            .sum()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Redacted {} -> {} (detector: {}, {} active rule(s))",
            self.input_dir.display(),
            self.output_dir.display(),
            self.detector,
            self.active_rules
        )?;
        writeln!(
            f,
            "  {} written, {} skipped, {} failed, {} text region(s)",
            self.written_count(),
            self.skipped_count(),
            self.failed_count(),
            self.total_regions()
        )?;

        let skipped: Vec<_> = self
            .jobs
            .iter()
            .filter_map(|j| match &j.outcome {
                JobOutcome::Skipped { reason } => Some((&j.input, reason)),
                _ => None,
            })
            .collect();
        if !skipped.is_empty() {
            writeln!(f)?;
            writeln!(f, "Skipped ({}):", skipped.len())?;
            for (input, reason) in skipped {
                writeln!(f, "  - {}: {}", input.display(), reason)?;
            }
        }

        let failed: Vec<_> = self
            .jobs
            .iter()
            .filter_map(|j| match &j.outcome {
                JobOutcome::Failed { stage, reason } => Some((&j.input, stage, reason)),
                _ => None,
            })
            .collect();
        if !failed.is_empty() {
            writeln!(f)?;
            writeln!(f, "Failed ({}):", failed.len())?;
            for (input, stage, reason) in failed {
                writeln!(f, "  - {} [{}]: {}", input.display(), stage, reason)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> BatchReport {
        BatchReport {
            input_dir: PathBuf::from("in"),
            output_dir: PathBuf::from("out"),
            detector: "sidecar".to_string(),
            active_rules: 2,
            jobs: vec![
                JobReport {
                    input: PathBuf::from("in/a.dcm"),
                    outcome: JobOutcome::Written {
                        output: PathBuf::from("out/a_redacted.dcm"),
                        regions: 3,
                        masked_pixels: 120,
                        fields_redacted: 2,
                    },
                },
                JobReport {
                    input: PathBuf::from("in/b.dcm"),
                    outcome: JobOutcome::Skipped {
                        reason: "no pixel data".to_string(),
                    },
                },
                JobReport {
                    input: PathBuf::from("in/c.dcm"),
                    outcome: JobOutcome::Failed {
                        stage: Stage::Loaded,
                        reason: "truncated".to_string(),
                    },
                },
            ],
        }
    }

    #[test]
    fn test_counts() {
        let report = report();
        assert_eq!(report.written_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.total_regions(), 3);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_display_lists_skips_and_failures() {
        let text = report().to_string();
        assert!(text.contains("1 written, 1 skipped, 1 failed, 3 text region(s)"));
        assert!(text.contains("in/b.dcm: no pixel data"));
        assert!(text.contains("in/c.dcm [load]: truncated"));
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(report()).expect("json");
        assert_eq!(value["jobs"][0]["status"], "written");
        assert_eq!(value["jobs"][0]["fields_redacted"], 2);
        assert_eq!(value["jobs"][2]["status"], "failed");
        assert_eq!(value["jobs"][2]["stage"], "loaded");
    }
}
