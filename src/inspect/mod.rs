//! File inspection: what a record declares about its pixels and whether the
//! declaration matches the bytes.
//!
//! Used by `dcmscrub inspect` to check inputs before a run and outputs
//! after one.

mod report;

pub use report::{InspectReport, PixelSection};

use std::path::Path;

use crate::dicom::{check_pixel_consistency, decode_pixels, tags, PixelAttributes, Record};

/// Attributes shown when present, because rules usually target them.
const IDENTIFYING_TAGS: &[(crate::dicom::Tag, &str)] = &[
    (tags::PATIENT_NAME, "PatientName"),
    (tags::PATIENT_ID, "PatientID"),
    (tags::PATIENT_BIRTH_DATE, "PatientBirthDate"),
    (tags::PATIENT_SEX, "PatientSex"),
    (tags::INSTITUTION_NAME, "InstitutionName"),
    (tags::REFERRING_PHYSICIAN_NAME, "ReferringPhysicianName"),
    (tags::STUDY_DATE, "StudyDate"),
];

/// Builds an inspection report for a parsed record.
pub fn inspect_record(record: &Record, path: &Path) -> InspectReport {
    let pixels = record.has_pixel_data().then(|| {
        let declared = PixelAttributes::declared(&record.dataset);
        let (element, value_range, decode_error) = match decode_pixels(record, path) {
            Ok(pixels) => (Some(pixels.element()), pixels.value_range(), None),
            Err(e) => (None, None, Some(e.to_string())),
        };
        let consistency_error = check_pixel_consistency(record).err().map(|e| e.to_string());
        PixelSection {
            declared,
            element,
            value_range,
            decode_error,
            consistency_error,
        }
    });

    let identifying = IDENTIFYING_TAGS
        .iter()
        .filter_map(|&(tag, name)| {
            record
                .dataset
                .get_str(tag)
                .map(|value| (name.to_string(), value))
        })
        .collect();

    InspectReport {
        path: path.to_path_buf(),
        transfer_syntax: record.transfer_syntax.uid().to_string(),
        elements: record.dataset.len(),
        pixels,
        identifying,
    }
}
