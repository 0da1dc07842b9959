#![allow(dead_code)]

use std::fs;
use std::path::Path;

use dcmscrub::dicom::{io_part10, tags, NativePixels, Record, Vr};
use ndarray::Array2;

pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";

/// A diagonal ramp from 0 to 255, so normalization is the identity.
pub fn ramp_u8(rows: usize, columns: usize) -> Array2<u8> {
    let steps = (rows + columns).saturating_sub(2).max(1);
    Array2::from_shape_fn((rows, columns), |(r, c)| ((r + c) * 255 / steps) as u8)
}

/// Burns a white block into `pixels` over rows `r0..=r1`, columns `c0..=c1`.
pub fn burn_text(pixels: &mut Array2<u8>, r0: usize, r1: usize, c0: usize, c1: usize) {
    for r in r0..=r1 {
        for c in c0..=c1 {
            // Alternate strokes so the block looks like glyphs, not a solid bar.
            if (c / 3) % 2 == 0 {
                pixels[[r, c]] = 255;
            }
        }
    }
}

/// A CT-like record with identifying attributes and the given pixels.
pub fn record_with_pixels(pixels: &NativePixels, patient_name: &str) -> Record {
    let mut record = demographics_only(patient_name);
    record.dataset.put_str(tags::MODALITY, Vr::CS, "CT");
    record.replace_pixels(pixels).unwrap();
    record
}

/// A record with identifying attributes and no pixel data.
pub fn demographics_only(patient_name: &str) -> Record {
    let mut record = Record::new();
    let ds = &mut record.dataset;
    ds.put_str(tags::SOP_CLASS_UID, Vr::UI, CT_IMAGE_STORAGE);
    ds.put_str(tags::SOP_INSTANCE_UID, Vr::UI, "1.2.3.4.5.6.7.8");
    ds.put_str(tags::STUDY_DATE, Vr::DA, "20240131");
    ds.put_str(tags::INSTITUTION_NAME, Vr::LO, "GENERAL HOSPITAL");
    ds.put_str(tags::PATIENT_NAME, Vr::PN, patient_name);
    ds.put_str(tags::PATIENT_ID, Vr::LO, "MRN-0042");
    ds.put_str(tags::PATIENT_BIRTH_DATE, Vr::DA, "19700101");
    ds.put_str(tags::PATIENT_SEX, Vr::CS, "F");
    record
}

pub fn write_record(path: &Path, record: &Record) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    io_part10::write_part10(path, record).unwrap();
}

pub fn write_implicit_record(path: &Path, record: &Record) {
    let bytes = io_part10::to_implicit_part10_vec(record).unwrap();
    fs::write(path, bytes).unwrap();
}

/// Writes `<path>.regions.json` with one rectangle per `(x0, y0, x1, y1)`.
pub fn write_sidecar(path: &Path, rects: &[(i32, i32, i32, i32)]) {
    let regions: Vec<serde_json::Value> = rects
        .iter()
        .map(|&(x0, y0, x1, y1)| {
            serde_json::json!({
                "points": [[x0, y0], [x1, y0], [x1, y1], [x0, y1]],
                "label": "burned-in text",
            })
        })
        .collect();
    let sidecar = dcmscrub::detect::sidecar_path(path);
    fs::write(sidecar, serde_json::to_string(&regions).unwrap()).unwrap();
}

pub fn write_rules(path: &Path, rows: &[&str]) {
    let mut text = String::from("tag,delete\n");
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    fs::write(path, text).unwrap();
}

pub fn read_record(path: &Path) -> Record {
    io_part10::read_part10(path).unwrap()
}
