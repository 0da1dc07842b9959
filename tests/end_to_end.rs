//! Whole-directory redaction runs against synthesized DICOM files.

mod common;

use std::fs;
use std::path::Path;

use dcmscrub::batch::{run_batch, BatchOptions, BatchReport, JobOutcome};
use dcmscrub::detect::{BuiltinDetectors, DetectorKind};
use dcmscrub::dicom::{
    check_pixel_consistency, decode_pixels, tags, Element, NativePixels, PixelElement, Tag,
    TransferSyntax, Vr,
};
use dcmscrub::normalize::RangePolicy;
use dcmscrub::pipeline::{Pipeline, PipelineOptions, Stage};
use dcmscrub::rules::{from_rules_str, RuleTable};
use ndarray::Array2;

const PATIENT_NAME_RULE: &str = "tag,delete\n0x0010,0x0010,True\n";

fn sidecar() -> BuiltinDetectors {
    BuiltinDetectors {
        kind: DetectorKind::Sidecar,
        model: None,
    }
}

fn run(input: &Path, output: &Path, rules: &RuleTable, options: PipelineOptions, batch: BatchOptions) -> BatchReport {
    let pipeline = Pipeline::new(rules, options);
    run_batch(input, output, &pipeline, &sidecar(), batch).unwrap()
}

#[test]
fn burned_in_text_is_removed_and_the_rest_is_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");

    let mut pixels = common::ramp_u8(512, 512);
    common::burn_text(&mut pixels, 100, 150, 200, 260);
    let original = pixels.clone();
    let input = input_dir.join("scan.dcm");
    common::write_record(&input, &common::record_with_pixels(&NativePixels::U8(pixels), "DOE^JANE"));
    common::write_sidecar(&input, &[(200, 100, 260, 150)]);

    let rules = from_rules_str(PATIENT_NAME_RULE).unwrap();
    let report = run(&input_dir, &output_dir, &rules, PipelineOptions::default(), BatchOptions::default());
    assert_eq!(report.written_count(), 1);
    assert_eq!(report.total_regions(), 1);

    let redacted = common::read_record(&output_dir.join("scan_redacted.dcm"));
    assert_eq!(redacted.dataset.get_int(tags::ROWS), Some(512));
    assert_eq!(redacted.dataset.get_int(tags::COLUMNS), Some(512));
    let NativePixels::U8(out) = decode_pixels(&redacted, Path::new("scan_redacted.dcm")).unwrap() else {
        panic!("expected 8-bit pixels");
    };

    let mut changed_inside = 0;
    for ((r, c), &value) in out.indexed_iter() {
        let inside = (100..=150).contains(&r) && (200..=260).contains(&c);
        if inside {
            if value != original[[r, c]] {
                changed_inside += 1;
            }
        } else {
            assert_eq!(value, original[[r, c]], "pixel ({}, {}) changed outside the region", r, c);
        }
    }
    assert!(changed_inside > 0);

    // The strokes were 255; the surrounding ramp is far darker here.
    let max_inside = (100..=150)
        .flat_map(|r| (200..=260).map(move |c| (r, c)))
        .map(|(r, c)| out[[r, c]])
        .max()
        .unwrap();
    assert!(max_inside < 255, "text strokes survived: max {}", max_inside);
}

#[test]
fn patient_name_rule_redacts_only_that_attribute() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");
    let input = input_dir.join("a.dcm");
    common::write_record(
        &input,
        &common::record_with_pixels(&NativePixels::U8(common::ramp_u8(16, 16)), "DOE^JANE"),
    );

    let rules = from_rules_str(PATIENT_NAME_RULE).unwrap();
    let report = run(&input_dir, &output_dir, &rules, PipelineOptions::default(), BatchOptions::default());
    assert!(matches!(
        &report.jobs[0].outcome,
        JobOutcome::Written { fields_redacted: 1, regions: 0, .. }
    ));

    let mut before = common::read_record(&input);
    let mut after = common::read_record(&output_dir.join("a_redacted.dcm"));
    assert_eq!(after.dataset.get_str(tags::PATIENT_NAME).as_deref(), Some("REDACTED"));

    before.dataset.remove(tags::PATIENT_NAME);
    after.dataset.remove(tags::PATIENT_NAME);
    assert_eq!(before.dataset, after.dataset);
}

#[test]
fn file_without_pixel_data_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");
    common::write_record(&input_dir.join("sr.dcm"), &common::demographics_only("DOE^JANE"));

    let rules = from_rules_str(PATIENT_NAME_RULE).unwrap();
    let report = run(&input_dir, &output_dir, &rules, PipelineOptions::default(), BatchOptions::default());

    assert_eq!(report.skipped_count(), 1);
    assert!(report.is_clean());
    assert!(!output_dir.join("sr_redacted.dcm").exists());
}

#[test]
fn a_corrupt_file_does_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");
    fs::create_dir_all(&input_dir).unwrap();
    fs::write(input_dir.join("a_corrupt.dcm"), b"definitely not DICOM").unwrap();
    common::write_record(
        &input_dir.join("b_good.dcm"),
        &common::record_with_pixels(&NativePixels::U8(common::ramp_u8(8, 8)), "DOE^JANE"),
    );

    let rules = from_rules_str(PATIENT_NAME_RULE).unwrap();
    let report = run(&input_dir, &output_dir, &rules, PipelineOptions::default(), BatchOptions::default());

    assert_eq!(report.jobs.len(), 2);
    match &report.jobs[0].outcome {
        JobOutcome::Failed { stage, .. } => assert_eq!(*stage, Stage::Loaded),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(matches!(report.jobs[1].outcome, JobOutcome::Written { .. }));
    assert!(!output_dir.join("a_corrupt_redacted.dcm").exists());
    assert!(output_dir.join("b_good_redacted.dcm").exists());
    assert!(!report.is_clean());
}

#[test]
fn oversized_dimensions_fail_one_file_not_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");

    let mut bad = common::record_with_pixels(&NativePixels::U8(common::ramp_u8(4, 4)), "DOE^JANE");
    let huge = 0xFFFF_FFFFu32.to_le_bytes().to_vec();
    bad.dataset.put(Element::new(tags::ROWS, Vr::UL, huge.clone()));
    bad.dataset.put(Element::new(tags::COLUMNS, Vr::UL, huge));
    bad.dataset.put_u16(tags::BITS_ALLOCATED, 32);
    bad.dataset.put_u16(tags::BITS_STORED, 32);
    bad.dataset.put_u16(tags::HIGH_BIT, 31);
    common::write_record(&input_dir.join("a_bad.dcm"), &bad);
    common::write_record(
        &input_dir.join("b_good.dcm"),
        &common::record_with_pixels(&NativePixels::U8(common::ramp_u8(8, 8)), "DOE^JANE"),
    );

    let rules = from_rules_str(PATIENT_NAME_RULE).unwrap();
    let report = run(
        &input_dir,
        &output_dir,
        &rules,
        PipelineOptions::default(),
        BatchOptions { recursive: false, jobs: 2 },
    );

    assert_eq!(report.jobs.len(), 2);
    match &report.jobs[0].outcome {
        JobOutcome::Failed { stage, reason } => {
            assert_eq!(*stage, Stage::Validated);
            assert!(reason.contains("4294967295"), "unexpected reason: {}", reason);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(matches!(report.jobs[1].outcome, JobOutcome::Written { .. }));
    assert!(output_dir.join("b_good_redacted.dcm").exists());
    assert!(!output_dir.join("a_bad_redacted.dcm").exists());
}

#[test]
fn rules_on_pixel_attributes_fail_with_the_rule_named() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");
    common::write_record(
        &input_dir.join("a.dcm"),
        &common::record_with_pixels(&NativePixels::U8(common::ramp_u8(8, 8)), "DOE^JANE"),
    );

    let rules = from_rules_str("tag,delete\n0x0010,0x0010,True\n0x0028,0x0100,True\n").unwrap();
    let report = run(&input_dir, &output_dir, &rules, PipelineOptions::default(), BatchOptions::default());
    match &report.jobs[0].outcome {
        JobOutcome::Failed { stage, reason } => {
            assert_eq!(*stage, Stage::MetadataRedacted);
            assert!(reason.contains("(0028,0100)"), "unexpected reason: {}", reason);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!output_dir.join("a_redacted.dcm").exists());
}

#[test]
fn malformed_sidecar_fails_at_detection() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");
    let input = input_dir.join("a.dcm");
    common::write_record(
        &input,
        &common::record_with_pixels(&NativePixels::U8(common::ramp_u8(8, 8)), "DOE^JANE"),
    );
    fs::write(dcmscrub::detect::sidecar_path(&input), "{ not json").unwrap();

    let rules = from_rules_str(PATIENT_NAME_RULE).unwrap();
    let report = run(&input_dir, &output_dir, &rules, PipelineOptions::default(), BatchOptions::default());
    match &report.jobs[0].outcome {
        JobOutcome::Failed { stage, .. } => assert_eq!(*stage, Stage::Detected),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[test]
fn implicit_vr_input_is_written_explicit_and_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");
    fs::create_dir_all(&input_dir).unwrap();
    let input = input_dir.join("implicit.dcm");
    common::write_implicit_record(
        &input,
        &common::record_with_pixels(&NativePixels::U8(common::ramp_u8(32, 24)), "DOE^JANE"),
    );
    common::write_sidecar(&input, &[(2, 2, 10, 6)]);

    let rules = from_rules_str(PATIENT_NAME_RULE).unwrap();
    let report = run(&input_dir, &output_dir, &rules, PipelineOptions::default(), BatchOptions::default());
    assert_eq!(report.written_count(), 1);

    let redacted = common::read_record(&output_dir.join("implicit_redacted.dcm"));
    assert_eq!(redacted.transfer_syntax, TransferSyntax::ExplicitVrLittleEndian);
    let attrs = check_pixel_consistency(&redacted).unwrap();
    assert_eq!((attrs.rows, attrs.columns), (32, 24));
    assert_eq!(redacted.dataset.get_str(tags::PATIENT_NAME).as_deref(), Some("REDACTED"));
}

#[test]
fn implicit_vr_input_keeps_dictionary_vrs() {
    let kvp = Tag::new(0x0018, 0x0060);
    let physicians_of_record = Tag::new(0x0008, 0x1048);

    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");
    fs::create_dir_all(&input_dir).unwrap();
    let mut record = common::record_with_pixels(&NativePixels::U8(common::ramp_u8(8, 8)), "DOE^JANE");
    record.dataset.put_str(kvp, Vr::DS, "120");
    record.dataset.put_str(physicians_of_record, Vr::PN, "SMITH^JOHN");
    common::write_implicit_record(&input_dir.join("ct.dcm"), &record);

    let rules = RuleTable::default();
    let pipeline = Pipeline::new(&rules, PipelineOptions::default());
    let none = BuiltinDetectors {
        kind: DetectorKind::None,
        model: None,
    };
    let report = run_batch(&input_dir, &output_dir, &pipeline, &none, BatchOptions::default()).unwrap();
    assert_eq!(report.written_count(), 1);

    let redacted = common::read_record(&output_dir.join("ct_redacted.dcm"));
    assert_eq!(redacted.transfer_syntax, TransferSyntax::ExplicitVrLittleEndian);
    assert_eq!(redacted.dataset.get(kvp).map(|e| e.vr), Some(Vr::DS));
    assert_eq!(redacted.dataset.get(physicians_of_record).map(|e| e.vr), Some(Vr::PN));
    assert_eq!(redacted.dataset.get_str(kvp).as_deref(), Some("120"));
    assert_eq!(redacted.dataset.get(tags::MODALITY).map(|e| e.vr), Some(Vr::CS));
}

#[test]
fn sixteen_bit_input_keeps_its_element_type() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");
    let values = Array2::from_shape_fn((20, 20), |(r, c)| 1000 + (r * 20 + c) as u16);
    let input = input_dir.join("ct.dcm");
    common::write_record(&input, &common::record_with_pixels(&NativePixels::U16(values), "DOE^JANE"));

    let rules = from_rules_str(PATIENT_NAME_RULE).unwrap();
    let report = run(&input_dir, &output_dir, &rules, PipelineOptions::default(), BatchOptions::default());
    assert_eq!(report.written_count(), 1);

    let redacted = common::read_record(&output_dir.join("ct_redacted.dcm"));
    let attrs = check_pixel_consistency(&redacted).unwrap();
    assert_eq!(attrs.bits_allocated, 16);
    let pixels = decode_pixels(&redacted, Path::new("ct_redacted.dcm")).unwrap();
    assert_eq!(pixels.element(), PixelElement::U16);
    let (lo, hi) = pixels.value_range().unwrap();
    assert!(lo >= 0.0 && hi <= 255.0, "cast output should hold 8-bit values, got {}..={}", lo, hi);
}

#[test]
fn preserve_range_restores_narrow_sixteen_bit_input_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");
    // Span of 255 maps one-to-one onto the working image.
    let values = Array2::from_shape_fn((16, 16), |(r, c)| 2000 + ((r * 16 + c) % 256) as u16);
    let original = NativePixels::U16(values);
    let input = input_dir.join("ct.dcm");
    common::write_record(&input, &common::record_with_pixels(&original, "DOE^JANE"));

    let rules = from_rules_str(PATIENT_NAME_RULE).unwrap();
    let options = PipelineOptions {
        range: RangePolicy::Restore,
        ..PipelineOptions::default()
    };
    run(&input_dir, &output_dir, &rules, options, BatchOptions::default());

    let redacted = common::read_record(&output_dir.join("ct_redacted.dcm"));
    let pixels = decode_pixels(&redacted, Path::new("ct_redacted.dcm")).unwrap();
    assert_eq!(pixels, original);
}

#[test]
fn parallel_runs_report_in_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");
    for i in 0..9 {
        let input = input_dir.join(format!("img_{:02}.dcm", i));
        let name = format!("PATIENT^{:02}", i);
        common::write_record(
            &input,
            &common::record_with_pixels(&NativePixels::U8(common::ramp_u8(24, 24)), &name),
        );
        if i % 3 == 0 {
            common::write_sidecar(&input, &[(4, 4, 12, 8)]);
        }
    }

    let rules = from_rules_str(PATIENT_NAME_RULE).unwrap();
    let serial = run(&input_dir, &output_dir.join("serial"), &rules, PipelineOptions::default(), BatchOptions::default());
    let parallel = run(
        &input_dir,
        &output_dir.join("parallel"),
        &rules,
        PipelineOptions::default(),
        BatchOptions { recursive: false, jobs: 4 },
    );

    let inputs = |report: &BatchReport| report.jobs.iter().map(|j| j.input.clone()).collect::<Vec<_>>();
    assert_eq!(inputs(&serial), inputs(&parallel));
    assert_eq!(parallel.written_count(), 9);
    assert_eq!(serial.total_regions(), parallel.total_regions());

    for i in 0..9 {
        let name = format!("img_{:02}_redacted.dcm", i);
        let a = fs::read(output_dir.join("serial").join(&name)).unwrap();
        let b = fs::read(output_dir.join("parallel").join(&name)).unwrap();
        assert_eq!(a, b, "{} differs between serial and parallel runs", name);
    }
}

#[test]
fn recursive_runs_mirror_the_input_tree() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");
    let record = common::record_with_pixels(&NativePixels::U8(common::ramp_u8(8, 8)), "DOE^JANE");
    common::write_record(&input_dir.join("top.dcm"), &record);
    common::write_record(&input_dir.join("study").join("series").join("deep.DICOM"), &record);
    fs::write(input_dir.join("study").join("notes.txt"), "ignored").unwrap();

    let rules = from_rules_str(PATIENT_NAME_RULE).unwrap();
    let flat = run(&input_dir, &output_dir.join("flat"), &rules, PipelineOptions::default(), BatchOptions::default());
    assert_eq!(flat.jobs.len(), 1);

    let deep = run(
        &input_dir,
        &output_dir.join("deep"),
        &rules,
        PipelineOptions::default(),
        BatchOptions { recursive: true, jobs: 2 },
    );
    assert_eq!(deep.written_count(), 2);
    assert!(output_dir.join("deep").join("top_redacted.dcm").exists());
    assert!(output_dir
        .join("deep")
        .join("study")
        .join("series")
        .join("deep_redacted.DICOM")
        .exists());
}
