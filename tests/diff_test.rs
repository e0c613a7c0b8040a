mod common;

use common::{run_diff, run_diff_with, TestFile, TestImage, TestLayout};
use diffoci::error::{AcquisitionError, ComparisonError, StoreError};
use diffoci::outcome::failure_message;
use diffoci::{Context, Error, ExecutionOutcome};
use serde_json::json;
use std::fs;

const APP_1: &str = "localhost/app:1";
const APP_2: &str = "localhost/app:2";

fn base_files() -> Vec<TestFile> {
    vec![
        TestFile::new("etc/hostname", "box\n"),
        TestFile::new("usr/bin/app", "#!/bin/sh\necho hi\n").mode(0o755),
    ]
}

fn layout_with(left: TestImage, right: TestImage) -> TestLayout {
    let mut layout = TestLayout::new();
    layout.add_image(APP_1, &left);
    layout.add_image(APP_2, &right);
    layout
}

fn code(outcome: ExecutionOutcome) -> u8 {
    outcome.exit_code()
}

#[test]
fn test_same_image_is_clean() {
    let mut layout = TestLayout::new();
    layout.add_image(APP_1, &TestImage::new("2024-01-01T00:00:00Z", vec![base_files()]));

    assert_eq!(code(run_diff(&layout, &[APP_1, APP_1])), 0);
}

#[test]
fn test_rebuild_differs_only_in_timestamps() {
    let later: Vec<TestFile> = base_files().into_iter().map(|f| f.mtime(1_800_000_000)).collect();
    let layout = layout_with(
        TestImage::new("2024-01-01T00:00:00Z", vec![base_files()]),
        TestImage::new("2024-06-01T00:00:00Z", vec![later]),
    );

    assert_eq!(code(run_diff(&layout, &[APP_1, APP_2])), 1);
    assert_eq!(code(run_diff(&layout, &["--semantic", APP_1, APP_2])), 0);
    // Image names still differ.
    assert_eq!(code(run_diff(&layout, &["--ignore-timestamps", APP_1, APP_2])), 1);
    assert_eq!(
        code(run_diff(
            &layout,
            &["--ignore-timestamps", "--ignore-image-name", APP_1, APP_2]
        )),
        0
    );
}

#[test]
fn test_content_change_is_found_even_with_semantic() {
    let mut changed = base_files();
    changed[0] = TestFile::new("etc/hostname", "other\n");
    let layout = layout_with(
        TestImage::new("2024-01-01T00:00:00Z", vec![base_files()]),
        TestImage::new("2024-01-01T00:00:00Z", vec![changed]),
    );

    assert_eq!(code(run_diff(&layout, &["--semantic", APP_1, APP_2])), 1);
    assert_eq!(
        code(run_diff(
            &layout,
            &["--semantic", "--extra-ignore-files=etc/hostname", APP_1, APP_2]
        )),
        0
    );
}

#[test]
fn test_file_order() {
    let mut reordered = base_files();
    reordered.reverse();
    let layout = layout_with(
        TestImage::new("2024-01-01T00:00:00Z", vec![base_files()]),
        TestImage::new("2024-01-01T00:00:00Z", vec![reordered]),
    );

    assert_eq!(code(run_diff(&layout, &["--ignore-image-name", APP_1, APP_2])), 1);
    assert_eq!(
        code(run_diff(
            &layout,
            &["--ignore-image-name", "--ignore-file-order", APP_1, APP_2]
        )),
        0
    );
}

#[test]
fn test_permission_flags() {
    let mut chmod = base_files();
    chmod[1] = TestFile::new("usr/bin/app", "#!/bin/sh\necho hi\n").mode(0o700);
    let layout = layout_with(
        TestImage::new("2024-01-01T00:00:00Z", vec![base_files()]),
        TestImage::new("2024-01-01T00:00:00Z", vec![chmod]),
    );

    assert_eq!(code(run_diff(&layout, &["--semantic", APP_1, APP_2])), 1);
    assert_eq!(
        code(run_diff(
            &layout,
            &["--semantic", "--extra-ignore-file-permissions", APP_1, APP_2]
        )),
        0
    );
}

#[test]
fn test_report_file_keeps_argument_order() {
    let mut extra = base_files();
    extra.push(TestFile::new("etc/motd", "welcome\n"));
    let layout = layout_with(
        TestImage::new("2024-01-01T00:00:00Z", vec![base_files()]),
        TestImage::new("2024-01-01T00:00:00Z", vec![extra]),
    );
    let out = tempfile::tempdir().unwrap();
    let forward = out.path().join("forward.json");
    let backward = out.path().join("backward.json");

    let flag = format!("--report-file={}", forward.display());
    assert_eq!(code(run_diff(&layout, &["--semantic", &flag, APP_1, APP_2])), 1);
    let flag = format!("--report-file={}", backward.display());
    assert_eq!(code(run_diff(&layout, &["--semantic", &flag, APP_2, APP_1])), 1);

    let find_lengths = |path: &std::path::Path| -> serde_json::Value {
        let report: serde_json::Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        report["children"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["conflict"]["kind"] == "file-length")
            .map(|c| c["conflict"]["values"].clone())
            .unwrap()
    };
    assert_eq!(find_lengths(&forward), serde_json::json!(["2", "3"]));
    assert_eq!(find_lengths(&backward), serde_json::json!(["3", "2"]));
}

#[test]
fn test_report_dir() {
    let layout = layout_with(
        TestImage::new("2024-01-01T00:00:00Z", vec![base_files()]),
        TestImage::new("2024-01-01T00:00:00Z", vec![base_files(), base_files()]),
    );
    let out = tempfile::tempdir().unwrap();
    let dir = out.path().join("diff");
    let flag = format!("--report-dir={}", dir.display());

    assert_eq!(code(run_diff(&layout, &[&flag, APP_1, APP_2])), 1);
    let report = fs::read_to_string(dir.join("report.json")).unwrap();
    assert!(report.contains("layer-length"));
}

#[test]
fn test_report_dir_holds_both_sides_of_changed_files() {
    let mut changed = base_files();
    changed[0] = TestFile::new("etc/hostname", "other\n");
    let layout = layout_with(
        TestImage::new("2024-01-01T00:00:00Z", vec![base_files()]),
        TestImage::new("2024-01-01T00:00:00Z", vec![changed]),
    );
    let out = tempfile::tempdir().unwrap();
    let dir = out.path().join("diff");
    let flag = format!("--report-dir={}", dir.display());

    assert_eq!(code(run_diff(&layout, &["--semantic", &flag, APP_1, APP_2])), 1);
    assert!(dir.join("report.json").exists());
    assert_eq!(
        fs::read_to_string(dir.join("input-0/etc/hostname")).unwrap(),
        "box\n"
    );
    assert_eq!(
        fs::read_to_string(dir.join("input-1/etc/hostname")).unwrap(),
        "other\n"
    );
    // Unchanged files are not dumped.
    assert!(!dir.join("input-0/usr/bin/app").exists());
}

#[test]
fn test_index_platform_selection() {
    let image = TestImage::new("2024-01-01T00:00:00Z", vec![base_files()]);
    let mut layout = TestLayout::new();
    layout.add_index(APP_1, &[("linux", "amd64"), ("linux", "arm64")], &image);
    layout.add_index(APP_2, &[("linux", "amd64")], &image);

    let outcome = run_diff(
        &layout,
        &["--ignore-image-name", "--platform=linux/amd64", APP_1, APP_2],
    );
    assert_eq!(code(outcome), 0);

    let outcome = run_diff(
        &layout,
        &["--ignore-image-name", "--platform=linux/amd64,linux/arm64", APP_1, APP_2],
    );
    assert_eq!(code(outcome), 1);
}

#[test]
fn test_unavailable_platform_carries_hint() {
    let image = TestImage::new("2024-01-01T00:00:00Z", vec![base_files()]);
    let mut layout = TestLayout::new();
    layout.add_index(APP_1, &[("linux", "s390x")], &image);
    layout.add_index(APP_2, &[("linux", "s390x")], &TestImage::new("2025-01-01T00:00:00Z", vec![]));

    let outcome = run_diff(&layout, &["--platform=linux/amd64", APP_1, APP_2]);
    let ExecutionOutcome::Failed(err) = outcome else {
        panic!("expected failure");
    };
    assert!(err.is_unavailable());
    assert!(failure_message(&err)
        .ends_with("(Hint: specify `--platform` explicitly, e.g., `--platform=linux/amd64`)"));
}

#[test]
fn test_missing_image() {
    let mut layout = TestLayout::new();
    layout.add_image(APP_1, &TestImage::new("2024-01-01T00:00:00Z", vec![]));

    let outcome = run_diff(&layout, &["--pull=never", APP_1, "localhost/absent:1"]);
    assert!(matches!(
        outcome,
        ExecutionOutcome::Failed(Error::Acquisition(AcquisitionError::NotFound(_)))
    ));

    let outcome = run_diff(&layout, &[APP_1, "localhost/absent:1"]);
    assert!(matches!(
        outcome,
        ExecutionOutcome::Failed(Error::Acquisition(AcquisitionError::PullUnsupported { .. }))
    ));
}

#[test]
fn test_invalid_pull_mode() {
    let mut layout = TestLayout::new();
    layout.add_image(APP_1, &TestImage::new("2024-01-01T00:00:00Z", vec![]));

    let outcome = run_diff(&layout, &["--pull=sometimes", APP_1, APP_1]);
    assert!(matches!(
        outcome,
        ExecutionOutcome::Failed(Error::Acquisition(AcquisitionError::InvalidPullMode(_)))
    ));
    assert_eq!(outcome.exit_code(), 2);
}

#[test]
fn test_configuration_errors_fail_before_acquisition() {
    let layout = TestLayout::new();

    let outcome = run_diff(&layout, &["--max-scale=0", "localhost/a:1", "localhost/b:1"]);
    assert!(matches!(outcome, ExecutionOutcome::Failed(Error::Configuration(_))));

    let outcome = run_diff(
        &layout,
        &["--report-dir=~nobody/x", "localhost/a:1", "localhost/b:1"],
    );
    assert!(matches!(outcome, ExecutionOutcome::Failed(Error::PathExpansion { .. })));

    let outcome = run_diff(
        &layout,
        &["--platform=linux/amd64/v2/extra", "localhost/a:1", "localhost/b:1"],
    );
    assert!(matches!(outcome, ExecutionOutcome::Failed(Error::Platform(_))));
}

#[test]
fn test_small_max_scale_rejects_layers() {
    let layout = layout_with(
        TestImage::new("2024-01-01T00:00:00Z", vec![base_files()]),
        TestImage::new("2024-01-01T00:00:00Z", vec![vec![TestFile::new("a", "b")]]),
    );

    let outcome = run_diff(&layout, &["--max-scale=0.0000000001", APP_1, APP_2]);
    assert!(matches!(
        outcome,
        ExecutionOutcome::Failed(Error::Comparison(ComparisonError::Store(_)))
    ));
}

#[test]
fn test_huge_manifest_size_fails_cleanly() {
    let mut layout = TestLayout::new();
    layout.add_image(APP_1, &TestImage::new("2024-01-01T00:00:00Z", vec![base_files()]));
    let mut desc = layout.manifest(&TestImage::new("2025-01-01T00:00:00Z", vec![base_files()]));
    desc["size"] = json!(1u64 << 50);
    layout.add_entry(APP_2, desc);

    let outcome = run_diff(&layout, &["--max-scale=1e12", APP_1, APP_2]);
    assert!(matches!(
        outcome,
        ExecutionOutcome::Failed(Error::Comparison(ComparisonError::Store(
            StoreError::SizeMismatch { .. }
        )))
    ));
    assert_eq!(outcome.exit_code(), 2);
}

#[test]
fn test_cancelled_run_fails() {
    let mut layout = TestLayout::new();
    layout.add_image(APP_1, &TestImage::new("2024-01-01T00:00:00Z", vec![]));
    let ctx = Context::new();
    ctx.cancel();

    let outcome = run_diff_with(&ctx, &layout, &[APP_1, APP_1]);
    assert!(matches!(outcome, ExecutionOutcome::Failed(Error::Cancelled)));
    assert_eq!(outcome.exit_code(), 2);
}
