//! Report output. The format is not stable.
//!
//! `--report-file` receives the report tree as JSON. `--report-dir` receives
//! the same JSON as `report.json` plus both sides of every conflicting file,
//! under `input-0/` and `input-1/`; the engine writes those while it walks the
//! layers.

use anyhow::{Context as _, Result};
use log::{debug, warn};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::ReportNode;
use crate::options::ComparisonConfig;

/// File name of the report inside `--report-dir`.
pub const REPORT_DIR_FILE: &str = "report.json";

/// Directory receiving the conflicting files of input `side` (0 or 1).
pub fn input_dir(report_dir: &Path, side: usize) -> PathBuf {
    report_dir.join(format!("input-{}", side))
}

/// Writes the report wherever the configuration asks for it.
///
/// Failures are logged and otherwise ignored; the exit status only reflects
/// the comparison.
pub fn write_reports(report: &ReportNode, config: &ComparisonConfig) {
    if let Some(path) = &config.report_file {
        if let Err(e) = write_report(report, path) {
            warn!("Failed to write report file: {:#}", e);
        }
    }
    if let Some(dir) = &config.report_dir {
        let result = fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory {}", dir.display()))
            .and_then(|_| write_report(report, &dir.join(REPORT_DIR_FILE)));
        if let Err(e) = result {
            warn!("Failed to write report directory: {:#}", e);
        }
    }
}

fn write_report(report: &ReportNode, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)
        .with_context(|| format!("Failed to serialize report to {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Wrote report to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConflictKind;
    use tempfile::tempdir;

    fn sample() -> ReportNode {
        let mut root = ReportNode::root();
        root.children.push(ReportNode::conflict(
            "manifest 0 layer 0 etc/motd".to_string(),
            ConflictKind::Content,
            [Some("sha256:aa".to_string()), Some("sha256:bb".to_string())],
        ));
        root
    }

    #[test]
    fn test_writes_report_file_and_dir() {
        let dir = tempdir().unwrap();
        let config = ComparisonConfig {
            report_file: Some(dir.path().join("nested/out.json")),
            report_dir: Some(dir.path().join("reports")),
            ..Default::default()
        };

        write_reports(&sample(), &config);

        let file: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join("nested/out.json")).unwrap())
                .unwrap();
        assert_eq!(file["children"][0]["conflict"]["kind"], "content");

        let in_dir = fs::read_to_string(dir.path().join("reports").join(REPORT_DIR_FILE)).unwrap();
        assert!(in_dir.contains("etc/motd"));
    }

    #[test]
    fn test_input_dir() {
        assert_eq!(
            input_dir(Path::new("/tmp/diff"), 1),
            PathBuf::from("/tmp/diff/input-1")
        );
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let config = ComparisonConfig {
            report_dir: Some(blocker.join("sub")),
            ..Default::default()
        };

        write_reports(&sample(), &config);
        assert!(!blocker.join("sub").exists());
    }
}
