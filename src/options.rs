//! Builds the immutable [`ComparisonConfig`] from resolved flags.

use log::warn;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::engine::EventHandler;
use crate::error::{ConfigurationError, Error, Result};
use crate::flags::{Flag, FlagSet};

/// Everything the diff engine needs to know about what to compare.
///
/// Built once per run by [`OptionsBuilder`] and only ever handed out by
/// shared reference afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonConfig {
    pub ignore_history: bool,
    pub ignore_file_order: bool,
    pub ignore_file_mode_redundant_bits: bool,
    pub ignore_file_mtime: bool,
    pub ignore_file_atime: bool,
    pub ignore_file_ctime: bool,
    pub ignore_file_permissions: bool,
    pub ignore_file_mode: bool,
    pub ignore_file_content: bool,
    pub ignore_layer_length_mismatch: bool,
    pub ignore_image_timestamps: bool,
    pub ignore_image_name: bool,
    pub ignore_tar_format: bool,
    pub canonical_paths: bool,
    /// Exact paths whose differences are never reported.
    pub ignore_files: BTreeSet<String>,
    /// Multiplier for the engine's blob size limits.
    pub max_scale: f64,
    pub report_file: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
    pub event_handler: EventHandler,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            ignore_history: false,
            ignore_file_order: false,
            ignore_file_mode_redundant_bits: false,
            ignore_file_mtime: false,
            ignore_file_atime: false,
            ignore_file_ctime: false,
            ignore_file_permissions: false,
            ignore_file_mode: false,
            ignore_file_content: false,
            ignore_layer_length_mismatch: false,
            ignore_image_timestamps: false,
            ignore_image_name: false,
            ignore_tar_format: false,
            canonical_paths: false,
            ignore_files: BTreeSet::new(),
            max_scale: 1.0,
            report_file: None,
            report_dir: None,
            event_handler: EventHandler::Default,
        }
    }
}

/// Assembles a [`ComparisonConfig`] from an alias-resolved [`FlagSet`] and the
/// non-boolean options.
pub struct OptionsBuilder<'a> {
    flags: &'a FlagSet,
    ignore_files: Vec<String>,
    report_file: String,
    report_dir: String,
    max_scale: f64,
}

impl<'a> OptionsBuilder<'a> {
    pub fn new(flags: &'a FlagSet) -> Self {
        Self {
            flags,
            ignore_files: Vec::new(),
            report_file: String::new(),
            report_dir: String::new(),
            max_scale: 1.0,
        }
    }

    pub fn ignore_files(mut self, files: &[String]) -> Self {
        self.ignore_files = files.to_vec();
        self
    }

    pub fn report_file(mut self, path: &str) -> Self {
        self.report_file = path.to_string();
        self
    }

    pub fn report_dir(mut self, path: &str) -> Self {
        self.report_dir = path.to_string();
        self
    }

    pub fn max_scale(mut self, scale: f64) -> Self {
        self.max_scale = scale;
        self
    }

    /// Reads every flag once. The first failure aborts the build.
    pub fn build(self) -> Result<ComparisonConfig> {
        let flags = self.flags;

        let report_file = if self.report_file.is_empty() {
            None
        } else {
            warn!("report-file is experimental. The file format is subject to change.");
            Some(expand_flag_path("report-file", &self.report_file)?)
        };
        let report_dir = if self.report_dir.is_empty() {
            None
        } else {
            Some(expand_flag_path("report-dir", &self.report_dir)?)
        };

        let event_handler = if flags.get(Flag::Verbose)? {
            EventHandler::Verbose
        } else {
            EventHandler::Default
        };

        if !self.max_scale.is_finite() || self.max_scale <= 0.0 {
            return Err(ConfigurationError::InvalidMaxScale(self.max_scale).into());
        }

        Ok(ComparisonConfig {
            ignore_history: flags.get(Flag::IgnoreHistory)?,
            ignore_file_order: flags.get(Flag::IgnoreFileOrder)?,
            ignore_file_mode_redundant_bits: flags.get(Flag::IgnoreFileModeRedundantBits)?,
            ignore_file_mtime: flags.get(Flag::IgnoreFileMtime)?,
            ignore_file_atime: flags.get(Flag::IgnoreFileAtime)?,
            ignore_file_ctime: flags.get(Flag::IgnoreFileCtime)?,
            ignore_file_permissions: flags.get(Flag::ExtraIgnoreFilePermissions)?,
            ignore_file_mode: flags.get(Flag::ExtraIgnoreFileMode)?,
            ignore_file_content: flags.get(Flag::ExtraIgnoreFileContent)?,
            ignore_layer_length_mismatch: flags.get(Flag::ExtraIgnoreLayerLengthMismatch)?,
            ignore_image_timestamps: flags.get(Flag::IgnoreImageTimestamps)?,
            ignore_image_name: flags.get(Flag::IgnoreImageName)?,
            ignore_tar_format: flags.get(Flag::IgnoreTarFormat)?,
            canonical_paths: flags.get(Flag::TreatCanonicalPathsEqual)?,
            ignore_files: self.ignore_files.into_iter().collect(),
            max_scale: self.max_scale,
            report_file,
            report_dir,
            event_handler,
        })
    }
}

fn expand_flag_path(flag: &'static str, path: &str) -> Result<PathBuf> {
    let home = dirs::home_dir();
    expand_local_path(path, home.as_deref()).map_err(|reason| Error::PathExpansion {
        flag,
        path: path.to_string(),
        reason,
    })
}

/// Expands `~` and `~/...` against `home` and makes the result absolute.
///
/// `~user` forms are rejected.
pub fn expand_local_path(path: &str, home: Option<&Path>) -> std::result::Result<PathBuf, String> {
    let expanded = if path == "~" || path.starts_with("~/") {
        let home = home.ok_or_else(|| "cannot determine the home directory".to_string())?;
        match path.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => home.to_path_buf(),
        }
    } else if path.starts_with('~') {
        return Err("expanding another user's home directory is not supported".to_string());
    } else {
        PathBuf::from(path)
    };

    if expanded.is_absolute() {
        return Ok(expanded);
    }
    let cwd = std::env::current_dir()
        .map_err(|e| format!("cannot determine the current directory: {}", e))?;
    Ok(cwd.join(expanded))
}
