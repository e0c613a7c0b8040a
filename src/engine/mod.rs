//! Diff engine interface and report tree.
//!
//! The orchestration layer calls [`DiffEngine::diff`] exactly once per run.
//! The engine answers with a [`DiffOutcome`] that can hold a report, an
//! error, or both; a report whose root has at least one child means the
//! images differ.

pub mod entries;
pub mod layers;
pub mod report;

use log::info;
use serde::Serialize;
use std::fmt;

use crate::acquire::ImagePair;
use crate::backend::ContentStore;
use crate::context::Context;
use crate::error::ComparisonError;
use crate::options::ComparisonConfig;
use crate::platform::PlatformMatcher;

pub use layers::LayerEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    ImageName,
    IndexLength,
    History,
    Config,
    LayerLength,
    FileLength,
    FileName,
    FileMissing,
    FileType,
    LinkTarget,
    Owner,
    Mode,
    Size,
    Content,
    Mtime,
    Atime,
    Ctime,
    TarFormat,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictKind::ImageName => "image-name",
            ConflictKind::IndexLength => "index-length",
            ConflictKind::History => "history",
            ConflictKind::Config => "config",
            ConflictKind::LayerLength => "layer-length",
            ConflictKind::FileLength => "file-length",
            ConflictKind::FileName => "file-name",
            ConflictKind::FileMissing => "file-missing",
            ConflictKind::FileType => "file-type",
            ConflictKind::LinkTarget => "link-target",
            ConflictKind::Owner => "owner",
            ConflictKind::Mode => "mode",
            ConflictKind::Size => "size",
            ConflictKind::Content => "content",
            ConflictKind::Mtime => "mtime",
            ConflictKind::Atime => "atime",
            ConflictKind::Ctime => "ctime",
            ConflictKind::TarFormat => "tar-format",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// Left and right values, `None` where a side has nothing to show.
    pub values: [Option<String>; 2],
}

/// A node of the comparison report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportNode {
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<Conflict>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ReportNode>,
}

impl ReportNode {
    pub fn root() -> Self {
        Self {
            context: "/".to_string(),
            conflict: None,
            children: Vec::new(),
        }
    }

    pub fn conflict(context: String, kind: ConflictKind, values: [Option<String>; 2]) -> Self {
        Self {
            context,
            conflict: Some(Conflict { kind, values }),
            children: Vec::new(),
        }
    }

    pub fn has_differences(&self) -> bool {
        !self.children.is_empty()
    }
}

/// What the engine returns. Both fields may be set at once, e.g. a partial
/// report cut short by a read failure.
#[derive(Debug, Default)]
pub struct DiffOutcome {
    pub report: Option<ReportNode>,
    pub error: Option<ComparisonError>,
}

/// How comparison progress is printed, chosen once from `--verbose`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventHandler {
    /// One line per conflict.
    #[default]
    Default,
    /// Conflicts with their values, plus every comparison step.
    Verbose,
}

impl EventHandler {
    pub fn enter(&self, context: &str) {
        if let EventHandler::Verbose = self {
            info!("Comparing {}", context);
        }
    }

    pub fn conflict(&self, node: &ReportNode) {
        let Some(conflict) = &node.conflict else {
            return;
        };
        match self {
            EventHandler::Default => info!("{}: {}", conflict.kind, node.context),
            EventHandler::Verbose => {
                let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "<none>".to_string());
                info!(
                    "{}: {} ({} vs {})",
                    conflict.kind,
                    node.context,
                    show(&conflict.values[0]),
                    show(&conflict.values[1])
                );
            }
        }
    }
}

/// The comparison collaborator.
pub trait DiffEngine {
    fn diff(
        &self,
        ctx: &Context,
        store: &dyn ContentStore,
        images: &ImagePair,
        platforms: &PlatformMatcher,
        config: &ComparisonConfig,
    ) -> DiffOutcome;
}
