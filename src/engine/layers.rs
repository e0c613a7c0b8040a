//! Layer-level diff engine.
//!
//! [`LayerEngine`] walks both images from the top descriptor down:
//! - index → the manifests accepted by the platform matcher,
//! - manifest → name annotation, config blob (history and the remaining
//!   fields), and the layer list,
//! - layer → the tar entries, compared header field by header field.
//!
//! Every difference becomes one child of the report root. Nothing is
//! unpacked to disk; layer blobs are streamed from the content store.

use log::{debug, warn};
use oci_spec::image::{Descriptor, ImageIndex, ImageManifest};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use super::entries::{canonical_path, extract_files, read_layer, TarEntry};
use super::report::{input_dir, write_reports};
use super::{ConflictKind, DiffEngine, DiffOutcome, ReportNode};
use crate::acquire::ImagePair;
use crate::backend::layout::{IMAGE_NAME_ANNOTATION, REF_NAME_ANNOTATION};
use crate::backend::ContentStore;
use crate::context::Context;
use crate::error::ComparisonError;
use crate::options::ComparisonConfig;
use crate::platform::{format_slice, PlatformMatcher};

/// Size limit for manifests, indexes and configs at `max-scale` 1.0.
pub const MAX_JSON_BLOB_SIZE: u64 = 64 << 20;
/// Size limit for layer blobs at `max-scale` 1.0.
pub const MAX_TAR_BLOB_SIZE: u64 = 4 << 30;

/// Mode bits that carry the file type rather than permissions.
const MODE_TYPE_BITS: u32 = !0o7777;
const MODE_PERMISSION_BITS: u32 = 0o777;

#[derive(Debug, Clone, Copy, Default)]
pub struct LayerEngine;

impl LayerEngine {
    pub fn new() -> Self {
        Self
    }
}

impl DiffEngine for LayerEngine {
    fn diff(
        &self,
        ctx: &Context,
        store: &dyn ContentStore,
        images: &ImagePair,
        platforms: &PlatformMatcher,
        config: &ComparisonConfig,
    ) -> DiffOutcome {
        let mut differ = Differ::new(ctx, store, platforms, config);
        let error = differ.diff_images(images).err();
        let report = differ.root;

        write_reports(&report, config);
        DiffOutcome {
            report: Some(report),
            error,
        }
    }
}

enum BlobKind {
    Index,
    Manifest,
    Other(String),
}

fn blob_kind(desc: &Descriptor) -> BlobKind {
    let media_type = desc.media_type().to_string();
    match media_type.as_str() {
        "application/vnd.oci.image.index.v1+json"
        | "application/vnd.docker.distribution.manifest.list.v2+json" => BlobKind::Index,
        "application/vnd.oci.image.manifest.v1+json"
        | "application/vnd.docker.distribution.manifest.v2+json" => BlobKind::Manifest,
        _ => BlobKind::Other(media_type),
    }
}

fn name_annotation(annotations: Option<&HashMap<String, String>>) -> Option<String> {
    let annotations = annotations?;
    annotations
        .get(IMAGE_NAME_ANNOTATION)
        .or_else(|| annotations.get(REF_NAME_ANNOTATION))
        .cloned()
}

struct Differ<'a> {
    ctx: &'a Context,
    store: &'a dyn ContentStore,
    platforms: &'a PlatformMatcher,
    config: &'a ComparisonConfig,
    ignore_files: BTreeSet<String>,
    root: ReportNode,
}

impl<'a> Differ<'a> {
    fn new(
        ctx: &'a Context,
        store: &'a dyn ContentStore,
        platforms: &'a PlatformMatcher,
        config: &'a ComparisonConfig,
    ) -> Self {
        let ignore_files = config
            .ignore_files
            .iter()
            .map(|p| {
                if config.canonical_paths {
                    canonical_path(p)
                } else {
                    p.clone()
                }
            })
            .collect();
        Self {
            ctx,
            store,
            platforms,
            config,
            ignore_files,
            root: ReportNode::root(),
        }
    }

    fn limit(&self, base: u64) -> u64 {
        (base as f64 * self.config.max_scale) as u64
    }

    fn record(
        &mut self,
        context: String,
        kind: ConflictKind,
        left: Option<String>,
        right: Option<String>,
    ) {
        let node = ReportNode::conflict(context, kind, [left, right]);
        self.config.event_handler.conflict(&node);
        self.root.children.push(node);
    }

    fn read_json<T: DeserializeOwned>(
        &self,
        desc: &Descriptor,
        what: &'static str,
    ) -> Result<T, ComparisonError> {
        self.ctx.check()?;
        let bytes = self.store.read_blob(desc, self.limit(MAX_JSON_BLOB_SIZE))?;
        serde_json::from_slice(&bytes).map_err(|e| ComparisonError::Malformed {
            what,
            digest: desc.digest().to_string(),
            reason: e.to_string(),
        })
    }

    fn diff_images(&mut self, images: &ImagePair) -> Result<(), ComparisonError> {
        let [left, right] = images.descriptors();
        self.config.event_handler.enter("images");

        if !self.config.ignore_image_name {
            let names = [
                name_annotation(left.annotations().as_ref()),
                name_annotation(right.annotations().as_ref()),
            ];
            if names[0] != names[1] {
                let [l, r] = names;
                self.record("image name".to_string(), ConflictKind::ImageName, l, r);
            }
        }

        if left.digest() == right.digest() {
            debug!("Both inputs share digest {}", left.digest());
            return Ok(());
        }

        let left_manifests = self.platform_manifests(left)?;
        let right_manifests = self.platform_manifests(right)?;
        if left_manifests.len() != right_manifests.len() {
            self.record(
                "index".to_string(),
                ConflictKind::IndexLength,
                Some(left_manifests.len().to_string()),
                Some(right_manifests.len().to_string()),
            );
        }

        for (i, (l, r)) in left_manifests.iter().zip(&right_manifests).enumerate() {
            let context = match l.platform() {
                Some(p) => format!("manifest {} ({}/{})", i, p.os(), p.architecture()),
                None => format!("manifest {}", i),
            };
            self.diff_manifests(&context, l, r)?;
        }
        Ok(())
    }

    fn platform_manifests(&self, desc: &Descriptor) -> Result<Vec<Descriptor>, ComparisonError> {
        match blob_kind(desc) {
            BlobKind::Manifest => Ok(vec![desc.clone()]),
            BlobKind::Index => {
                let index: ImageIndex = self.read_json(desc, "index")?;
                let manifests: Vec<Descriptor> = index
                    .manifests()
                    .iter()
                    .filter(|m| matches!(blob_kind(m), BlobKind::Manifest))
                    .filter(|m| m.platform().as_ref().is_some_and(|p| self.platforms.matches(p)))
                    .cloned()
                    .collect();
                if manifests.is_empty() {
                    return Err(ComparisonError::Unavailable(format!(
                        "no manifest in index {} matches platforms {}",
                        desc.digest(),
                        format_slice(self.platforms.specs())
                    )));
                }
                Ok(manifests)
            }
            BlobKind::Other(media_type) => Err(ComparisonError::UnsupportedMediaType(media_type)),
        }
    }

    fn diff_manifests(
        &mut self,
        context: &str,
        left: &Descriptor,
        right: &Descriptor,
    ) -> Result<(), ComparisonError> {
        self.config.event_handler.enter(context);
        if left.digest() == right.digest() {
            return Ok(());
        }

        let lm: ImageManifest = self.read_json(left, "manifest")?;
        let rm: ImageManifest = self.read_json(right, "manifest")?;

        if !self.config.ignore_image_name {
            let l = name_annotation(lm.annotations().as_ref());
            let r = name_annotation(rm.annotations().as_ref());
            if l != r {
                self.record(format!("{} image name", context), ConflictKind::ImageName, l, r);
            }
        }

        self.diff_configs(context, lm.config(), rm.config())?;

        let (ll, rl) = (lm.layers(), rm.layers());
        if ll.len() != rl.len() {
            self.record(
                format!("{} layers", context),
                ConflictKind::LayerLength,
                Some(ll.len().to_string()),
                Some(rl.len().to_string()),
            );
        }
        for (i, (l, r)) in ll.iter().zip(rl).enumerate() {
            self.diff_layers(&format!("{} layer {}", context, i), l, r)?;
        }
        Ok(())
    }

    fn normalize_config(&self, mut config: Value) -> (Value, Value) {
        let mut history = config
            .as_object_mut()
            .and_then(|obj| obj.remove("history"))
            .unwrap_or(Value::Null);
        if let Some(obj) = config.as_object_mut() {
            // Layer contents are compared directly.
            obj.remove("rootfs");
            if self.config.ignore_image_timestamps {
                obj.remove("created");
            }
        }
        if self.config.ignore_image_timestamps {
            if let Some(entries) = history.as_array_mut() {
                for entry in entries.iter_mut().filter_map(Value::as_object_mut) {
                    entry.remove("created");
                }
            }
        }
        (config, history)
    }

    fn diff_configs(
        &mut self,
        context: &str,
        left: &Descriptor,
        right: &Descriptor,
    ) -> Result<(), ComparisonError> {
        let context = format!("{} config", context);
        self.config.event_handler.enter(&context);
        if left.digest() == right.digest() {
            return Ok(());
        }

        let (lc, lh) = self.normalize_config(self.read_json(left, "config")?);
        let (rc, rh) = self.normalize_config(self.read_json(right, "config")?);

        if !self.config.ignore_history && lh != rh {
            let count = |h: &Value| h.as_array().map_or(0, Vec::len).to_string();
            self.record(
                format!("{} history", context),
                ConflictKind::History,
                Some(count(&lh)),
                Some(count(&rh)),
            );
        }

        let empty = serde_json::Map::new();
        let lo = lc.as_object().unwrap_or(&empty);
        let ro = rc.as_object().unwrap_or(&empty);
        let keys: BTreeSet<&String> = lo.keys().chain(ro.keys()).collect();
        for key in keys {
            let (l, r) = (lo.get(key), ro.get(key));
            if l != r {
                self.record(
                    format!("{} {}", context, key),
                    ConflictKind::Config,
                    l.map(Value::to_string),
                    r.map(Value::to_string),
                );
            }
        }
        Ok(())
    }

    fn load_entries(&self, desc: &Descriptor) -> Result<Vec<TarEntry>, ComparisonError> {
        self.ctx.check()?;
        let digest = desc.digest().to_string();
        let media_type = desc.media_type().to_string();
        if media_type.contains("zstd") {
            return Err(ComparisonError::UnsupportedMediaType(media_type));
        }

        let reader = self.store.open_blob(desc, self.limit(MAX_TAR_BLOB_SIZE))?;
        let mut entries = read_layer(self.ctx, reader, &digest)?;
        if self.config.canonical_paths {
            for entry in &mut entries {
                entry.path = canonical_path(&entry.path);
            }
        }
        entries.retain(|e| !self.ignore_files.contains(&e.path));
        debug!("Layer {}: {} entries", digest, entries.len());
        Ok(entries)
    }

    fn diff_layers(
        &mut self,
        context: &str,
        left: &Descriptor,
        right: &Descriptor,
    ) -> Result<(), ComparisonError> {
        self.config.event_handler.enter(context);
        if left.digest() == right.digest() {
            return Ok(());
        }

        let le = self.load_entries(left)?;
        let re = self.load_entries(right)?;

        if le.len() != re.len() && !self.config.ignore_layer_length_mismatch {
            self.record(
                format!("{} files", context),
                ConflictKind::FileLength,
                Some(le.len().to_string()),
                Some(re.len().to_string()),
            );
        }

        // Paths worth dumping into the report directory, per side.
        let mut dump: [BTreeSet<String>; 2] = Default::default();
        if self.config.ignore_file_order {
            let lm: BTreeMap<&str, &TarEntry> = le.iter().map(|e| (e.path.as_str(), e)).collect();
            let rm: BTreeMap<&str, &TarEntry> = re.iter().map(|e| (e.path.as_str(), e)).collect();
            let paths: BTreeSet<&str> = lm.keys().chain(rm.keys()).copied().collect();
            for path in paths {
                match (lm.get(path), rm.get(path)) {
                    (Some(l), Some(r)) => {
                        if self.diff_entries(context, l, r) {
                            dump[0].insert(path.to_string());
                            dump[1].insert(path.to_string());
                        }
                    }
                    (l, r) => {
                        if self.config.ignore_layer_length_mismatch {
                            continue;
                        }
                        let present = |e: Option<&&TarEntry>| e.map(|_| "present".to_string());
                        self.record(
                            format!("{} {}", context, path),
                            ConflictKind::FileMissing,
                            present(l),
                            present(r),
                        );
                        let side = if l.is_some() { 0 } else { 1 };
                        dump[side].insert(path.to_string());
                    }
                }
            }
        } else {
            for (i, (l, r)) in le.iter().zip(&re).enumerate() {
                if l.path != r.path {
                    self.record(
                        format!("{} entry {}", context, i),
                        ConflictKind::FileName,
                        Some(l.path.clone()),
                        Some(r.path.clone()),
                    );
                    dump[0].insert(l.path.clone());
                    dump[1].insert(r.path.clone());
                    continue;
                }
                if self.diff_entries(context, l, r) {
                    dump[0].insert(l.path.clone());
                    dump[1].insert(r.path.clone());
                }
            }
        }

        if let Some(dir) = &self.config.report_dir {
            self.dump_files(dir, [left, right], &dump)?;
        }
        Ok(())
    }

    /// Copies both sides of the conflicting files of a layer pair into the
    /// report directory. Failures other than cancellation are only logged.
    fn dump_files(
        &self,
        report_dir: &Path,
        layers: [&Descriptor; 2],
        paths: &[BTreeSet<String>; 2],
    ) -> Result<(), ComparisonError> {
        for (side, (desc, wanted)) in layers.iter().zip(paths).enumerate() {
            if wanted.is_empty() {
                continue;
            }
            let dest = input_dir(report_dir, side);
            let digest = desc.digest().to_string();
            let result = self
                .store
                .open_blob(desc, self.limit(MAX_TAR_BLOB_SIZE))
                .map_err(ComparisonError::from)
                .and_then(|reader| {
                    let canonical = self.config.canonical_paths;
                    extract_files(self.ctx, reader, &digest, &dest, wanted, canonical)
                });
            match result {
                Ok(written) => {
                    debug!("Dumped {} files of {} to {}", written, digest, dest.display())
                }
                Err(ComparisonError::Cancelled) => return Err(ComparisonError::Cancelled),
                Err(e) => warn!("Failed to dump files of layer {}: {}", digest, e),
            }
        }
        Ok(())
    }

    /// Records every attribute conflict of two entries with the same path.
    /// Returns whether there was any.
    fn diff_entries(&mut self, context: &str, l: &TarEntry, r: &TarEntry) -> bool {
        let context = format!("{} {}", context, l.path);
        let config = self.config;
        let mut conflicts: Vec<(ConflictKind, String, String)> = Vec::new();
        let mut check = |kind: ConflictKind, lv: String, rv: String| {
            if lv != rv {
                conflicts.push((kind, lv, rv));
            }
        };

        check(ConflictKind::FileType, l.kind.to_string(), r.kind.to_string());
        check(
            ConflictKind::LinkTarget,
            l.link.clone().unwrap_or_default(),
            r.link.clone().unwrap_or_default(),
        );
        check(
            ConflictKind::Owner,
            format!("{}:{}", l.uid, l.gid),
            format!("{}:{}", r.uid, r.gid),
        );
        if !config.ignore_file_mode {
            let mut mask = u32::MAX;
            if config.ignore_file_permissions {
                mask &= !MODE_PERMISSION_BITS;
            }
            if config.ignore_file_mode_redundant_bits {
                mask &= !MODE_TYPE_BITS;
            }
            check(
                ConflictKind::Mode,
                format!("{:o}", l.mode & mask),
                format!("{:o}", r.mode & mask),
            );
        }
        check(ConflictKind::Size, l.size.to_string(), r.size.to_string());
        if !config.ignore_file_content && l.size == r.size {
            check(
                ConflictKind::Content,
                l.digest.clone().unwrap_or_default(),
                r.digest.clone().unwrap_or_default(),
            );
        }
        if !config.ignore_file_mtime {
            check(ConflictKind::Mtime, l.mtime.clone(), r.mtime.clone());
        }
        if !config.ignore_file_atime {
            check(
                ConflictKind::Atime,
                l.atime.clone().unwrap_or_default(),
                r.atime.clone().unwrap_or_default(),
            );
        }
        if !config.ignore_file_ctime {
            check(
                ConflictKind::Ctime,
                l.ctime.clone().unwrap_or_default(),
                r.ctime.clone().unwrap_or_default(),
            );
        }
        if !config.ignore_tar_format {
            check(
                ConflictKind::TarFormat,
                l.format.as_str().to_string(),
                r.format.as_str().to_string(),
            );
        }

        let found = !conflicts.is_empty();
        for (kind, lv, rv) in conflicts {
            self.record(context.clone(), kind, Some(lv), Some(rv));
        }
        found
    }
}
