//! Backend over an on-disk OCI image layout.
//!
//! The layout directory holds an `oci-layout` marker, an `index.json` listing
//! the stored images, and content under `blobs/<algorithm>/<hex>`. Images are
//! found through the name annotations on the index entries, the way
//! containerd (`io.containerd.image.name`) and skopeo/buildkit
//! (`org.opencontainers.image.ref.name`) record them.

use anyhow::{anyhow, Context as _, Result};
use log::debug;
use oci_spec::image::{Descriptor, ImageIndex};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use super::{check_limit, Backend, ContentStore, ImageReference, ResolvedImage};
use crate::context::Context;
use crate::error::{AcquisitionError, StoreError};
use crate::platform::PlatformSpec;

pub const IMAGE_NAME_ANNOTATION: &str = "io.containerd.image.name";
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// Content store rooted at a layout's `blobs/` directory.
#[derive(Debug, Clone)]
pub struct LayoutStore {
    root: PathBuf,
}

impl LayoutStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Path of the blob for `digest` (`algorithm:hex`).
    pub fn blob_path(&self, digest: &str) -> Result<PathBuf, StoreError> {
        let (algorithm, hex) = digest
            .split_once(':')
            .ok_or_else(|| StoreError::MalformedDigest(digest.to_string()))?;
        let safe = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric());
        if !safe(algorithm) || !safe(hex) {
            return Err(StoreError::MalformedDigest(digest.to_string()));
        }
        Ok(self.root.join("blobs").join(algorithm).join(hex))
    }
}

impl ContentStore for LayoutStore {
    fn open_blob(&self, desc: &Descriptor, limit: u64) -> Result<Box<dyn Read + '_>, StoreError> {
        check_limit(desc, limit)?;
        let digest = desc.digest().to_string();
        let path = self.blob_path(&digest)?;
        let file = File::open(&path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => StoreError::NotFound(digest.clone()),
            _ => StoreError::Io {
                target: path.display().to_string(),
                source,
            },
        })?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Backend serving images that already live in an OCI layout directory.
///
/// It has no registry access, so pulling always fails.
pub struct LayoutBackend {
    root: PathBuf,
    index: ImageIndex,
    store: LayoutStore,
}

impl LayoutBackend {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        let marker = root.join("oci-layout");
        if !marker.is_file() {
            return Err(anyhow!(
                "{} is not an OCI image layout (missing oci-layout file)",
                root.display()
            ));
        }

        let index_path = root.join("index.json");
        let index = ImageIndex::from_file(&index_path)
            .with_context(|| format!("Failed to read {}", index_path.display()))?;
        debug!(
            "Opened OCI layout {} with {} index entries",
            root.display(),
            index.manifests().len()
        );

        Ok(Self {
            store: LayoutStore::new(&root),
            root,
            index,
        })
    }

    /// Name annotations of an index entry.
    fn names(desc: &Descriptor) -> impl Iterator<Item = &String> {
        let annotations = desc.annotations().as_ref();
        [IMAGE_NAME_ANNOTATION, REF_NAME_ANNOTATION]
            .into_iter()
            .filter_map(move |key| annotations.and_then(|a| a.get(key)))
    }

    /// True when an annotation names the same repository and tag.
    fn full_name_matches(name: &str, raw: &str, parsed: &ImageReference) -> bool {
        name == raw
            || name == parsed.to_string()
            || ImageReference::parse(name)
                .map(|n| n.name == parsed.name && n.tag == parsed.tag)
                .unwrap_or(false)
    }

    fn lookup_digest(&self, digest: &str, parsed: &ImageReference) -> Option<&Descriptor> {
        let mut candidates = self
            .index
            .manifests()
            .iter()
            .filter(|desc| desc.digest().to_string() == digest);
        if parsed.name.is_empty() {
            return candidates.next();
        }
        // The tag of the stored name does not matter once the digest matches.
        let repository_matches = |desc: &&Descriptor| {
            let mut names = Self::names(desc).peekable();
            names.peek().is_none()
                || names.any(|name| {
                    ImageReference::parse(name)
                        .map(|n| n.name == parsed.name)
                        .unwrap_or(false)
                })
        };
        candidates.find(repository_matches)
    }

    fn lookup_name(
        &self,
        raw: &str,
        parsed: &ImageReference,
    ) -> Result<Option<&Descriptor>, AcquisitionError> {
        let manifests = self.index.manifests();
        let exact = manifests
            .iter()
            .find(|desc| Self::names(desc).any(|name| Self::full_name_matches(name, raw, parsed)));
        if exact.is_some() {
            return Ok(exact);
        }

        // Entries annotated with a bare tag (`ref.name: 3.18`) carry no
        // repository, so they are only used when nothing matches by name.
        let Some(tag) = parsed.tag.as_deref() else {
            return Ok(None);
        };
        let tagged: Vec<&Descriptor> = manifests
            .iter()
            .filter(|desc| Self::names(desc).any(|name| name == tag))
            .collect();
        match tagged.as_slice() {
            [] => Ok(None),
            [desc] => Ok(Some(*desc)),
            _ => Err(AcquisitionError::AmbiguousReference {
                reference: raw.to_string(),
                tag: tag.to_string(),
                count: tagged.len(),
            }),
        }
    }
}

impl Backend for LayoutBackend {
    fn name(&self) -> &str {
        "oci-layout"
    }

    fn lookup(&self, reference: &str) -> Result<Option<ResolvedImage>, AcquisitionError> {
        let parsed = ImageReference::parse(reference)?;
        let found = match &parsed.digest {
            Some(digest) => self.lookup_digest(digest, &parsed),
            None => self.lookup_name(reference, &parsed)?,
        };

        Ok(found.map(|desc| ResolvedImage {
            name: parsed.to_string(),
            target: desc.clone(),
        }))
    }

    fn pull(
        &self,
        _ctx: &Context,
        reference: &str,
        _platforms: &[PlatformSpec],
    ) -> Result<ResolvedImage, AcquisitionError> {
        Err(AcquisitionError::PullUnsupported {
            reference: reference.to_string(),
            reason: format!(
                "the oci-layout backend at {} has no registry access; copy the image into the layout first",
                self.root.display()
            ),
        })
    }

    fn content_store(&self) -> &dyn ContentStore {
        &self.store
    }
}
