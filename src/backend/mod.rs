//! Image storage backends.
//!
//! A [`Backend`] resolves image references to manifest descriptors, may fetch
//! missing images, and owns the [`ContentStore`] the diff engine reads blobs
//! from. One backend is opened per command and shared by image acquisition
//! and comparison.

pub mod layout;
pub mod naming;

use oci_spec::image::Descriptor;
use std::io::Read;

use crate::context::Context;
use crate::error::{AcquisitionError, StoreError};
use crate::platform::PlatformSpec;

pub use layout::{LayoutBackend, LayoutStore};
pub use naming::ImageReference;

/// An image reference resolved to the descriptor of its manifest or index.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedImage {
    /// Display name, usually the normalized reference.
    pub name: String,
    pub target: Descriptor,
}

const MAX_PREALLOCATION: u64 = 1 << 20;

/// Read access to content-addressed blobs.
pub trait ContentStore {
    /// Opens the blob described by `desc`.
    ///
    /// Fails with [`StoreError::TooLarge`] before opening when the descriptor
    /// size exceeds `limit`.
    fn open_blob(&self, desc: &Descriptor, limit: u64) -> Result<Box<dyn Read + '_>, StoreError>;

    /// Reads the whole blob and checks its length against the descriptor.
    ///
    /// At most one byte past the descriptor size is read, so an oversized
    /// blob is detected without loading it.
    fn read_blob(&self, desc: &Descriptor, limit: u64) -> Result<Vec<u8>, StoreError> {
        let reader = self.open_blob(desc, limit)?;
        let capacity = desc.size().min(MAX_PREALLOCATION) as usize;
        let mut buf = Vec::with_capacity(capacity);
        reader
            .take(desc.size().saturating_add(1))
            .read_to_end(&mut buf)
            .map_err(|source| StoreError::Io {
                target: desc.digest().to_string(),
                source,
            })?;

        if buf.len() as u64 != desc.size() {
            return Err(StoreError::SizeMismatch {
                digest: desc.digest().to_string(),
                expected: desc.size(),
                actual: buf.len() as u64,
            });
        }
        Ok(buf)
    }
}

pub trait Backend {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Resolves `reference` from local content only.
    fn lookup(&self, reference: &str) -> Result<Option<ResolvedImage>, AcquisitionError>;

    /// Fetches `reference` into the content store.
    fn pull(
        &self,
        ctx: &Context,
        reference: &str,
        platforms: &[PlatformSpec],
    ) -> Result<ResolvedImage, AcquisitionError>;

    fn content_store(&self) -> &dyn ContentStore;
}

/// Checks a descriptor size against a limit.
pub(crate) fn check_limit(desc: &Descriptor, limit: u64) -> Result<(), StoreError> {
    if desc.size() > limit {
        return Err(StoreError::TooLarge {
            digest: desc.digest().to_string(),
            size: desc.size(),
            limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemoryStore(Vec<u8>);

    impl ContentStore for MemoryStore {
        fn open_blob(
            &self,
            desc: &Descriptor,
            limit: u64,
        ) -> Result<Box<dyn Read + '_>, StoreError> {
            check_limit(desc, limit)?;
            Ok(Box::new(self.0.as_slice()))
        }
    }

    fn descriptor(size: u64) -> Descriptor {
        serde_json::from_value(serde_json::json!({
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": format!("sha256:{}", "a".repeat(64)),
            "size": size,
        }))
        .unwrap()
    }

    #[test]
    fn test_read_blob() {
        let store = MemoryStore(b"{}".to_vec());
        assert_eq!(store.read_blob(&descriptor(2), 64).unwrap(), b"{}");
    }

    #[test]
    fn test_huge_descriptor_size_is_a_mismatch() {
        let store = MemoryStore(b"{}".to_vec());
        let err = store.read_blob(&descriptor(1 << 50), u64::MAX).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SizeMismatch { expected, actual: 2, .. } if expected == 1 << 50
        ));
    }

    #[test]
    fn test_blob_longer_than_descriptor_stops_early() {
        let store = MemoryStore(vec![b'x'; 4096]);
        let err = store.read_blob(&descriptor(10), 64).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SizeMismatch { expected: 10, actual: 11, .. }
        ));
    }

    #[test]
    fn test_limit_is_checked_before_reading() {
        let store = MemoryStore(b"{}".to_vec());
        assert!(matches!(
            store.read_blob(&descriptor(2), 1),
            Err(StoreError::TooLarge { .. })
        ));
    }
}
