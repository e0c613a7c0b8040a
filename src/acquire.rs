//! Resolves the two command-line image references, in order.

use log::{debug, info};
use oci_spec::image::Descriptor;
use std::fmt;
use std::str::FromStr;

use crate::backend::{Backend, ResolvedImage};
use crate::context::Context;
use crate::error::{AcquisitionError, Result};
use crate::platform::PlatformSpec;

/// Whether acquisition may fetch remote content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullMode {
    Always,
    /// Fetch only when the image is not available locally.
    #[default]
    Missing,
    Never,
}

impl FromStr for PullMode {
    type Err = AcquisitionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "always" => Ok(PullMode::Always),
            "missing" => Ok(PullMode::Missing),
            "never" => Ok(PullMode::Never),
            other => Err(AcquisitionError::InvalidPullMode(other.to_string())),
        }
    }
}

impl fmt::Display for PullMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PullMode::Always => "always",
            PullMode::Missing => "missing",
            PullMode::Never => "never",
        };
        f.write_str(s)
    }
}

/// The two images being compared. `left` is the first argument, `right` the
/// second, and the diff is always taken in that direction.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePair {
    pub left: ResolvedImage,
    pub right: ResolvedImage,
}

impl ImagePair {
    pub fn descriptors(&self) -> [&Descriptor; 2] {
        [&self.left.target, &self.right.target]
    }
}

pub struct ImageAcquirer<'a> {
    backend: &'a dyn Backend,
}

impl<'a> ImageAcquirer<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self { backend }
    }

    /// Resolves one reference according to `mode`.
    pub fn acquire(
        &self,
        ctx: &Context,
        reference: &str,
        platforms: &[PlatformSpec],
        mode: PullMode,
    ) -> Result<ResolvedImage> {
        ctx.check()?;
        let image = match mode {
            PullMode::Always => self.pull(ctx, reference, platforms)?,
            PullMode::Missing => match self.backend.lookup(reference)? {
                Some(image) => image,
                None => self.pull(ctx, reference, platforms)?,
            },
            PullMode::Never => self
                .backend
                .lookup(reference)?
                .ok_or_else(|| AcquisitionError::NotFound(reference.to_string()))?,
        };
        ctx.check()?;
        Ok(image)
    }

    /// Resolves both references sequentially. The first failure aborts
    /// without touching the second reference.
    pub fn acquire_pair(
        &self,
        ctx: &Context,
        references: [&str; 2],
        platforms: &[PlatformSpec],
        mode: PullMode,
    ) -> Result<ImagePair> {
        let left = self.acquire_logged(ctx, 0, references[0], platforms, mode)?;
        let right = self.acquire_logged(ctx, 1, references[1], platforms, mode)?;
        Ok(ImagePair { left, right })
    }

    fn acquire_logged(
        &self,
        ctx: &Context,
        index: usize,
        reference: &str,
        platforms: &[PlatformSpec],
        mode: PullMode,
    ) -> Result<ResolvedImage> {
        let image = self.acquire(ctx, reference, platforms, mode)?;
        debug!(
            "Input {}: Image {:?} ({})",
            index,
            image.name,
            image.target.digest()
        );
        Ok(image)
    }

    fn pull(
        &self,
        ctx: &Context,
        reference: &str,
        platforms: &[PlatformSpec],
    ) -> std::result::Result<ResolvedImage, AcquisitionError> {
        info!("Pulling {} using {} backend", reference, self.backend.name());
        self.backend.pull(ctx, reference, platforms)
    }
}
