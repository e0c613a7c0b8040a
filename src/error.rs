//! Error types for option resolution, image acquisition and comparison.
//!
//! Every failure that can reach the end of a `diff` run is an [`Error`]. The
//! outcome interpreter maps all of them to exit status 2.

/// Result type alias for diffoci operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for a `diff` invocation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The flag registry and the code reading it disagree.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// A report path could not be expanded.
    #[error("invalid {flag} path {path:?}: {reason}")]
    PathExpansion {
        flag: &'static str,
        path: String,
        reason: String,
    },

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Comparison(#[from] ComparisonError),

    #[error("operation cancelled")]
    Cancelled,

    /// The backend holding the content store could not be opened.
    #[error("failed to open backend: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl Error {
    /// True when the comparison could not produce a result because no
    /// platform-specific content matched.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Comparison(ComparisonError::Unavailable(_)))
    }
}

/// Programmer-level errors: the flag registry is broken or a flag value is
/// outside what the configuration can represent.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("flag {0:?} is not registered")]
    UnregisteredFlag(&'static str),

    #[error("invalid max-scale {0}: must be a finite number greater than zero")]
    InvalidMaxScale(f64),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlatformError {
    #[error("invalid platform {spec:?}: {reason}")]
    Invalid { spec: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("invalid pull mode {0:?} (expected always|missing|never)")]
    InvalidPullMode(String),

    #[error("image {0:?} not found")]
    NotFound(String),

    #[error("cannot pull {reference:?}: {reason}")]
    PullUnsupported { reference: String, reason: String },

    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("image reference {reference:?} is ambiguous: {count} entries are tagged {tag:?}")]
    AmbiguousReference {
        reference: String,
        tag: String,
        count: usize,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures reading blobs from a content store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("blob {0} not found in content store")]
    NotFound(String),

    #[error("blob {digest} exceeds size limit: {size} > {limit} bytes")]
    TooLarge { digest: String, size: u64, limit: u64 },

    #[error("blob {digest} has size {actual}, descriptor says {expected}")]
    SizeMismatch {
        digest: String,
        expected: u64,
        actual: u64,
    },

    #[error("malformed digest {0:?}")]
    MalformedDigest(String),

    #[error("I/O error reading {target}: {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by a diff engine.
#[derive(Debug, thiserror::Error)]
pub enum ComparisonError {
    /// No content matched the requested platforms.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("malformed {what} {digest}: {reason}")]
    Malformed {
        what: &'static str,
        digest: String,
        reason: String,
    },

    #[error("unsupported media type {0:?}")]
    UnsupportedMediaType(String),

    #[error("failed to read layer {digest}: {source}")]
    Layer {
        digest: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}
