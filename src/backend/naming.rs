use std::fmt;

use crate::error::AcquisitionError;

const DEFAULT_DOMAIN: &str = "docker.io";
const DEFAULT_TAG: &str = "latest";
const DIGEST_ALGORITHMS: &[&str] = &["sha256", "sha384", "sha512"];

/// A parsed image reference in the fully qualified form containerd stores
/// images under, e.g. `docker.io/library/alpine:3.18.2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Fully qualified repository; empty for a bare digest reference.
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parses and normalizes a user supplied reference.
    ///
    /// A missing domain becomes `docker.io`, single-component Docker Hub
    /// names gain `library/`, and a reference without tag or digest gets
    /// `latest`. A bare `sha256:<hex>` is taken as a digest reference.
    pub fn parse(reference: &str) -> Result<Self, AcquisitionError> {
        let invalid = |reason: &str| AcquisitionError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }
        if is_digest(reference) {
            return Ok(Self {
                name: String::new(),
                tag: None,
                digest: Some(reference.to_string()),
            });
        }

        let (remainder, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                if !is_digest(digest) {
                    return Err(invalid("malformed digest"));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to a port.
        let last_slash = remainder.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match remainder[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&remainder[..split], Some(remainder[split + 1..].to_string()))
            }
            None => (remainder, None),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("empty path component"));
        }
        if matches!(tag.as_deref(), Some("")) {
            return Err(invalid("empty tag"));
        }

        let name = qualify(repository);
        let path = name.split_once('/').map_or("", |(_, path)| path);
        if path.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid("repository name must be lowercase"));
        }

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag,
        };

        Ok(Self { name, tag, digest })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            if let Some(digest) = &self.digest {
                return write!(f, "{}", digest);
            }
        }
        write!(f, "{}", self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

fn qualify(repository: &str) -> String {
    let (first, rest) = match repository.split_once('/') {
        Some((first, rest)) => (first, Some(rest)),
        None => (repository, None),
    };
    let is_domain = first.contains('.') || first.contains(':') || first == "localhost";

    match rest {
        Some(_) if is_domain => repository.to_string(),
        Some(_) => format!("{}/{}", DEFAULT_DOMAIN, repository),
        None => format!("{}/library/{}", DEFAULT_DOMAIN, repository),
    }
}

fn is_digest(s: &str) -> bool {
    match s.split_once(':') {
        Some((algorithm, hex)) => {
            DIGEST_ALGORITHMS.contains(&algorithm)
                && hex.len() >= 32
                && hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        }
        None => false,
    }
}
