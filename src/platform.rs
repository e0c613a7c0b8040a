//! Target platform selection.
//!
//! `--platform` values are parsed into [`PlatformSpec`]s (`os/arch[/variant]`,
//! or a lone os or arch completed from the host). A [`PlatformMatcher`]
//! accepts an image manifest whose platform matches any configured spec.

use oci_spec::image::Platform;
use std::fmt;
use std::str::FromStr;

use crate::error::PlatformError;

const KNOWN_OSES: &[&str] = &[
    "aix", "android", "darwin", "freebsd", "illumos", "ios", "linux", "netbsd", "openbsd",
    "plan9", "solaris", "wasip1", "windows",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSpec {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl PlatformSpec {
    pub fn new(os: &str, architecture: &str, variant: Option<&str>) -> Self {
        let (architecture, variant) = normalize_arch(architecture, variant);
        Self {
            os: normalize_os(os),
            architecture,
            variant,
        }
    }

    /// The platform this binary runs on.
    pub fn host() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH, None)
    }

    /// Whether an OCI platform descriptor satisfies this spec. A spec without
    /// a variant accepts any variant.
    pub fn matches(&self, platform: &Platform) -> bool {
        let other = PlatformSpec::new(
            &platform.os().to_string(),
            &platform.architecture().to_string(),
            platform.variant().as_deref(),
        );
        if self.os != other.os || self.architecture != other.architecture {
            return false;
        }
        match &self.variant {
            Some(variant) => other.variant.as_ref() == Some(variant),
            None => true,
        }
    }
}

impl fmt::Display for PlatformSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

impl FromStr for PlatformSpec {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| PlatformError::Invalid {
            spec: s.to_string(),
            reason: reason.to_string(),
        };

        let lowered = s.trim().to_lowercase();
        let parts: Vec<&str> = lowered.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty component"));
        }

        let host = PlatformSpec::host();
        match parts.as_slice() {
            [single] if KNOWN_OSES.contains(&normalize_os(single).as_str()) => {
                Ok(PlatformSpec::new(single, &host.architecture, host.variant.as_deref()))
            }
            [arch] => Ok(PlatformSpec::new(&host.os, arch, None)),
            [os, arch] => Ok(PlatformSpec::new(os, arch, None)),
            [os, arch, variant] => Ok(PlatformSpec::new(os, arch, Some(variant))),
            _ => Err(invalid("expected os/arch[/variant]")),
        }
    }
}

fn normalize_os(os: &str) -> String {
    match os.to_lowercase().as_str() {
        "macos" => "darwin".to_string(),
        other => other.to_string(),
    }
}

fn normalize_arch(arch: &str, variant: Option<&str>) -> (String, Option<String>) {
    let variant = variant.map(|v| v.to_lowercase()).filter(|v| !v.is_empty());
    match arch.to_lowercase().as_str() {
        "x86_64" | "x86-64" | "amd64" => ("amd64".to_string(), variant),
        "i386" | "i686" | "386" => ("386".to_string(), None),
        "aarch64" | "arm64" => {
            let variant = match variant.as_deref() {
                Some("8") | Some("v8") => None,
                _ => variant,
            };
            ("arm64".to_string(), variant)
        }
        "armhf" => ("arm".to_string(), Some("v7".to_string())),
        "armel" => ("arm".to_string(), Some("v6".to_string())),
        "arm" => {
            let variant = match variant.as_deref() {
                None | Some("7") => Some("v7".to_string()),
                Some("5") => Some("v5".to_string()),
                Some("6") => Some("v6".to_string()),
                Some("8") => Some("v8".to_string()),
                _ => variant,
            };
            ("arm".to_string(), variant)
        }
        other => (other.to_string(), variant),
    }
}

/// Parses `--platform` values; no values means the host platform.
pub fn parse_platform_flags(values: &[String]) -> Result<Vec<PlatformSpec>, PlatformError> {
    if values.is_empty() {
        return Ok(vec![PlatformSpec::host()]);
    }
    values.iter().map(|v| v.parse()).collect()
}

/// Formats specs as `[linux/amd64, linux/arm64]` for log lines.
pub fn format_slice(specs: &[PlatformSpec]) -> String {
    let joined = specs
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{}]", joined)
}

/// Accepts a manifest platform that matches any configured spec.
#[derive(Debug, Clone)]
pub struct PlatformMatcher {
    specs: Vec<PlatformSpec>,
}

impl PlatformMatcher {
    pub fn any(specs: Vec<PlatformSpec>) -> Result<Self, PlatformError> {
        if specs.is_empty() {
            return Err(PlatformError::Invalid {
                spec: String::new(),
                reason: "at least one platform is required".to_string(),
            });
        }
        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[PlatformSpec] {
        &self.specs
    }

    pub fn matches(&self, platform: &Platform) -> bool {
        self.specs.iter().any(|spec| spec.matches(platform))
    }
}
