//! Semantic versions for markers, targets, and unit descriptors.
//!
//! Accepts `MAJOR.MINOR.PATCH` with optional pre-release and build
//! metadata, plus a single leading `v`. Precedence follows semver:
//! a pre-release sorts before its release, build metadata is ignored.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// A version string that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{value}' is not a valid semantic version: {reason}")]
pub struct VersionParseError {
    pub value: String,
    pub reason: String,
}

impl VersionParseError {
    fn new(value: &str, reason: impl Into<String>) -> Self {
        VersionParseError {
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// One dot-separated pre-release identifier.
///
/// Variant order matters: numeric identifiers have lower precedence than
/// alphanumeric ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum PreRelease {
    Numeric(u64),
    Alpha(String),
}

impl fmt::Display for PreRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreRelease::Numeric(n) => write!(f, "{}", n),
            PreRelease::Alpha(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pre: Vec<PreRelease>,
    build: Option<String>,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
            pre: Vec::new(),
            build: None,
        }
    }

    /// Parse a version as written in a unit descriptor file name.
    ///
    /// Descriptor names cannot carry dots ahead of the extension, so
    /// `v1_2_0` stands for `1.2.0`.
    pub fn from_descriptor(raw: &str) -> Result<Self, VersionParseError> {
        raw.replace('_', ".").parse()
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(VersionParseError::new(value, "version cannot be empty"));
        }
        let unprefixed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let (rest, build) = match unprefixed.split_once('+') {
            Some((rest, build)) => {
                if build.is_empty() {
                    return Err(VersionParseError::new(value, "empty build metadata"));
                }
                (rest, Some(build.to_string()))
            }
            None => (unprefixed, None),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionParseError::new(value, "expected MAJOR.MINOR.PATCH"));
        }
        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionParseError::new(
                    value,
                    format!("'{}' is not a non-negative integer", part),
                ));
            }
            *slot = part
                .parse()
                .map_err(|_| VersionParseError::new(value, format!("'{}' is too large", part)))?;
        }

        let pre = match pre {
            None => Vec::new(),
            Some(pre) => pre
                .split('.')
                .map(|ident| parse_prerelease(value, ident))
                .collect::<Result<Vec<_>, _>>()?,
        };

        Ok(Version {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre,
            build,
        })
    }
}

fn parse_prerelease(value: &str, ident: &str) -> Result<PreRelease, VersionParseError> {
    if ident.is_empty() {
        return Err(VersionParseError::new(value, "empty pre-release identifier"));
    }
    if !ident
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-')
    {
        return Err(VersionParseError::new(
            value,
            format!("invalid pre-release identifier '{}'", ident),
        ));
    }
    if ident.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = ident.parse() {
            return Ok(PreRelease::Numeric(n));
        }
    }
    Ok(PreRelease::Alpha(ident.to_string()))
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            let pre: Vec<String> = self.pre.iter().map(|p| p.to_string()).collect();
            write!(f, "-{}", pre.join("."))?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.pre.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}
