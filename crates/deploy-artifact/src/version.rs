//! Artifact versions and version ranges
//!
//! Versions use the `major.minor.micro[.qualifier]` form found in bundle manifests.
//! Internally a [`Version`] wraps a [`semver::Version`] with the qualifier carried as
//! build metadata, so ordering compares the numeric parts first and the qualifier last.
//!
//! Ranges use interval notation: `[1.0, 2.0)` or a bare version meaning "at least".

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Errors raised while parsing versions and ranges
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Empty input where a version was required
    #[error("empty version")]
    Empty,

    /// A numeric segment could not be parsed
    #[error("invalid version segment '{segment}' in '{input}'")]
    InvalidSegment { input: String, segment: String },

    /// Qualifier contains characters that cannot be represented
    #[error("invalid version qualifier '{0}'")]
    InvalidQualifier(String),

    /// Range syntax is malformed
    #[error("invalid version range '{0}'")]
    InvalidRange(String),
}

/// A `major.minor.micro[.qualifier]` version
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(semver::Version);

impl Version {
    /// Create a version without qualifier
    #[inline]
    #[must_use]
    pub const fn new(major: u64, minor: u64, micro: u64) -> Self {
        Self(semver::Version::new(major, minor, micro))
    }

    /// The empty version `0.0.0`
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self::new(0, 0, 0)
    }

    /// Attach a qualifier
    ///
    /// # Errors
    /// Returns error if the qualifier is not made of `[0-9A-Za-z-]` dot-separated parts
    pub fn with_qualifier(mut self, qualifier: &str) -> Result<Self, VersionError> {
        self.0.build = semver::BuildMetadata::new(qualifier)
            .map_err(|_| VersionError::InvalidQualifier(qualifier.to_string()))?;
        Ok(self)
    }

    #[inline]
    #[must_use]
    pub fn major(&self) -> u64 {
        self.0.major
    }

    #[inline]
    #[must_use]
    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    #[inline]
    #[must_use]
    pub fn micro(&self) -> u64 {
        self.0.patch
    }

    /// Qualifier, if any
    #[must_use]
    pub fn qualifier(&self) -> Option<&str> {
        if self.0.build.is_empty() {
            None
        } else {
            Some(self.0.build.as_str())
        }
    }

    /// Access the underlying semantic version
    #[inline]
    #[must_use]
    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::empty()
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }

        let mut parts = trimmed.splitn(4, '.');
        let mut numbers = [0u64; 3];
        for slot in &mut numbers {
            match parts.next() {
                Some(segment) => {
                    *slot = segment.parse().map_err(|_| VersionError::InvalidSegment {
                        input: trimmed.to_string(),
                        segment: segment.to_string(),
                    })?;
                }
                None => break,
            }
        }

        let version = Version::new(numbers[0], numbers[1], numbers[2]);
        match parts.next() {
            Some(qualifier) if !qualifier.is_empty() => version.with_qualifier(qualifier),
            _ => Ok(version),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0.major, self.0.minor, self.0.patch)?;
        if let Some(qualifier) = self.qualifier() {
            write!(f, ".{qualifier}")?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A version interval
///
/// A range with no ceiling matches every version at or above its floor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    floor: Version,
    floor_inclusive: bool,
    ceiling: Option<Version>,
    ceiling_inclusive: bool,
}

impl VersionRange {
    /// Range matching every version
    #[must_use]
    pub fn unbounded() -> Self {
        Self::at_least(Version::empty())
    }

    /// Range matching `floor` and everything above it
    #[must_use]
    pub fn at_least(floor: Version) -> Self {
        Self {
            floor,
            floor_inclusive: true,
            ceiling: None,
            ceiling_inclusive: false,
        }
    }

    /// Range matching exactly one version
    #[must_use]
    pub fn exactly(version: Version) -> Self {
        Self {
            floor: version.clone(),
            floor_inclusive: true,
            ceiling: Some(version),
            ceiling_inclusive: true,
        }
    }

    /// Bounded interval
    #[must_use]
    pub fn between(
        floor: Version,
        floor_inclusive: bool,
        ceiling: Version,
        ceiling_inclusive: bool,
    ) -> Self {
        Self {
            floor,
            floor_inclusive,
            ceiling: Some(ceiling),
            ceiling_inclusive,
        }
    }

    #[inline]
    #[must_use]
    pub fn floor(&self) -> &Version {
        &self.floor
    }

    #[inline]
    #[must_use]
    pub fn ceiling(&self) -> Option<&Version> {
        self.ceiling.as_ref()
    }

    /// Whether `version` lies within this range
    #[must_use]
    pub fn includes(&self, version: &Version) -> bool {
        let above_floor = if self.floor_inclusive {
            version >= &self.floor
        } else {
            version > &self.floor
        };
        if !above_floor {
            return false;
        }
        match &self.ceiling {
            None => true,
            Some(ceiling) if self.ceiling_inclusive => version <= ceiling,
            Some(ceiling) => version < ceiling,
        }
    }

    /// Whether this range matches every version
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.ceiling.is_none() && self.floor == Version::empty() && self.floor_inclusive
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return Ok(Self::unbounded());
        }

        let first = trimmed.chars().next();
        if !matches!(first, Some('[' | '(')) {
            return Ok(Self::at_least(trimmed.parse()?));
        }

        let floor_inclusive = first == Some('[');
        let ceiling_inclusive = match trimmed.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(VersionError::InvalidRange(trimmed.to_string())),
        };

        let body = &trimmed[1..trimmed.len() - 1];
        let (floor, ceiling) = body
            .split_once(',')
            .ok_or_else(|| VersionError::InvalidRange(trimmed.to_string()))?;
        let floor: Version = floor.parse()?;
        let ceiling: Version = ceiling.parse()?;
        if ceiling < floor {
            return Err(VersionError::InvalidRange(trimmed.to_string()));
        }

        Ok(Self::between(floor, floor_inclusive, ceiling, ceiling_inclusive))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ceiling {
            None => write!(f, "{}", self.floor),
            Some(ceiling) => write!(
                f,
                "{}{}, {}{}",
                if self.floor_inclusive { '[' } else { '(' },
                self.floor,
                ceiling,
                if self.ceiling_inclusive { ']' } else { ')' }
            ),
        }
    }
}

impl Serialize for VersionRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
