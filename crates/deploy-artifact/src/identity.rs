//! Artifact identity
//!
//! An [`ArtifactIdentity`] names a deployable artifact by type, name, version and
//! optional scope. It never changes after construction.

use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Artifact type of OSGi-style bundles
pub const BUNDLE_TYPE: &str = "bundle";

/// Artifact type of plans
pub const PLAN_TYPE: &str = "plan";

/// Artifact type of composite applications
pub const PAR_TYPE: &str = "par";

/// Artifact type of configuration artifacts
pub const CONFIGURATION_TYPE: &str = "configuration";

/// Immutable identity of an artifact
///
/// Equality and hashing use all four fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactIdentity {
    artifact_type: String,
    name: String,
    version: Version,
    scope_name: Option<String>,
}

impl ArtifactIdentity {
    /// Create an unscoped identity
    #[must_use]
    pub fn new(artifact_type: impl Into<String>, name: impl Into<String>, version: Version) -> Self {
        Self {
            artifact_type: artifact_type.into(),
            name: name.into(),
            version,
            scope_name: None,
        }
    }

    /// Create a scoped identity
    #[must_use]
    pub fn scoped(
        artifact_type: impl Into<String>,
        name: impl Into<String>,
        version: Version,
        scope_name: impl Into<String>,
    ) -> Self {
        Self {
            scope_name: Some(scope_name.into()),
            ..Self::new(artifact_type, name, version)
        }
    }

    #[inline]
    #[must_use]
    pub fn artifact_type(&self) -> &str {
        &self.artifact_type
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    #[inline]
    #[must_use]
    pub fn scope_name(&self) -> Option<&str> {
        self.scope_name.as_deref()
    }
}

impl fmt::Display for ArtifactIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scope) = &self.scope_name {
            write!(f, "{scope}:")?;
        }
        write!(f, "{}:{}:{}", self.artifact_type, self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equality_covers_scope() {
        let plain = ArtifactIdentity::new(BUNDLE_TYPE, "a", Version::new(1, 0, 0));
        let scoped = ArtifactIdentity::scoped(BUNDLE_TYPE, "a", Version::new(1, 0, 0), "app");
        assert_ne!(plain, scoped);

        let mut set = HashSet::new();
        set.insert(plain.clone());
        set.insert(plain.clone());
        set.insert(scoped);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn display_format() {
        let id = ArtifactIdentity::scoped(PLAN_TYPE, "shop", Version::new(2, 1, 0), "shop-scope");
        assert_eq!(id.to_string(), "shop-scope:plan:shop:2.1.0");
        let id = ArtifactIdentity::new(BUNDLE_TYPE, "b", Version::new(1, 0, 0));
        assert_eq!(id.to_string(), "bundle:b:1.0.0");
    }
}
