//! Bundle repository interface
//!
//! The dependency calculator asks a [`Repository`] for bundles that could satisfy an
//! unsatisfied import. Candidate order is defined by the repository.

use deploy_artifact::{BundleManifest, ImportedPackage};

/// Errors raised while querying a repository
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("repository '{name}' is unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("repository query for '{package}' failed: {reason}")]
    Query { package: String, reason: String },
}

/// A bundle the repository can supply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleCandidate {
    location: String,
    manifest: BundleManifest,
}

impl BundleCandidate {
    #[must_use]
    pub fn new(location: impl Into<String>, manifest: BundleManifest) -> Self {
        Self {
            location: location.into(),
            manifest,
        }
    }

    #[inline]
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[inline]
    #[must_use]
    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    /// Whether this candidate exports a package satisfying `import`
    #[must_use]
    pub fn provides(&self, import: &ImportedPackage) -> bool {
        if let Some(required) = import.bundle_symbolic_name() {
            if self.manifest.symbolic_name() != Some(required)
                || !import.bundle_version_range().includes(self.manifest.version())
            {
                return false;
            }
        }
        self.manifest
            .exports()
            .iter()
            .any(|export| export.name() == import.name() && import.version_range().includes(export.version()))
    }
}

/// Source of bundles for dependency completion
pub trait Repository: Send + Sync {
    /// Candidates that may satisfy `import`, in preference order
    ///
    /// # Errors
    /// Returns error if the repository cannot be queried
    fn find_candidates(&self, import: &ImportedPackage) -> Result<Vec<BundleCandidate>, RepositoryError>;
}

/// Repository that never supplies anything
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyRepository;

impl Repository for EmptyRepository {
    fn find_candidates(&self, _import: &ImportedPackage) -> Result<Vec<BundleCandidate>, RepositoryError> {
        Ok(Vec::new())
    }
}
