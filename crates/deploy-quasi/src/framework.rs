//! Live module framework interface
//!
//! The kernel never talks to a module system directly. Everything it needs (installing,
//! starting, stopping and uninstalling bundles, reading their state and the export
//! registry) goes through [`ModuleFramework`].

use deploy_artifact::{BundleManifest, ExportedPackage};
use std::fmt;

/// Identifier of a bundle, real or synthetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleId(pub u64);

impl BundleId {
    #[inline]
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Framework-level bundle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleState {
    Installed,
    Resolved,
    Starting,
    Active,
    Stopping,
    Uninstalled,
}

/// Snapshot of a bundle known to the framework
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBundle {
    pub id: BundleId,
    pub location: String,
    pub manifest: BundleManifest,
    pub state: BundleState,
}

impl InstalledBundle {
    #[must_use]
    pub fn symbolic_name(&self) -> &str {
        self.manifest.symbolic_name().unwrap_or_default()
    }

    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.manifest.is_fragment()
    }
}

/// Errors reported by the module framework
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameworkError {
    #[error("unable to install bundle at '{location}': {reason}")]
    Install { location: String, reason: String },

    #[error("unknown bundle {0}")]
    UnknownBundle(BundleId),

    #[error("failed to start bundle {bundle}: {reason}")]
    Start { bundle: BundleId, reason: String },

    #[error("failed to stop bundle {bundle}: {reason}")]
    Stop { bundle: BundleId, reason: String },

    #[error("failed to update bundle {bundle}: {reason}")]
    Update { bundle: BundleId, reason: String },

    #[error("failed to uninstall bundle {bundle}: {reason}")]
    Uninstall { bundle: BundleId, reason: String },
}

/// The live module system
///
/// Implementations that read manifests from bundle locations must pass them through
/// [`crate::transform::transform_manifest`] so scoped manifest overrides take effect.
pub trait ModuleFramework: Send + Sync {
    /// Install the bundle found at `location`
    ///
    /// # Errors
    /// Returns error if the location cannot be read or installed
    fn install(&self, location: &str) -> Result<BundleId, FrameworkError>;

    /// Start a bundle
    ///
    /// # Errors
    /// Returns error if the bundle is unknown or fails to start
    fn start(&self, id: BundleId) -> Result<(), FrameworkError>;

    /// Stop a bundle
    ///
    /// # Errors
    /// Returns error if the bundle is unknown or fails to stop
    fn stop(&self, id: BundleId) -> Result<(), FrameworkError>;

    /// Re-read a bundle from its location
    ///
    /// # Errors
    /// Returns error if the bundle is unknown or the update fails
    fn update(&self, id: BundleId) -> Result<(), FrameworkError>;

    /// Uninstall a bundle
    ///
    /// # Errors
    /// Returns error if the bundle is unknown or refuses to uninstall
    fn uninstall(&self, id: BundleId) -> Result<(), FrameworkError>;

    /// Snapshot of one bundle
    fn bundle(&self, id: BundleId) -> Option<InstalledBundle>;

    /// Snapshots of every bundle not yet uninstalled, in id order
    fn bundles(&self) -> Vec<InstalledBundle>;

    /// Current state of a bundle
    fn state(&self, id: BundleId) -> Option<BundleState> {
        self.bundle(id).map(|bundle| bundle.state)
    }

    /// Export registry: every package exported by a resolved or active bundle,
    /// in registry order
    fn exported_packages(&self) -> Vec<ExportedPackage> {
        self.bundles()
            .into_iter()
            .filter(|bundle| !matches!(bundle.state, BundleState::Installed | BundleState::Uninstalled))
            .flat_map(|bundle| bundle.manifest.exports().to_vec())
            .collect()
    }
}
