//! Deploy Artifact
//!
//! Building blocks shared by every layer of the deployment kernel:
//! - [`ArtifactIdentity`]: immutable type/name/version/scope tuple
//! - [`Version`] and [`VersionRange`]: manifest-style versions and intervals
//! - [`Tree`]: arena tree with stable [`NodeId`]s and parent back-references
//! - [`BundleManifest`]: typed manifest headers and the clause parser behind them
//! - [`EventLogger`]: coded diagnostic events shared by the lifecycle layers

#![allow(missing_docs)]

pub mod event;
pub mod header;
pub mod identity;
pub mod manifest;
pub mod tree;
pub mod version;

pub use event::{EventLogger, LogEvent, LoggedEvent, MemoryEventLogger, Severity, TracingEventLogger};
pub use header::{parse_clauses, Clause, HeaderError};
pub use identity::{ArtifactIdentity, BUNDLE_TYPE, CONFIGURATION_TYPE, PAR_TYPE, PLAN_TYPE};
pub use manifest::{
    BundleManifest, DynamicImport, ExportedPackage, FragmentHost, HeaderManifestProvider, ImportedPackage,
    ManifestError, ManifestProvider, Resolution,
};
pub use tree::{NodeId, Tree, TreeError};
pub use version::{Version, VersionError, VersionRange};
