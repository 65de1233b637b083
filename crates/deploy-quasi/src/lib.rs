//! Deploy Quasi
//!
//! Speculative dependency resolution for the deployment kernel.
//!
//! # Core Concepts
//!
//! - [`ModuleFramework`]: typed interface to the live module system
//! - [`ResolverState`]: in-memory overlay that decides which bundles resolve
//! - [`DependencyCalculator`]: pulls missing providers from a [`Repository`]
//! - [`QuasiFramework`]: install / resolve / diagnose / commit planner
//! - [`PackageImportWildcardExpander`]: expands `com.foo.*` style region imports
//!
//! # Example
//!
//! ```rust,ignore
//! let quasi = QuasiFramework::new(framework, repository);
//! quasi.install("bundles/shop-web.jar", manifest)?;
//! let failures = quasi.resolve();
//! if failures.is_empty() {
//!     quasi.commit()?;
//! }
//! ```

#![allow(missing_docs)]

pub mod calculator;
pub mod detective;
pub mod framework;
pub mod quasi;
pub mod repository;
pub mod resolver;
pub mod transform;
pub mod wildcard;

pub use calculator::{DependencyCalculator, UnsatisfiedDependencies};
pub use detective::ResolutionFailureDetective;
pub use framework::{BundleId, BundleState, FrameworkError, InstalledBundle, ModuleFramework};
pub use quasi::{FailureKind, PackageConstraint, QuasiBundle, QuasiError, QuasiFramework, QuasiResolutionFailure};
pub use repository::{BundleCandidate, EmptyRepository, Repository, RepositoryError};
pub use resolver::{BundleDescription, ResolverError, ResolverErrorKind, ResolverState, Wire};
pub use transform::{
    transform_manifest, ManifestTransformer, ManifestTransformerStack, ReplaceManifest, TransformerScope,
};
pub use wildcard::{PackageImportWildcardExpander, WILDCARD};
