//! Quasi framework
//!
//! A [`QuasiFramework`] answers "would these bundles resolve if installed now, and if
//! not, why?" without touching the live framework. It overlays candidate bundles on a
//! [`ResolverState`] seeded with every bundle the real framework already holds.
//!
//! # Lifecycle
//!
//! 1. [`QuasiFramework::install`] adds candidates under synthetic ids
//! 2. [`QuasiFramework::resolve`] computes the dependency closure and classified failures
//! 3. [`QuasiFramework::commit`] installs candidates and closure into the real framework,
//!    starting the closure bundles that should start eagerly
//!
//! A commit is all-or-nothing: if any install or start fails, every bundle it installed
//! is uninstalled again and the original error is returned.
//!
//! One lock serialises install, resolve and commit on a planner.

use crate::calculator::DependencyCalculator;
use crate::detective::ResolutionFailureDetective;
use crate::framework::{BundleId, BundleState, FrameworkError, ModuleFramework};
use crate::repository::Repository;
use crate::resolver::{BundleDescription, ResolverError, ResolverErrorKind, ResolverState};
use crate::transform::{ReplaceManifest, TransformerScope};
use deploy_artifact::{BundleManifest, ExportedPackage, FragmentHost, ImportedPackage, Version, VersionRange};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Errors raised by the quasi framework
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuasiError {
    #[error("unable to read bundle at '{location}': manifest has no symbolic name")]
    MissingSymbolicName { location: String },

    #[error("unknown quasi bundle {0}")]
    UnknownBundle(BundleId),

    #[error("commit resolution failed: {}", describe(.0))]
    CommitResolution(Vec<QuasiResolutionFailure>),

    #[error("quasi framework has already been committed")]
    AlreadyCommitted,

    #[error(transparent)]
    Framework(#[from] FrameworkError),
}

fn describe(failures: &[QuasiResolutionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// View of one bundle in the quasi framework
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuasiBundle {
    id: BundleId,
    location: String,
    manifest: BundleManifest,
    resolved: bool,
    resident: bool,
    real_bundle: Option<BundleId>,
}

impl QuasiBundle {
    fn from_description(state: &ResolverState, description: &BundleDescription, real_bundle: Option<BundleId>) -> Self {
        Self {
            id: description.id(),
            location: description.location().to_string(),
            manifest: description.manifest().clone(),
            resolved: state.is_resolved(description.id()),
            resident: description.is_resident(),
            real_bundle: if description.is_resident() {
                Some(description.id())
            } else {
                real_bundle
            },
        }
    }

    /// Synthetic id, or the real id for bundles already in the framework
    #[inline]
    #[must_use]
    pub fn bundle_id(&self) -> BundleId {
        self.id
    }

    #[must_use]
    pub fn symbolic_name(&self) -> &str {
        self.manifest.symbolic_name().unwrap_or_default()
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> &Version {
        self.manifest.version()
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

    /// Resolution result as of the last resolve
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Whether the bundle already lives in the real framework
    #[inline]
    #[must_use]
    pub fn is_resident(&self) -> bool {
        self.resident
    }

    #[inline]
    #[must_use]
    pub fn fragment_host(&self) -> Option<&FragmentHost> {
        self.manifest.fragment_host()
    }

    #[inline]
    #[must_use]
    pub fn imports(&self) -> &[ImportedPackage] {
        self.manifest.imports()
    }

    #[inline]
    #[must_use]
    pub fn exports(&self) -> &[ExportedPackage] {
        self.manifest.exports()
    }

    /// Id in the real framework once committed
    #[inline]
    #[must_use]
    pub fn real_bundle_id(&self) -> Option<BundleId> {
        self.real_bundle
    }
}

impl fmt::Display for QuasiBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.symbolic_name(), self.version())
    }
}

/// Package constraint named by a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageConstraint {
    pub package: String,
    pub version_range: VersionRange,
    pub bundle_symbolic_name: Option<String>,
    pub bundle_version_range: VersionRange,
}

impl From<&ImportedPackage> for PackageConstraint {
    fn from(import: &ImportedPackage) -> Self {
        Self {
            package: import.name().to_string(),
            version_range: import.version_range().clone(),
            bundle_symbolic_name: import.bundle_symbolic_name().map(str::to_string),
            bundle_version_range: import.bundle_version_range().clone(),
        }
    }
}

/// Classification of a resolution failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// An import is unsatisfied because of a `uses` conflict
    PackageUsesConflict(PackageConstraint),
    /// A mandatory import has no provider
    MissingImport(PackageConstraint),
    /// Anything else; the description says what
    Generic,
}

/// Why one candidate bundle cannot resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuasiResolutionFailure {
    bundle: QuasiBundle,
    description: String,
    kind: FailureKind,
}

impl QuasiResolutionFailure {
    #[inline]
    #[must_use]
    pub fn bundle(&self) -> &QuasiBundle {
        &self.bundle
    }

    #[inline]
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &FailureKind {
        &self.kind
    }

    /// Constraint involved, for package failures
    #[must_use]
    pub fn constraint(&self) -> Option<&PackageConstraint> {
        match &self.kind {
            FailureKind::PackageUsesConflict(c) | FailureKind::MissingImport(c) => Some(c),
            FailureKind::Generic => None,
        }
    }
}

impl fmt::Display for QuasiResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FailureKind::PackageUsesConflict(c) => write!(
                f,
                "uses conflict in {}: package '{}' version '{}'",
                self.bundle, c.package, c.version_range
            ),
            FailureKind::MissingImport(c) => write!(
                f,
                "missing import in {}: package '{}' version '{}'",
                self.bundle, c.package, c.version_range
            ),
            FailureKind::Generic => write!(f, "{}: {}", self.bundle, self.description.trim_end()),
        }
    }
}

#[derive(Debug, Default)]
struct QuasiInner {
    state: ResolverState,
    installed: Vec<BundleId>,
    /// Repository bundles the last successful resolve added to `state`
    pulled: Vec<BundleId>,
    other_bundles: Option<Vec<BundleId>>,
    real_ids: HashMap<BundleId, BundleId>,
    committed: bool,
}

/// Speculative resolution planner over a live framework
pub struct QuasiFramework {
    framework: Arc<dyn ModuleFramework>,
    calculator: DependencyCalculator,
    detective: ResolutionFailureDetective,
    inner: Mutex<QuasiInner>,
}

impl QuasiFramework {
    /// Planner seeded with every bundle currently installed in `framework`
    #[must_use]
    pub fn new(framework: Arc<dyn ModuleFramework>, repository: Arc<dyn Repository>) -> Self {
        let mut state = ResolverState::new();
        for bundle in framework.bundles() {
            if bundle.state != BundleState::Uninstalled {
                state.add_bundle(BundleDescription::resident(bundle.id, bundle.location, bundle.manifest));
            }
        }
        let first_id = state.highest_bundle_id().map_or(BundleId(1), |id| BundleId(id.value() + 1));
        state.resolve();

        Self {
            framework,
            calculator: DependencyCalculator::new(repository, first_id),
            detective: ResolutionFailureDetective::new(),
            inner: Mutex::new(QuasiInner {
                state,
                ..QuasiInner::default()
            }),
        }
    }

    /// Add a candidate bundle under the next synthetic id
    ///
    /// # Errors
    /// Returns error if the manifest carries no symbolic name
    pub fn install(&self, location: &str, manifest: BundleManifest) -> Result<QuasiBundle, QuasiError> {
        if manifest.symbolic_name().is_none() {
            return Err(QuasiError::MissingSymbolicName {
                location: location.to_string(),
            });
        }

        let mut inner = self.inner.lock();
        let id = self.calculator.next_bundle_id();
        let description = BundleDescription::new(id, location, manifest);
        inner.state.add_bundle(description.clone());
        inner.installed.push(id);
        inner.other_bundles = None;
        tracing::debug!(bundle = %description, id = id.value(), location, "Installed quasi bundle");
        Ok(QuasiBundle::from_description(&inner.state, &description, None))
    }

    /// Every bundle in the overlay, resident ones first
    pub fn bundles(&self) -> Vec<QuasiBundle> {
        let inner = self.inner.lock();
        inner
            .state
            .bundles()
            .map(|d| QuasiBundle::from_description(&inner.state, d, inner.real_ids.get(&d.id()).copied()))
            .collect()
    }

    pub fn bundle(&self, id: BundleId) -> Option<QuasiBundle> {
        let inner = self.inner.lock();
        inner
            .state
            .bundle(id)
            .map(|d| QuasiBundle::from_description(&inner.state, d, inner.real_ids.get(&id).copied()))
    }

    pub fn bundle_by_name(&self, symbolic_name: &str, version: &Version) -> Option<QuasiBundle> {
        let inner = self.inner.lock();
        inner
            .state
            .bundle_by_name(symbolic_name, version)
            .map(|d| QuasiBundle::from_description(&inner.state, d, inner.real_ids.get(&d.id()).copied()))
    }

    /// Dependencies pulled from the repository by the last successful resolve
    ///
    /// Empty before any resolve, after an install and after a failed resolve.
    pub fn dependencies(&self) -> Vec<QuasiBundle> {
        let inner = self.inner.lock();
        inner
            .other_bundles
            .iter()
            .flatten()
            .filter_map(|id| inner.state.bundle(*id))
            .map(|d| QuasiBundle::from_description(&inner.state, d, inner.real_ids.get(&d.id()).copied()))
            .collect()
    }

    /// Compute the dependency closure and report why candidates fail to resolve
    ///
    /// An empty result means the candidates and their closure can be committed.
    pub fn resolve(&self) -> Vec<QuasiResolutionFailure> {
        let mut inner = self.inner.lock();
        self.resolve_locked(&mut inner)
    }

    /// Explain why one bundle does not resolve, without computing a closure
    ///
    /// # Errors
    /// Returns error if `id` is not part of the overlay
    pub fn diagnose(&self, id: BundleId) -> Result<Vec<QuasiResolutionFailure>, QuasiError> {
        let mut inner = self.inner.lock();
        if inner.state.bundle(id).is_none() {
            return Err(QuasiError::UnknownBundle(id));
        }
        inner.state.resolve();
        if inner.state.is_resolved(id) {
            return Ok(Vec::new());
        }
        Ok(self.failures_for(&inner, id))
    }

    /// Install candidates and closure into the real framework
    ///
    /// Resolves first if nothing was resolved since the last install.
    ///
    /// # Errors
    /// Returns [`QuasiError::CommitResolution`] if resolution fails, or the framework
    /// error that aborted the commit after everything it installed was uninstalled
    pub fn commit(&self) -> Result<(), QuasiError> {
        let mut inner = self.inner.lock();
        if inner.committed {
            return Err(QuasiError::AlreadyCommitted);
        }

        let other_bundles = match inner.other_bundles.clone() {
            Some(other) => other,
            None => {
                let failures = self.resolve_locked(&mut inner);
                if !failures.is_empty() {
                    return Err(QuasiError::CommitResolution(failures));
                }
                inner.other_bundles.clone().unwrap_or_default()
            }
        };

        let mut installed: Vec<BundleId> = Vec::new();
        match self.install_and_start(&mut inner, &other_bundles, &mut installed) {
            Ok(()) => {
                inner.committed = true;
                tracing::info!(
                    candidates = inner.installed.len(),
                    dependencies = other_bundles.len(),
                    "Committed quasi framework"
                );
                Ok(())
            }
            Err(error) => {
                for id in installed.iter().rev() {
                    if let Err(uninstall_error) = self.framework.uninstall(*id) {
                        tracing::error!(bundle = id.value(), error = %uninstall_error, "Uninstall during commit rollback failed");
                    }
                }
                inner.real_ids.clear();
                tracing::warn!(error = %error, rolled_back = installed.len(), "Commit failed");
                Err(QuasiError::Framework(error))
            }
        }
    }

    fn install_and_start(
        &self,
        inner: &mut QuasiInner,
        other_bundles: &[BundleId],
        installed: &mut Vec<BundleId>,
    ) -> Result<(), FrameworkError> {
        let candidates = inner.installed.clone();
        for quasi_id in &candidates {
            let Some(description) = inner.state.bundle(*quasi_id).cloned() else {
                continue;
            };
            let real = {
                let _scope = TransformerScope::push(Arc::new(ReplaceManifest(description.manifest().clone())));
                self.framework.install(description.location())?
            };
            installed.push(real);
            inner.real_ids.insert(*quasi_id, real);
        }

        let candidate_set: HashSet<BundleId> = candidates.into_iter().collect();
        let mut dependencies = Vec::new();
        for other in other_bundles.iter().filter(|id| !candidate_set.contains(id)) {
            let Some(description) = inner.state.bundle(*other).cloned() else {
                continue;
            };
            let real = self.framework.install(description.location())?;
            installed.push(real);
            inner.real_ids.insert(*other, real);
            dependencies.push((real, description));
        }

        for (real, description) in &dependencies {
            if !description.is_fragment() && description.manifest().activation_policy().is_none() {
                self.framework.start(*real)?;
            }
        }
        Ok(())
    }

    fn resolve_locked(&self, inner: &mut QuasiInner) -> Vec<QuasiResolutionFailure> {
        for id in std::mem::take(&mut inner.pulled) {
            inner.state.remove_bundle(id);
        }
        let before: HashSet<BundleId> = inner.state.bundles().map(BundleDescription::id).collect();

        let candidates = inner.installed.clone();
        let other = match self.calculator.calculate_dependencies(&mut inner.state, &candidates) {
            Ok(other) => other,
            Err(error) => {
                tracing::warn!(error = %error, "Unable to compute dependency closure");
                inner.state.resolve();
                Vec::new()
            }
        };
        let pulled: Vec<BundleId> = inner
            .state
            .bundles()
            .map(BundleDescription::id)
            .filter(|id| !before.contains(id))
            .collect();

        let mut failures = Vec::new();
        for id in &candidates {
            if !inner.state.is_resolved(*id) {
                failures.extend(self.failures_for(inner, *id));
            }
        }

        if failures.is_empty() {
            inner.pulled = pulled;
            inner.other_bundles = Some(other);
        } else {
            for id in pulled {
                inner.state.remove_bundle(id);
            }
            inner.state.resolve();
            inner.other_bundles = None;
        }
        failures
    }

    fn failures_for(&self, inner: &QuasiInner, id: BundleId) -> Vec<QuasiResolutionFailure> {
        let Some(description) = inner.state.bundle(id) else {
            return Vec::new();
        };
        let bundle = QuasiBundle::from_description(&inner.state, description, inner.real_ids.get(&id).copied());
        let (text, errors) = self.detective.generate_failure_description(&inner.state, id);
        classify(&bundle, &text, &errors)
    }
}

impl fmt::Debug for QuasiFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuasiFramework")
            .field("calculator", &self.calculator)
            .finish_non_exhaustive()
    }
}

fn classify(bundle: &QuasiBundle, description: &str, errors: &[ResolverError]) -> Vec<QuasiResolutionFailure> {
    let mut failures: Vec<QuasiResolutionFailure> = errors
        .iter()
        .filter_map(|error| {
            let constraint = PackageConstraint::from(error.constraint()?);
            let kind = match error.kind() {
                ResolverErrorKind::ImportPackageUsesConflict => {
                    tracing::debug!(package = %constraint.package, version = %constraint.version_range, "Uses conflict");
                    FailureKind::PackageUsesConflict(constraint)
                }
                ResolverErrorKind::MissingImportPackage => {
                    tracing::debug!(package = %constraint.package, version = %constraint.version_range, "Missing import");
                    FailureKind::MissingImport(constraint)
                }
                ResolverErrorKind::MissingFragmentHost => return None,
            };
            Some(QuasiResolutionFailure {
                bundle: bundle.clone(),
                description: description.to_string(),
                kind,
            })
        })
        .collect();

    if failures.is_empty() {
        failures.push(QuasiResolutionFailure {
            bundle: bundle.clone(),
            description: description.to_string(),
            kind: FailureKind::Generic,
        });
    }
    failures
}
