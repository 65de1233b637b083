//! Testing utilities for the deployment kernel workspace
//!
//! Stub collaborators that record how they were called, plus artifact and manifest
//! fixtures.

#![allow(missing_docs)]

use deploy_artifact::{
    ArtifactIdentity, BundleManifest, ExportedPackage, ImportedPackage, Version, BUNDLE_TYPE, PLAN_TYPE,
};
use deploy_kernel::{
    add_artifact, artifact_tree, failure_cause, ArtifactKind, ArtifactStorage, ArtifactTree, Cause, DeploymentError,
    InstallArtifact, InstallArtifactLifecycleListener, LifecycleHandler, Signal, SignalOutcome, StorageError,
};
use deploy_quasi::{
    transform_manifest, BundleCandidate, BundleId, BundleState, FrameworkError, InstalledBundle, ModuleFramework,
    Repository, RepositoryError,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Manifests
// ---------------------------------------------------------------------------

/// Manifest at version 1.0.0 exporting and importing the given packages at 1.0.0
pub fn manifest(name: &str, exports: &[&str], imports: &[&str]) -> BundleManifest {
    let mut manifest = BundleManifest::new(name, Version::new(1, 0, 0));
    for export in exports {
        manifest = manifest.with_export(ExportedPackage::new(*export, Version::new(1, 0, 0)));
    }
    for import in imports {
        manifest = manifest.with_import(ImportedPackage::new(*import));
    }
    manifest
}

pub fn bundle_identity(name: &str) -> ArtifactIdentity {
    ArtifactIdentity::new(BUNDLE_TYPE, name, Version::new(1, 0, 0))
}

pub fn plan_identity(name: &str) -> ArtifactIdentity {
    ArtifactIdentity::new(PLAN_TYPE, name, Version::new(1, 0, 0))
}

// ---------------------------------------------------------------------------
// Framework
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FrameworkState {
    next_id: u64,
    bundles: BTreeMap<BundleId, InstalledBundle>,
    catalog: HashMap<String, BundleManifest>,
    failing_installs: HashSet<String>,
    failing_starts: HashSet<String>,
    installs: Vec<String>,
    starts: Vec<BundleId>,
    stops: Vec<BundleId>,
    updates: Vec<BundleId>,
    uninstalls: Vec<BundleId>,
}

/// In-memory module framework
///
/// Installs read the manifest registered for a location through
/// [`transform_manifest`], so scoped overrides apply. Installed bundles are RESOLVED
/// straight away; residents added with [`StubFramework::with_resident`] keep the state
/// they were given.
pub struct StubFramework {
    state: Mutex<FrameworkState>,
}

impl StubFramework {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FrameworkState {
                next_id: 1,
                ..FrameworkState::default()
            }),
        }
    }

    /// Make `manifest` readable at `location`
    #[must_use]
    pub fn with_location(self, location: &str, manifest: BundleManifest) -> Self {
        self.state.lock().catalog.insert(location.to_string(), manifest);
        self
    }

    /// Bundle already present before the test starts
    #[must_use]
    pub fn with_resident(self, location: &str, manifest: BundleManifest, state: BundleState) -> Self {
        {
            let mut inner = self.state.lock();
            let id = BundleId(inner.next_id);
            inner.next_id += 1;
            inner.bundles.insert(
                id,
                InstalledBundle {
                    id,
                    location: location.to_string(),
                    manifest,
                    state,
                },
            );
        }
        self
    }

    /// Fail every install of `location`
    #[must_use]
    pub fn failing_install_at(self, location: &str) -> Self {
        self.state.lock().failing_installs.insert(location.to_string());
        self
    }

    /// Fail every start of the bundle with this symbolic name
    #[must_use]
    pub fn failing_start_of(self, symbolic_name: &str) -> Self {
        self.state.lock().failing_starts.insert(symbolic_name.to_string());
        self
    }

    pub fn set_state(&self, id: BundleId, state: BundleState) {
        if let Some(bundle) = self.state.lock().bundles.get_mut(&id) {
            bundle.state = state;
        }
    }

    pub fn bundle_named(&self, symbolic_name: &str) -> Option<InstalledBundle> {
        self.state
            .lock()
            .bundles
            .values()
            .find(|bundle| bundle.symbolic_name() == symbolic_name && bundle.state != BundleState::Uninstalled)
            .cloned()
    }

    /// Locations installed, in call order, including failed attempts
    pub fn installs(&self) -> Vec<String> {
        self.state.lock().installs.clone()
    }

    pub fn starts(&self) -> Vec<BundleId> {
        self.state.lock().starts.clone()
    }

    pub fn stops(&self) -> Vec<BundleId> {
        self.state.lock().stops.clone()
    }

    pub fn updates(&self) -> Vec<BundleId> {
        self.state.lock().updates.clone()
    }

    pub fn uninstalls(&self) -> Vec<BundleId> {
        self.state.lock().uninstalls.clone()
    }

    fn with_bundle<R>(
        &self,
        id: BundleId,
        f: impl FnOnce(&mut InstalledBundle) -> Result<R, FrameworkError>,
    ) -> Result<R, FrameworkError> {
        let mut inner = self.state.lock();
        match inner.bundles.get_mut(&id) {
            Some(bundle) if bundle.state != BundleState::Uninstalled => f(bundle),
            _ => Err(FrameworkError::UnknownBundle(id)),
        }
    }
}

impl Default for StubFramework {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleFramework for StubFramework {
    fn install(&self, location: &str) -> Result<BundleId, FrameworkError> {
        let mut inner = self.state.lock();
        inner.installs.push(location.to_string());
        if inner.failing_installs.contains(location) {
            return Err(FrameworkError::Install {
                location: location.to_string(),
                reason: "install refused".to_string(),
            });
        }
        let manifest = transform_manifest(inner.catalog.get(location).cloned().unwrap_or_default());
        if manifest.symbolic_name().is_none() {
            return Err(FrameworkError::Install {
                location: location.to_string(),
                reason: "no bundle at location".to_string(),
            });
        }
        let id = BundleId(inner.next_id);
        inner.next_id += 1;
        inner.bundles.insert(
            id,
            InstalledBundle {
                id,
                location: location.to_string(),
                manifest,
                state: BundleState::Resolved,
            },
        );
        Ok(id)
    }

    fn start(&self, id: BundleId) -> Result<(), FrameworkError> {
        self.state.lock().starts.push(id);
        let failing = self.state.lock().failing_starts.clone();
        self.with_bundle(id, |bundle| {
            if failing.contains(bundle.symbolic_name()) {
                return Err(FrameworkError::Start {
                    bundle: id,
                    reason: "start refused".to_string(),
                });
            }
            if !bundle.is_fragment() {
                bundle.state = BundleState::Active;
            }
            Ok(())
        })
    }

    fn stop(&self, id: BundleId) -> Result<(), FrameworkError> {
        self.state.lock().stops.push(id);
        self.with_bundle(id, |bundle| {
            bundle.state = BundleState::Resolved;
            Ok(())
        })
    }

    fn update(&self, id: BundleId) -> Result<(), FrameworkError> {
        self.state.lock().updates.push(id);
        self.with_bundle(id, |_| Ok(()))
    }

    fn uninstall(&self, id: BundleId) -> Result<(), FrameworkError> {
        self.state.lock().uninstalls.push(id);
        self.with_bundle(id, |bundle| {
            bundle.state = BundleState::Uninstalled;
            Ok(())
        })
    }

    fn bundle(&self, id: BundleId) -> Option<InstalledBundle> {
        self.state.lock().bundles.get(&id).cloned()
    }

    fn bundles(&self) -> Vec<InstalledBundle> {
        self.state
            .lock()
            .bundles
            .values()
            .filter(|bundle| bundle.state != BundleState::Uninstalled)
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Repository answering from a fixed candidate list, recording every query
#[derive(Default)]
pub struct StubRepository {
    candidates: Vec<BundleCandidate>,
    queries: Mutex<Vec<String>>,
    unavailable: bool,
}

impl StubRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository whose every query fails
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_candidate(mut self, location: &str, manifest: BundleManifest) -> Self {
        self.candidates.push(BundleCandidate::new(location, manifest));
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

impl Repository for StubRepository {
    fn find_candidates(&self, import: &ImportedPackage) -> Result<Vec<BundleCandidate>, RepositoryError> {
        self.queries.lock().push(import.name().to_string());
        if self.unavailable {
            return Err(RepositoryError::Unavailable {
                name: "stub".to_string(),
                reason: "offline".to_string(),
            });
        }
        Ok(self.candidates.iter().filter(|c| c.provides(import)).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Storage that counts its calls
#[derive(Default)]
pub struct RecordingStorage {
    synchronizes: AtomicUsize,
    roll_backs: AtomicUsize,
    deletes: AtomicUsize,
    failing_synchronize: AtomicBool,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_synchronize(&self) {
        self.failing_synchronize.store(true, Ordering::SeqCst);
    }

    pub fn synchronizes(&self) -> usize {
        self.synchronizes.load(Ordering::SeqCst)
    }

    pub fn roll_backs(&self) -> usize {
        self.roll_backs.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl ArtifactStorage for RecordingStorage {
    fn artifact_fs(&self) -> PathBuf {
        PathBuf::from("staging/recorded")
    }

    fn synchronize(&self) -> Result<(), StorageError> {
        self.synchronizes.fetch_add(1, Ordering::SeqCst);
        if self.failing_synchronize.load(Ordering::SeqCst) {
            return Err(StorageError::Operation {
                operation: "synchronize",
                path: self.artifact_fs(),
                reason: "disk full".to_string(),
            });
        }
        Ok(())
    }

    fn roll_back(&self) -> Result<(), StorageError> {
        self.roll_backs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// How a [`RecordingHandler`] completes the start signals it receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Succeed inside `do_start`
    Immediate,
    /// Hold the signal until [`RecordingHandler::complete_pending`]
    Deferred,
    /// Return an error from `do_start`
    Refuse,
}

/// Lifecycle handler that counts calls and never touches other artifacts
pub struct RecordingHandler {
    mode: StartMode,
    starts: AtomicUsize,
    stops: AtomicUsize,
    uninstalls: AtomicUsize,
    refreshes: AtomicUsize,
    failing_stop: AtomicBool,
    pending: Mutex<Vec<Signal>>,
}

impl RecordingHandler {
    pub fn new(mode: StartMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            uninstalls: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            failing_stop: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn immediate() -> Arc<Self> {
        Self::new(StartMode::Immediate)
    }

    pub fn deferred() -> Arc<Self> {
        Self::new(StartMode::Deferred)
    }

    pub fn fail_stop(&self) {
        self.failing_stop.store(true, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn uninstalls(&self) -> usize {
        self.uninstalls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Complete every held signal with `outcome`, returning how many there were
    pub fn complete_pending(&self, outcome: &SignalOutcome) -> usize {
        let pending: Vec<Signal> = std::mem::take(&mut *self.pending.lock());
        let count = pending.len();
        for signal in pending {
            signal.complete(outcome.clone());
        }
        count
    }
}

impl LifecycleHandler for RecordingHandler {
    fn do_start(&self, artifact: &InstallArtifact, signal: Signal) -> Result<(), DeploymentError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            StartMode::Immediate => {
                signal.succeed();
                Ok(())
            }
            StartMode::Deferred => {
                self.pending.lock().push(signal);
                Ok(())
            }
            StartMode::Refuse => Err(DeploymentError::Operation {
                artifact: artifact.to_string(),
                operation: "start",
                reason: "refused".to_string(),
            }),
        }
    }

    fn do_stop(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.failing_stop.load(Ordering::SeqCst) {
            return Err(DeploymentError::Operation {
                artifact: artifact.to_string(),
                operation: "stop",
                reason: "refused".to_string(),
            });
        }
        Ok(())
    }

    fn do_uninstall(&self, _artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.uninstalls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn do_refresh(&self, _artifact: &InstallArtifact) -> Result<bool, DeploymentError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

/// Failure cause used by tests that fail a start asynchronously
pub fn container_failure() -> SignalOutcome {
    Err(failure_cause("container context failed"))
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Listener recording `(artifact name, hook)` for every notification
#[derive(Default)]
pub struct RecordingListener {
    calls: Mutex<Vec<(String, &'static str)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(String, &'static str)> {
        self.calls.lock().clone()
    }

    pub fn hooks_for(&self, name: &str) -> Vec<&'static str> {
        self.calls
            .lock()
            .iter()
            .filter(|(artifact, _)| artifact == name)
            .map(|(_, hook)| *hook)
            .collect()
    }

    fn record(&self, artifact: &InstallArtifact, hook: &'static str) -> Result<(), DeploymentError> {
        self.calls.lock().push((artifact.name().to_string(), hook));
        Ok(())
    }
}

impl InstallArtifactLifecycleListener for RecordingListener {
    fn on_installing(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.record(artifact, "installing")
    }

    fn on_install_failed(&self, artifact: &InstallArtifact, _cause: Option<Cause<'_>>) -> Result<(), DeploymentError> {
        self.record(artifact, "install_failed")
    }

    fn on_installed(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.record(artifact, "installed")
    }

    fn on_resolving(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.record(artifact, "resolving")
    }

    fn on_resolve_failed(&self, artifact: &InstallArtifact, _cause: Option<Cause<'_>>) -> Result<(), DeploymentError> {
        self.record(artifact, "resolve_failed")
    }

    fn on_resolved(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.record(artifact, "resolved")
    }

    fn on_starting(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.record(artifact, "starting")
    }

    fn on_start_failed(&self, artifact: &InstallArtifact, _cause: Cause<'_>) -> Result<(), DeploymentError> {
        self.record(artifact, "start_failed")
    }

    fn on_started(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.record(artifact, "started")
    }

    fn on_stopping(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.record(artifact, "stopping")
    }

    fn on_stop_failed(&self, artifact: &InstallArtifact, _cause: Cause<'_>) -> Result<(), DeploymentError> {
        self.record(artifact, "stop_failed")
    }

    fn on_stopped(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.record(artifact, "stopped")
    }

    fn on_uninstalling(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.record(artifact, "uninstalling")
    }

    fn on_uninstall_failed(&self, artifact: &InstallArtifact, _cause: Cause<'_>) -> Result<(), DeploymentError> {
        self.record(artifact, "uninstall_failed")
    }

    fn on_uninstalled(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.record(artifact, "uninstalled")
    }
}

// ---------------------------------------------------------------------------
// Artifacts and trees
// ---------------------------------------------------------------------------

/// Bundle artifact driven by `handler`
pub fn bundle_artifact(name: &str, handler: Arc<RecordingHandler>) -> Arc<InstallArtifact> {
    InstallArtifact::builder(
        bundle_identity(name),
        ArtifactKind::bundle(BundleManifest::new(name, Version::new(1, 0, 0))),
    )
    .with_handler(handler)
    .build()
}

/// Plan artifact driven by `handler`
pub fn plan_artifact(name: &str, atomic: bool, handler: Arc<RecordingHandler>) -> Arc<InstallArtifact> {
    InstallArtifact::builder(plan_identity(name), ArtifactKind::plan(atomic, false))
        .with_handler(handler)
        .build()
}

/// One link of a chain built by [`make_chain`]
pub struct ChainLink {
    pub artifact: Arc<InstallArtifact>,
    pub handler: Arc<RecordingHandler>,
}

/// Chain of plans ending in a bundle leaf
///
/// `atomic[i]` is the atomicity of the plan at depth `i`; the root is depth 0. The last
/// link returned is the leaf. Every handler succeeds immediately and none of them start
/// children, so only the lifecycle listeners move other artifacts.
pub fn make_chain(atomic: &[bool]) -> Result<(Arc<ArtifactTree>, Vec<ChainLink>), DeploymentError> {
    let mut links = Vec::with_capacity(atomic.len() + 1);
    for (depth, is_atomic) in atomic.iter().enumerate() {
        let handler = RecordingHandler::immediate();
        let artifact = plan_artifact(&format!("plan-{depth}"), *is_atomic, Arc::clone(&handler));
        links.push(ChainLink { artifact, handler });
    }
    let handler = RecordingHandler::immediate();
    links.push(ChainLink {
        artifact: bundle_artifact("leaf", Arc::clone(&handler)),
        handler,
    });

    let tree = artifact_tree(Arc::clone(&links[0].artifact));
    let mut parent = tree.root();
    for link in links.iter().skip(1) {
        parent = add_artifact(&tree, parent, Arc::clone(&link.artifact))?;
    }
    Ok((tree, links))
}

/// Drive every artifact of `tree` through install and resolve
pub fn install_and_resolve(tree: &ArtifactTree) -> Result<(), DeploymentError> {
    for artifact in tree.values(tree.root()) {
        artifact.begin_install()?;
        artifact.end_install()?;
        artifact.begin_resolve()?;
        artifact.end_resolve()?;
    }
    Ok(())
}
