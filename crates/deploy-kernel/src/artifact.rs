//! Install artifacts
//!
//! An [`InstallArtifact`] is one deployable unit moving through the lifecycle. The
//! generic driver in this module owns the begin/do/end/fail shape of every operation;
//! the variant-specific work is delegated to a [`LifecycleHandler`].
//!
//! # Start
//!
//! `start(signal)` wraps the caller's signal before handing it to the handler:
//! - success moves the artifact to ACTIVE, then completes the caller's signal
//! - failure records START_FAILED, stops the artifact, then fails the caller's signal
//!
//! A synchronous error from the handler is returned instead; the caller's signal is then
//! never completed.
//!
//! # Tree
//!
//! Artifacts form an [`ArtifactTree`]. Each artifact keeps a weak link to the tree and
//! its own node so listeners can walk to its ancestors.

use crate::error::{DeploymentError, StorageError};
use crate::handlers::{PassiveLifecycle, PlanLifecycle};
use crate::monitor::{ArtifactStateMonitor, Cause, InstallArtifactLifecycleListener};
use crate::signal::{FailureCause, Signal, SignalOutcome};
use crate::state::ArtifactState;
use deploy_artifact::{
    ArtifactIdentity, BundleManifest, EventLogger, LogEvent, NodeId, Tree, TreeError, TracingEventLogger,
    Version, VersionRange,
};
use deploy_quasi::BundleId;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Tree of artifacts built for one deployment
pub type ArtifactTree = Tree<Arc<InstallArtifact>>;

/// Staged filesystem backing an artifact
#[cfg_attr(test, mockall::automock)]
pub trait ArtifactStorage: Send + Sync {
    /// Location of the artifact's staged content
    fn artifact_fs(&self) -> PathBuf;

    /// Bring the staged content up to date with its source
    ///
    /// # Errors
    /// Returns error if the content cannot be staged
    fn synchronize(&self) -> Result<(), StorageError>;

    /// Restore the content staged before the last synchronise
    ///
    /// # Errors
    /// Returns error if the previous content cannot be restored
    fn roll_back(&self) -> Result<(), StorageError>;

    /// Remove the staged content
    ///
    /// # Errors
    /// Returns error if the content cannot be removed
    fn delete(&self) -> Result<(), StorageError>;
}

/// Storage for artifacts with no staged content
#[derive(Debug, Clone, Default)]
pub struct DetachedStorage {
    path: PathBuf,
}

impl DetachedStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ArtifactStorage for DetachedStorage {
    fn artifact_fs(&self) -> PathBuf {
        self.path.clone()
    }

    fn synchronize(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn roll_back(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn delete(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Variant-specific lifecycle work
pub trait LifecycleHandler: Send + Sync {
    /// Start the artifact and complete `signal` once it is running
    ///
    /// # Errors
    /// Returns error if the start fails synchronously
    fn do_start(&self, artifact: &InstallArtifact, signal: Signal) -> Result<(), DeploymentError>;

    /// # Errors
    /// Returns error if the artifact cannot be stopped
    fn do_stop(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError>;

    /// # Errors
    /// Returns error if the artifact cannot be uninstalled
    fn do_uninstall(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError>;

    /// Apply freshly synchronised content; false if the refresh did not take
    ///
    /// # Errors
    /// Returns error if the refresh fails outright
    fn do_refresh(&self, artifact: &InstallArtifact) -> Result<bool, DeploymentError>;
}

/// Artifact a plan refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpecification {
    pub artifact_type: String,
    pub name: String,
    pub version_range: VersionRange,
}

impl ArtifactSpecification {
    #[must_use]
    pub fn new(artifact_type: impl Into<String>, name: impl Into<String>, version_range: VersionRange) -> Self {
        Self {
            artifact_type: artifact_type.into(),
            name: name.into(),
            version_range,
        }
    }
}

/// Bundle-specific artifact data
#[derive(Debug)]
pub struct BundleDescriptor {
    manifest: RwLock<BundleManifest>,
    bundle_id: Mutex<Option<BundleId>>,
}

impl BundleDescriptor {
    #[must_use]
    pub fn new(manifest: BundleManifest) -> Self {
        Self {
            manifest: RwLock::new(manifest),
            bundle_id: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn manifest(&self) -> BundleManifest {
        self.manifest.read().clone()
    }

    pub fn set_manifest(&self, manifest: BundleManifest) {
        *self.manifest.write() = manifest;
    }

    /// Id in the live framework, once committed
    #[must_use]
    pub fn bundle_id(&self) -> Option<BundleId> {
        *self.bundle_id.lock()
    }

    pub fn set_bundle_id(&self, id: BundleId) {
        *self.bundle_id.lock() = Some(id);
    }

    /// Forget the framework id, returning it
    pub fn clear_bundle_id(&self) -> Option<BundleId> {
        self.bundle_id.lock().take()
    }

    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.manifest.read().is_fragment()
    }
}

/// Plan-specific artifact data
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlanDescriptor {
    pub atomic: bool,
    pub scoped: bool,
    pub specifications: Vec<ArtifactSpecification>,
}

impl PlanDescriptor {
    #[must_use]
    pub fn new(atomic: bool, scoped: bool) -> Self {
        Self {
            atomic,
            scoped,
            specifications: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_specification(mut self, specification: ArtifactSpecification) -> Self {
        self.specifications.push(specification);
        self
    }
}

/// What kind of artifact this is
#[derive(Debug)]
pub enum ArtifactKind {
    Bundle(BundleDescriptor),
    Plan(PlanDescriptor),
    /// Leaf artifacts with no module-system presence, such as configuration
    Composite,
}

impl ArtifactKind {
    #[must_use]
    pub fn bundle(manifest: BundleManifest) -> Self {
        ArtifactKind::Bundle(BundleDescriptor::new(manifest))
    }

    #[must_use]
    pub fn plan(atomic: bool, scoped: bool) -> Self {
        ArtifactKind::Plan(PlanDescriptor::new(atomic, scoped))
    }
}

#[derive(Debug, Clone)]
struct TreeLink {
    tree: Weak<ArtifactTree>,
    node: NodeId,
}

/// One deployable unit and its lifecycle
pub struct InstallArtifact {
    identity: ArtifactIdentity,
    kind: ArtifactKind,
    repository_name: Option<String>,
    storage: Arc<dyn ArtifactStorage>,
    handler: Arc<dyn LifecycleHandler>,
    event_logger: Arc<dyn EventLogger>,
    monitor: ArtifactStateMonitor,
    properties: RwLock<IndexMap<String, String>>,
    deployment_properties: RwLock<IndexMap<String, String>>,
    refreshing: AtomicBool,
    tree: RwLock<Option<TreeLink>>,
}

impl InstallArtifact {
    #[must_use]
    pub fn builder(identity: ArtifactIdentity, kind: ArtifactKind) -> InstallArtifactBuilder {
        InstallArtifactBuilder::new(identity, kind)
    }

    #[inline]
    #[must_use]
    pub fn identity(&self) -> &ArtifactIdentity {
        &self.identity
    }

    #[inline]
    #[must_use]
    pub fn artifact_type(&self) -> &str {
        self.identity.artifact_type()
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.identity.name()
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> &Version {
        self.identity.version()
    }

    #[inline]
    #[must_use]
    pub fn scope_name(&self) -> Option<&str> {
        self.identity.scope_name()
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &ArtifactKind {
        &self.kind
    }

    #[must_use]
    pub fn as_bundle(&self) -> Option<&BundleDescriptor> {
        match &self.kind {
            ArtifactKind::Bundle(bundle) => Some(bundle),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_plan(&self) -> Option<&PlanDescriptor> {
        match &self.kind {
            ArtifactKind::Plan(plan) => Some(plan),
            _ => None,
        }
    }

    /// Whether this is a plan whose members start, stop and uninstall as one unit
    #[must_use]
    pub fn is_atomic(&self) -> bool {
        self.as_plan().is_some_and(|plan| plan.atomic)
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> ArtifactState {
        self.monitor.state()
    }

    #[must_use]
    pub fn repository_name(&self) -> Option<&str> {
        self.repository_name.as_deref()
    }

    #[must_use]
    pub fn artifact_fs(&self) -> PathBuf {
        self.storage.artifact_fs()
    }

    #[must_use]
    pub fn event_logger(&self) -> &Arc<dyn EventLogger> {
        &self.event_logger
    }

    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    pub fn add_listener(&self, listener: Arc<dyn InstallArtifactLifecycleListener>) {
        self.monitor.add_listener(listener);
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<String> {
        self.properties.read().get(name).cloned()
    }

    /// Set a property, returning the value it replaced
    pub fn set_property(&self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.properties.write().insert(name.into(), value.into())
    }

    #[must_use]
    pub fn property_names(&self) -> Vec<String> {
        self.properties.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn deployment_properties(&self) -> IndexMap<String, String> {
        self.deployment_properties.read().clone()
    }

    pub fn set_deployment_property(&self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.deployment_properties.write().insert(name.into(), value.into())
    }

    /// Link this artifact to its node in `tree`
    pub fn set_tree(&self, tree: &Arc<ArtifactTree>, node: NodeId) {
        *self.tree.write() = Some(TreeLink {
            tree: Arc::downgrade(tree),
            node,
        });
    }

    pub fn clear_tree(&self) {
        *self.tree.write() = None;
    }

    /// The tree this artifact belongs to and its node, while the tree is alive
    #[must_use]
    pub fn tree(&self) -> Option<(Arc<ArtifactTree>, NodeId)> {
        let link = self.tree.read().clone()?;
        let tree = link.tree.upgrade()?;
        tree.contains(link.node).then_some((tree, link.node))
    }

    #[must_use]
    pub fn parent(&self) -> Option<Arc<InstallArtifact>> {
        let (tree, node) = self.tree()?;
        tree.parent(node).and_then(|parent| tree.value(parent))
    }

    /// Ancestors, nearest first
    #[must_use]
    pub fn ancestors(&self) -> Vec<Arc<InstallArtifact>> {
        let Some((tree, node)) = self.tree() else {
            return Vec::new();
        };
        tree.ancestors(node).into_iter().filter_map(|id| tree.value(id)).collect()
    }

    #[must_use]
    pub fn children(&self) -> Vec<Arc<InstallArtifact>> {
        let Some((tree, node)) = self.tree() else {
            return Vec::new();
        };
        tree.children(node).into_iter().filter_map(|id| tree.value(id)).collect()
    }

    /// # Errors
    /// Returns error if the artifact cannot begin installing; the install is failed first
    pub fn begin_install(&self) -> Result<(), DeploymentError> {
        if let Err(error) = self.monitor.on_installing(self) {
            self.fail_install(Some(&error));
            return Err(error);
        }
        Ok(())
    }

    /// # Errors
    /// Returns error unless the artifact is installing
    pub fn end_install(&self) -> Result<(), DeploymentError> {
        self.monitor.on_installed(self)
    }

    pub fn fail_install(&self, cause: Option<Cause<'_>>) {
        if let Err(error) = self.monitor.on_install_failed(self, cause) {
            tracing::warn!(artifact = %self, error = %error, "Listener failed while failing install");
        }
    }

    /// # Errors
    /// Returns error unless the artifact is installed or failed to resolve
    pub fn begin_resolve(&self) -> Result<(), DeploymentError> {
        self.monitor.on_resolving(self)
    }

    /// # Errors
    /// Returns error unless the artifact is resolving
    pub fn end_resolve(&self) -> Result<(), DeploymentError> {
        self.monitor.on_resolved(self)
    }

    pub fn fail_resolve(&self, cause: Option<Cause<'_>>) {
        if let Err(error) = self.monitor.on_resolve_failed(self, cause) {
            tracing::warn!(artifact = %self, error = %error, "Listener failed while failing resolve");
        }
    }

    /// Start the artifact, completing `signal` when it is running or has failed
    ///
    /// The handler runs only if the artifact entered STARTING or a signal was supplied.
    ///
    /// # Errors
    /// Returns error if the artifact cannot start from its current state or the handler
    /// fails synchronously
    pub fn start(self: &Arc<Self>, signal: Option<Signal>) -> Result<(), DeploymentError> {
        let changed = self.monitor.on_starting(self)?;
        if !changed && signal.is_none() {
            return Ok(());
        }

        let caller = Arc::new(Mutex::new(signal));
        let wrapper = {
            let artifact = Arc::clone(self);
            let caller = Arc::clone(&caller);
            Signal::from_fn(move |outcome| artifact.complete_start(outcome, &caller))
        };

        if let Err(error) = self.handler.do_start(self, wrapper) {
            tracing::debug!(artifact = %self, error = %error, "Start failed synchronously");
            if let Err(listener_error) = self.monitor.on_start_failed(self, &error) {
                tracing::warn!(artifact = %self, error = %listener_error, "Listener failed while failing start");
            }
            drop(caller.lock().take());
            return Err(error);
        }
        Ok(())
    }

    /// Start without a completion signal
    ///
    /// # Errors
    /// See [`InstallArtifact::start`]
    pub fn start_detached(self: &Arc<Self>) -> Result<(), DeploymentError> {
        self.start(None)
    }

    fn complete_start(&self, outcome: SignalOutcome, caller: &Mutex<Option<Signal>>) {
        let outcome = match outcome {
            Ok(()) => self
                .monitor
                .on_started(self)
                .map_err(|error| Arc::new(error) as FailureCause),
            Err(cause) => Err(cause),
        };

        match outcome {
            Ok(()) => {
                let signal = caller.lock().take();
                if let Some(signal) = signal {
                    signal.succeed();
                }
            }
            Err(cause) => {
                if let Err(error) = self.monitor.on_start_failed(self, cause.as_ref()) {
                    tracing::error!(artifact = %self, error = %error, "Listener failed while failing start");
                }
                if let Err(error) = self.stop() {
                    tracing::error!(artifact = %self, error = %error, "Stop after failed start failed");
                }
                let signal = caller.lock().take();
                if let Some(signal) = signal {
                    signal.fail(cause);
                }
            }
        }
    }

    /// Stop the artifact; does nothing unless it is ACTIVE
    ///
    /// # Errors
    /// Returns error if the handler fails to stop it, after recording STOP_FAILED
    pub fn stop(&self) -> Result<(), DeploymentError> {
        if !self.monitor.on_stopping(self)? {
            return Ok(());
        }
        match self.handler.do_stop(self) {
            Ok(()) => self.monitor.on_stopped(self),
            Err(error) => {
                if let Err(listener_error) = self.monitor.on_stop_failed(self, &error) {
                    tracing::warn!(artifact = %self, error = %listener_error, "Listener failed while failing stop");
                }
                Err(error)
            }
        }
    }

    /// Uninstall the artifact, stopping it first if it is running
    ///
    /// Does nothing unless the artifact is starting, active, resolved or installed. A
    /// stopped artifact is back in RESOLVED once its stop completes. Staged storage is
    /// deleted whenever the uninstall itself ran.
    ///
    /// # Errors
    /// Returns error if the stop or the handler fails, after recording UNINSTALL_FAILED
    pub fn uninstall(&self) -> Result<(), DeploymentError> {
        let state = self.state();
        if !state.is_uninstallable() {
            tracing::debug!(artifact = %self, %state, "Uninstall ignored");
            return Ok(());
        }
        let _cleanup = Finally::new(|| {
            if let Err(error) = self.storage.delete() {
                tracing::warn!(artifact = %self, error = %error, "Failed to delete artifact storage");
            }
        });

        if matches!(state, ArtifactState::Active | ArtifactState::Starting) {
            self.stop()?;
        }
        self.monitor.on_uninstalling(self)?;
        match self.handler.do_uninstall(self) {
            Ok(()) => self.monitor.on_uninstalled(self),
            Err(error) => {
                if let Err(listener_error) = self.monitor.on_uninstall_failed(self, &error) {
                    tracing::warn!(artifact = %self, error = %listener_error, "Listener failed while failing uninstall");
                }
                Err(error)
            }
        }
    }

    /// Re-stage the artifact's content and apply it
    ///
    /// On a refresh that does not take, staged storage is rolled back.
    ///
    /// # Errors
    /// Returns error if storage cannot be synchronised or rolled back, or the handler fails
    pub fn refresh(&self) -> Result<bool, DeploymentError> {
        self.refreshing.store(true, Ordering::SeqCst);
        let _cleanup = Finally::new(|| self.refreshing.store(false, Ordering::SeqCst));

        self.log_event(LogEvent::Refreshing, None);
        let outcome = self
            .storage
            .synchronize()
            .map_err(DeploymentError::from)
            .and_then(|()| self.handler.do_refresh(self));

        match outcome {
            Ok(true) => {
                self.log_event(LogEvent::Refreshed, None);
                Ok(true)
            }
            Ok(false) => {
                let rolled_back = self.storage.roll_back();
                self.log_event(LogEvent::RefreshFailed, None);
                rolled_back?;
                Ok(false)
            }
            Err(error) => {
                self.log_event(LogEvent::RefreshFailed, Some(&error));
                Err(error)
            }
        }
    }

    fn log_event(&self, event: LogEvent, cause: Option<&DeploymentError>) {
        self.event_logger.log(
            event,
            cause.map(|c| c as &(dyn std::error::Error + 'static)),
            &[&self.artifact_type(), &self.name(), self.version()],
        );
    }
}

impl fmt::Display for InstallArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.identity, f)
    }
}

impl fmt::Debug for InstallArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallArtifact")
            .field("identity", &self.identity)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builder for [`InstallArtifact`]
pub struct InstallArtifactBuilder {
    identity: ArtifactIdentity,
    kind: ArtifactKind,
    repository_name: Option<String>,
    storage: Option<Arc<dyn ArtifactStorage>>,
    handler: Option<Arc<dyn LifecycleHandler>>,
    event_logger: Option<Arc<dyn EventLogger>>,
    listeners: Vec<Arc<dyn InstallArtifactLifecycleListener>>,
    properties: IndexMap<String, String>,
    deployment_properties: IndexMap<String, String>,
}

impl InstallArtifactBuilder {
    #[must_use]
    pub fn new(identity: ArtifactIdentity, kind: ArtifactKind) -> Self {
        Self {
            identity,
            kind,
            repository_name: None,
            storage: None,
            handler: None,
            event_logger: None,
            listeners: Vec::new(),
            properties: IndexMap::new(),
            deployment_properties: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn ArtifactStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn LifecycleHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    #[must_use]
    pub fn with_event_logger(mut self, event_logger: Arc<dyn EventLogger>) -> Self {
        self.event_logger = Some(event_logger);
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn InstallArtifactLifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    #[must_use]
    pub fn with_repository_name(mut self, name: impl Into<String>) -> Self {
        self.repository_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_deployment_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.deployment_properties.insert(name.into(), value.into());
        self
    }

    /// Plans default to [`PlanLifecycle`], everything else to [`PassiveLifecycle`]
    #[must_use]
    pub fn build(self) -> Arc<InstallArtifact> {
        let handler: Arc<dyn LifecycleHandler> = match self.handler {
            Some(handler) => handler,
            None if matches!(self.kind, ArtifactKind::Plan(_)) => Arc::new(PlanLifecycle),
            None => Arc::new(PassiveLifecycle),
        };
        let event_logger = self.event_logger.unwrap_or_else(|| Arc::new(TracingEventLogger));
        let monitor = ArtifactStateMonitor::new(Arc::clone(&event_logger));
        for listener in self.listeners {
            monitor.add_listener(listener);
        }

        Arc::new(InstallArtifact {
            identity: self.identity,
            kind: self.kind,
            repository_name: self.repository_name,
            storage: self.storage.unwrap_or_else(|| Arc::new(DetachedStorage::default())),
            handler,
            event_logger,
            monitor,
            properties: RwLock::new(self.properties),
            deployment_properties: RwLock::new(self.deployment_properties),
            refreshing: AtomicBool::new(false),
            tree: RwLock::new(None),
        })
    }
}

/// New tree rooted at `root`, linked back into the artifact
#[must_use]
pub fn artifact_tree(root: Arc<InstallArtifact>) -> Arc<ArtifactTree> {
    let tree = Arc::new(Tree::new(Arc::clone(&root)));
    root.set_tree(&tree, tree.root());
    tree
}

/// Append `child` below `parent` and link it into the tree
///
/// # Errors
/// Returns error if `parent` is not an attached node of `tree`
pub fn add_artifact(tree: &Arc<ArtifactTree>, parent: NodeId, child: Arc<InstallArtifact>) -> Result<NodeId, TreeError> {
    let node = tree.add_child(parent, Arc::clone(&child))?;
    child.set_tree(tree, node);
    Ok(node)
}

/// Copy `subtree` below `parent` and relink every copied artifact into `tree`
///
/// # Errors
/// Returns error if `parent` is not an attached node of `tree`, or `subtree` is `tree`
pub fn graft_artifacts(tree: &Arc<ArtifactTree>, parent: NodeId, subtree: &ArtifactTree) -> Result<NodeId, TreeError> {
    let grafted = tree.graft(parent, subtree)?;
    tree.visit(grafted, |node, artifact| {
        artifact.set_tree(tree, node);
        true
    });
    Ok(grafted)
}

/// Detach `child` and its subtree from `parent`, unlinking every artifact in it
///
/// # Errors
/// Returns error if `child` is not a child of `parent`
pub fn remove_artifact(tree: &Arc<ArtifactTree>, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
    let detached = tree.values(child);
    tree.remove_child(parent, child)?;
    for artifact in detached {
        artifact.clear_tree();
    }
    Ok(())
}

struct Finally<F: FnMut()> {
    action: F,
}

impl<F: FnMut()> Finally<F> {
    fn new(action: F) -> Self {
        Self { action }
    }
}

impl<F: FnMut()> Drop for Finally<F> {
    fn drop(&mut self) {
        (self.action)();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::failure_cause;
    use deploy_artifact::{MemoryEventLogger, BUNDLE_TYPE, PLAN_TYPE};
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        starts: AtomicUsize,
        stops: AtomicUsize,
        uninstalls: AtomicUsize,
        pending: Mutex<Vec<Signal>>,
        complete_immediately: bool,
        refresh_result: bool,
    }

    impl CountingHandler {
        fn new(complete_immediately: bool) -> Arc<Self> {
            Self::with_refresh(complete_immediately, true)
        }

        fn with_refresh(complete_immediately: bool, refresh_result: bool) -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                uninstalls: AtomicUsize::new(0),
                pending: Mutex::new(Vec::new()),
                complete_immediately,
                refresh_result,
            })
        }
    }

    impl LifecycleHandler for CountingHandler {
        fn do_start(&self, _artifact: &InstallArtifact, signal: Signal) -> Result<(), DeploymentError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.complete_immediately {
                signal.succeed();
            } else {
                self.pending.lock().push(signal);
            }
            Ok(())
        }

        fn do_stop(&self, _artifact: &InstallArtifact) -> Result<(), DeploymentError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn do_uninstall(&self, _artifact: &InstallArtifact) -> Result<(), DeploymentError> {
            self.uninstalls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn do_refresh(&self, _artifact: &InstallArtifact) -> Result<bool, DeploymentError> {
            Ok(self.refresh_result)
        }
    }

    fn identity(name: &str) -> ArtifactIdentity {
        ArtifactIdentity::new(BUNDLE_TYPE, name, Version::new(1, 0, 0))
    }

    fn installed(handler: Arc<CountingHandler>, storage: Arc<dyn ArtifactStorage>) -> Arc<InstallArtifact> {
        let artifact = InstallArtifact::builder(identity("a"), ArtifactKind::Composite)
            .with_handler(handler)
            .with_storage(storage)
            .with_event_logger(Arc::new(MemoryEventLogger::new()))
            .build();
        artifact.begin_install().unwrap();
        artifact.end_install().unwrap();
        artifact
    }

    fn quiet_storage() -> Arc<dyn ArtifactStorage> {
        Arc::new(DetachedStorage::default())
    }

    #[test]
    fn start_drives_caller_signal_after_active() {
        let handler = CountingHandler::new(true);
        let artifact = installed(handler.clone(), quiet_storage());
        let (signal, receiver) = Signal::channel();
        artifact.start(Some(signal)).unwrap();
        assert!(matches!(receiver.wait(), Some(Ok(()))));
        assert_eq!(artifact.state(), ArtifactState::Active);
        assert_eq!(handler.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_start_without_signal_does_nothing() {
        let handler = CountingHandler::new(false);
        let artifact = installed(handler.clone(), quiet_storage());
        artifact.start(None).unwrap();
        artifact.start(None).unwrap();
        assert_eq!(handler.starts.load(Ordering::SeqCst), 1);
        assert_eq!(artifact.state(), ArtifactState::Starting);
    }

    #[test]
    fn async_failure_stops_and_fails_caller() {
        let handler = CountingHandler::new(false);
        let artifact = installed(handler.clone(), quiet_storage());
        let (signal, receiver) = Signal::channel();
        artifact.start(Some(signal)).unwrap();
        let pending = handler.pending.lock().pop().unwrap();
        pending.fail(failure_cause("container refused"));
        let cause = receiver.wait().unwrap().unwrap_err();
        assert_eq!(cause.to_string(), "container refused");
        assert_eq!(artifact.state(), ArtifactState::StartFailed);
        assert_eq!(handler.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn signal_attached_to_active_artifact_succeeds() {
        let handler = CountingHandler::new(true);
        let artifact = installed(handler.clone(), quiet_storage());
        artifact.start(None).unwrap();
        let (signal, receiver) = Signal::channel();
        artifact.start(Some(signal)).unwrap();
        assert!(matches!(receiver.wait(), Some(Ok(()))));
        assert_eq!(handler.starts.load(Ordering::SeqCst), 2);
        assert_eq!(artifact.state(), ArtifactState::Active);
    }

    #[test]
    fn late_failure_never_leaves_artifact_active() {
        let handler = CountingHandler::new(true);
        let artifact = installed(handler.clone(), quiet_storage());
        artifact.start(None).unwrap();
        assert_eq!(artifact.state(), ArtifactState::Active);

        let caller = Mutex::new(None);
        artifact.complete_start(Err(failure_cause("late failure")), &caller);
        assert_eq!(artifact.state(), ArtifactState::Resolved);
        assert_eq!(handler.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_only_acts_on_active() {
        let handler = CountingHandler::new(false);
        let artifact = installed(handler.clone(), quiet_storage());
        artifact.stop().unwrap();
        artifact.start(None).unwrap();
        artifact.stop().unwrap();
        assert_eq!(handler.stops.load(Ordering::SeqCst), 0);
        assert_eq!(artifact.state(), ArtifactState::Starting);
    }

    #[test]
    fn uninstall_deletes_storage_once() {
        let mut storage = MockArtifactStorage::new();
        storage.expect_delete().times(1).returning(|| Ok(()));
        let handler = CountingHandler::new(true);
        let artifact = installed(handler.clone(), Arc::new(storage));
        artifact.start(None).unwrap();
        artifact.uninstall().unwrap();
        assert_eq!(artifact.state(), ArtifactState::Uninstalled);
        assert_eq!(handler.stops.load(Ordering::SeqCst), 1);
        artifact.uninstall().unwrap();
        assert_eq!(handler.uninstalls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn uninstall_of_failed_artifact_is_noop() {
        let mut storage = MockArtifactStorage::new();
        storage.expect_delete().times(0);
        let handler = CountingHandler::new(true);
        let artifact = InstallArtifact::builder(identity("b"), ArtifactKind::Composite)
            .with_handler(handler.clone())
            .with_storage(Arc::new(storage))
            .build();
        artifact.fail_install(None);
        artifact.uninstall().unwrap();
        assert_eq!(artifact.state(), ArtifactState::InstallFailed);
        assert_eq!(handler.uninstalls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn refresh_rolls_back_when_not_applied() {
        let mut storage = MockArtifactStorage::new();
        storage.expect_synchronize().times(1).returning(|| Ok(()));
        storage.expect_roll_back().times(1).returning(|| Ok(()));
        let logger = Arc::new(MemoryEventLogger::new());
        let handler = CountingHandler::with_refresh(true, false);
        let artifact = InstallArtifact::builder(identity("c"), ArtifactKind::Composite)
            .with_handler(handler)
            .with_storage(Arc::new(storage))
            .with_event_logger(logger.clone())
            .build();
        assert!(!artifact.refresh().unwrap());
        assert!(!artifact.is_refreshing());
        assert_eq!(logger.count(LogEvent::RefreshFailed), 1);
    }

    #[test]
    fn refresh_storage_failure_clears_flag() {
        let mut storage = MockArtifactStorage::new();
        storage
            .expect_synchronize()
            .returning(|| Err(StorageError::Io(std::io::Error::other("disk full"))));
        let artifact = InstallArtifact::builder(identity("d"), ArtifactKind::Composite)
            .with_storage(Arc::new(storage))
            .build();
        assert!(matches!(artifact.refresh(), Err(DeploymentError::Storage(_))));
        assert!(!artifact.is_refreshing());
    }

    #[test]
    fn properties_last_write_wins() {
        let artifact = InstallArtifact::builder(identity("e"), ArtifactKind::Composite)
            .with_property("owner", "ops")
            .build();
        assert_eq!(artifact.set_property("owner", "dev").as_deref(), Some("ops"));
        assert_eq!(artifact.property("owner").as_deref(), Some("dev"));
        assert_eq!(artifact.property_names(), vec!["owner"]);
    }

    #[test]
    fn tree_links_follow_structure() {
        let plan = InstallArtifact::builder(
            ArtifactIdentity::new(PLAN_TYPE, "p", Version::new(1, 0, 0)),
            ArtifactKind::plan(true, false),
        )
        .build();
        let child = InstallArtifact::builder(identity("x"), ArtifactKind::Composite).build();
        let tree = artifact_tree(plan.clone());
        let node = add_artifact(&tree, tree.root(), child.clone()).unwrap();
        assert!(Arc::ptr_eq(&child.parent().unwrap(), &plan));
        assert_eq!(plan.children().len(), 1);
        assert!(plan.is_atomic());

        remove_artifact(&tree, tree.root(), node).unwrap();
        assert!(child.parent().is_none());
        assert!(plan.children().is_empty());
    }

    #[test]
    fn display_is_identity() {
        let artifact = InstallArtifact::builder(identity("f"), ArtifactKind::Composite).build();
        assert_eq!(artifact.to_string(), identity("f").to_string());
    }
}
