//! Per-artifact state monitor
//!
//! The monitor owns an artifact's [`ArtifactState`]. Each `on_*` method checks and sets
//! the state under the monitor's lock, then releases it before logging the event and
//! notifying lifecycle listeners. Listeners may therefore call back into the artifact,
//! or into other artifacts, without deadlocking.

use crate::artifact::InstallArtifact;
use crate::error::DeploymentError;
use crate::state::{transition_allowed, ArtifactState};
use deploy_artifact::{EventLogger, LogEvent};
use parking_lot::{Mutex, RwLock};
use std::error::Error;
use std::sync::Arc;

/// Failure cause passed to `*_failed` notifications
pub type Cause<'a> = &'a (dyn Error + Send + Sync + 'static);

/// Observer of artifact lifecycle transitions
///
/// Every method defaults to doing nothing. An error returned from a listener
/// propagates to whoever drove the transition.
#[allow(unused_variables)]
pub trait InstallArtifactLifecycleListener: Send + Sync {
    fn on_installing(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_install_failed(&self, artifact: &InstallArtifact, cause: Option<Cause<'_>>) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_installed(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_resolving(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_resolve_failed(&self, artifact: &InstallArtifact, cause: Option<Cause<'_>>) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_resolved(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_starting(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_start_failed(&self, artifact: &InstallArtifact, cause: Cause<'_>) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_started(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_stopping(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_stop_failed(&self, artifact: &InstallArtifact, cause: Cause<'_>) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_stopped(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_uninstalling(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_uninstall_failed(&self, artifact: &InstallArtifact, cause: Cause<'_>) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn on_uninstalled(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        Ok(())
    }
}

enum Step {
    Move(ArtifactState),
    Stay,
    Reject,
}

/// Serialises the state changes of one artifact
pub struct ArtifactStateMonitor {
    state: Mutex<ArtifactState>,
    event_logger: Arc<dyn EventLogger>,
    listeners: RwLock<Vec<Arc<dyn InstallArtifactLifecycleListener>>>,
}

impl ArtifactStateMonitor {
    #[must_use]
    pub fn new(event_logger: Arc<dyn EventLogger>) -> Self {
        Self {
            state: Mutex::new(ArtifactState::Initial),
            event_logger,
            listeners: RwLock::new(Vec::new()),
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> ArtifactState {
        *self.state.lock()
    }

    /// Attach `listener` unless it is already attached
    pub fn add_listener(&self, listener: Arc<dyn InstallArtifactLifecycleListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|existing| Arc::ptr_eq(existing, &listener)) {
            listeners.push(listener);
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// # Errors
    /// Returns error unless the artifact is new or its install failed, or if a listener fails
    pub fn on_installing(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.step(artifact, "install", |from| match from {
            ArtifactState::Initial | ArtifactState::InstallFailed => Step::Move(ArtifactState::Installing),
            _ => Step::Reject,
        })?;
        self.log(artifact, LogEvent::Installing, None);
        self.notify(|l| l.on_installing(artifact))
    }

    /// # Errors
    /// Returns error if a listener fails
    pub fn on_install_failed(&self, artifact: &InstallArtifact, cause: Option<Cause<'_>>) -> Result<(), DeploymentError> {
        let moved = self.step(artifact, "fail install of", |from| match from {
            ArtifactState::Initial | ArtifactState::Installing => Step::Move(ArtifactState::InstallFailed),
            _ => Step::Stay,
        })?;
        if !moved {
            return Ok(());
        }
        self.log(artifact, LogEvent::InstallFailed, cause);
        self.notify(|l| l.on_install_failed(artifact, cause))
    }

    /// # Errors
    /// Returns error unless the artifact is installing, or if a listener fails
    pub fn on_installed(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.step(artifact, "complete install of", |from| match from {
            ArtifactState::Installing => Step::Move(ArtifactState::Installed),
            _ => Step::Reject,
        })?;
        self.log(artifact, LogEvent::Installed, None);
        self.notify(|l| l.on_installed(artifact))
    }

    /// # Errors
    /// Returns error unless the artifact is installed or failed to resolve, or if a listener fails
    pub fn on_resolving(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.step(artifact, "resolve", |from| match from {
            ArtifactState::Installed | ArtifactState::ResolveFailed => Step::Move(ArtifactState::Resolving),
            _ => Step::Reject,
        })?;
        self.log(artifact, LogEvent::Resolving, None);
        self.notify(|l| l.on_resolving(artifact))
    }

    /// # Errors
    /// Returns error if a listener fails
    pub fn on_resolve_failed(&self, artifact: &InstallArtifact, cause: Option<Cause<'_>>) -> Result<(), DeploymentError> {
        let moved = self.step(artifact, "fail resolve of", |from| match from {
            ArtifactState::Resolving => Step::Move(ArtifactState::ResolveFailed),
            _ => Step::Stay,
        })?;
        if !moved {
            return Ok(());
        }
        self.log(artifact, LogEvent::ResolveFailed, cause);
        self.notify(|l| l.on_resolve_failed(artifact, cause))
    }

    /// # Errors
    /// Returns error unless the artifact is resolving, or if a listener fails
    pub fn on_resolved(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.step(artifact, "complete resolve of", |from| match from {
            ArtifactState::Resolving => Step::Move(ArtifactState::Resolved),
            _ => Step::Reject,
        })?;
        self.log(artifact, LogEvent::Resolved, None);
        self.notify(|l| l.on_resolved(artifact))
    }

    /// Enter STARTING; false if the artifact is already starting or active
    ///
    /// # Errors
    /// Returns error from any state a start cannot begin in, or if a listener fails
    pub fn on_starting(&self, artifact: &InstallArtifact) -> Result<bool, DeploymentError> {
        let moved = self.step(artifact, "start", |from| match from {
            ArtifactState::Installed
            | ArtifactState::Resolved
            | ArtifactState::StartFailed
            | ArtifactState::StopFailed => Step::Move(ArtifactState::Starting),
            ArtifactState::Starting | ArtifactState::Active => Step::Stay,
            _ => Step::Reject,
        })?;
        if moved {
            self.log(artifact, LogEvent::Starting, None);
            self.notify(|l| l.on_starting(artifact))?;
        }
        Ok(moved)
    }

    /// Record an asynchronous start failure
    ///
    /// Only a starting artifact moves to START_FAILED. An active artifact stays active
    /// so the caller can stop it.
    ///
    /// # Errors
    /// Returns error if a listener fails
    pub fn on_start_failed(&self, artifact: &InstallArtifact, cause: Cause<'_>) -> Result<(), DeploymentError> {
        let moved = self.step(artifact, "fail start of", |from| match from {
            ArtifactState::Starting => Step::Move(ArtifactState::StartFailed),
            _ => Step::Stay,
        })?;
        if !moved {
            return Ok(());
        }
        self.log(artifact, LogEvent::StartFailed, Some(cause));
        self.notify(|l| l.on_start_failed(artifact, cause))
    }

    /// Enter ACTIVE; a no-op if already active
    ///
    /// # Errors
    /// Returns error unless the artifact is starting or active, or if a listener fails
    pub fn on_started(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        let moved = self.step(artifact, "complete start of", |from| match from {
            ArtifactState::Starting => Step::Move(ArtifactState::Active),
            ArtifactState::Active => Step::Stay,
            _ => Step::Reject,
        })?;
        if !moved {
            return Ok(());
        }
        self.log(artifact, LogEvent::Started, None);
        self.notify(|l| l.on_started(artifact))
    }

    /// Enter STOPPING; false unless the artifact was active
    ///
    /// # Errors
    /// Returns error if a listener fails
    pub fn on_stopping(&self, artifact: &InstallArtifact) -> Result<bool, DeploymentError> {
        let moved = self.step(artifact, "stop", |from| match from {
            ArtifactState::Active => Step::Move(ArtifactState::Stopping),
            _ => Step::Stay,
        })?;
        if moved {
            self.log(artifact, LogEvent::Stopping, None);
            self.notify(|l| l.on_stopping(artifact))?;
        }
        Ok(moved)
    }

    /// # Errors
    /// Returns error if a listener fails
    pub fn on_stop_failed(&self, artifact: &InstallArtifact, cause: Cause<'_>) -> Result<(), DeploymentError> {
        let moved = self.step(artifact, "fail stop of", |from| match from {
            ArtifactState::Stopping => Step::Move(ArtifactState::StopFailed),
            _ => Step::Stay,
        })?;
        if !moved {
            return Ok(());
        }
        self.log(artifact, LogEvent::StopFailed, Some(cause));
        self.notify(|l| l.on_stop_failed(artifact, cause))
    }

    /// Enter STOPPED for the listeners, then settle in RESOLVED
    ///
    /// # Errors
    /// Returns error unless the artifact is stopping, or if a listener fails
    pub fn on_stopped(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.step(artifact, "complete stop of", |from| match from {
            ArtifactState::Stopping => Step::Move(ArtifactState::Stopped),
            _ => Step::Reject,
        })?;
        self.log(artifact, LogEvent::Stopped, None);
        let notified = self.notify(|l| l.on_stopped(artifact));
        self.step(artifact, "settle stop of", |from| match from {
            ArtifactState::Stopped => Step::Move(ArtifactState::Resolved),
            _ => Step::Stay,
        })?;
        notified
    }

    /// # Errors
    /// Returns error from any state an uninstall cannot begin in, or if a listener fails
    pub fn on_uninstalling(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.step(artifact, "uninstall", |from| match from {
            ArtifactState::Installed
            | ArtifactState::Resolved
            | ArtifactState::ResolveFailed
            | ArtifactState::Starting
            | ArtifactState::StartFailed
            | ArtifactState::StopFailed => Step::Move(ArtifactState::Uninstalling),
            _ => Step::Reject,
        })?;
        self.log(artifact, LogEvent::Uninstalling, None);
        self.notify(|l| l.on_uninstalling(artifact))
    }

    /// # Errors
    /// Returns error if a listener fails
    pub fn on_uninstall_failed(&self, artifact: &InstallArtifact, cause: Cause<'_>) -> Result<(), DeploymentError> {
        let moved = self.step(artifact, "fail uninstall of", |from| match from {
            ArtifactState::Uninstalling => Step::Move(ArtifactState::UninstallFailed),
            _ => Step::Stay,
        })?;
        if !moved {
            return Ok(());
        }
        self.log(artifact, LogEvent::UninstallFailed, Some(cause));
        self.notify(|l| l.on_uninstall_failed(artifact, cause))
    }

    /// # Errors
    /// Returns error unless the artifact is uninstalling, or if a listener fails
    pub fn on_uninstalled(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        self.step(artifact, "complete uninstall of", |from| match from {
            ArtifactState::Uninstalling => Step::Move(ArtifactState::Uninstalled),
            _ => Step::Reject,
        })?;
        self.log(artifact, LogEvent::Uninstalled, None);
        self.notify(|l| l.on_uninstalled(artifact))
    }

    /// Check and set under the lock; true if the state moved
    fn step<F>(&self, artifact: &InstallArtifact, operation: &'static str, decide: F) -> Result<bool, DeploymentError>
    where
        F: FnOnce(ArtifactState) -> Step,
    {
        let mut state = self.state.lock();
        let from = *state;
        match decide(from) {
            Step::Move(to) => {
                debug_assert!(transition_allowed(from, to), "{from} -> {to} is not in the transition table");
                *state = to;
                tracing::trace!(artifact = %artifact, %from, %to, "State transition");
                Ok(true)
            }
            Step::Stay => Ok(false),
            Step::Reject => Err(DeploymentError::IllegalTransition {
                artifact: artifact.to_string(),
                operation,
                from,
            }),
        }
    }

    fn log(&self, artifact: &InstallArtifact, event: LogEvent, cause: Option<Cause<'_>>) {
        let identity = artifact.identity();
        let cause = cause.map(|c| c as &(dyn Error + 'static));
        self.event_logger.log(
            event,
            cause,
            &[&identity.artifact_type(), &identity.name(), identity.version()],
        );
    }

    fn notify<F>(&self, mut call: F) -> Result<(), DeploymentError>
    where
        F: FnMut(&dyn InstallArtifactLifecycleListener) -> Result<(), DeploymentError>,
    {
        let listeners: Vec<_> = self.listeners.read().clone();
        for listener in &listeners {
            call(listener.as_ref())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ArtifactStateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStateMonitor")
            .field("state", &self.state())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}
