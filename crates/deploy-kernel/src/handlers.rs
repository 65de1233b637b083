//! Built-in lifecycle handlers
//!
//! - [`PassiveLifecycle`]: artifacts with nothing to start, such as configuration
//! - [`PlanLifecycle`]: drives every child of a plan
//! - [`BundleLifecycle`]: drives a bundle in the live module framework

use crate::artifact::{InstallArtifact, LifecycleHandler};
use crate::error::DeploymentError;
use crate::signal::{Signal, SignalJunction};
use crate::tracker::BundleStartTracker;
use deploy_quasi::{BundleId, ModuleFramework};
use std::sync::Arc;

/// Handler whose operations all succeed immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct PassiveLifecycle;

impl LifecycleHandler for PassiveLifecycle {
    fn do_start(&self, _artifact: &InstallArtifact, signal: Signal) -> Result<(), DeploymentError> {
        signal.succeed();
        Ok(())
    }

    fn do_stop(&self, _artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn do_uninstall(&self, _artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        Ok(())
    }

    fn do_refresh(&self, _artifact: &InstallArtifact) -> Result<bool, DeploymentError> {
        Ok(true)
    }
}

/// Handler for plans
///
/// A plan is running once every child is running. Stops and uninstalls walk the children
/// in reverse order, try every child, and report the first error.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanLifecycle;

impl LifecycleHandler for PlanLifecycle {
    fn do_start(&self, artifact: &InstallArtifact, signal: Signal) -> Result<(), DeploymentError> {
        let children = artifact.children();
        let (junction, branches) = SignalJunction::split(signal, children.len());
        for (child, branch) in children.iter().zip(branches) {
            if let Err(error) = child.start(Some(branch)) {
                junction.abandon();
                tracing::debug!(plan = %artifact, child = %child, error = %error, "Plan start abandoned");
                return Err(error);
            }
        }
        Ok(())
    }

    fn do_stop(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        first_error(artifact, "stop", |child| child.stop())
    }

    fn do_uninstall(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        first_error(artifact, "uninstall", |child| child.uninstall())
    }

    fn do_refresh(&self, artifact: &InstallArtifact) -> Result<bool, DeploymentError> {
        let mut refreshed = true;
        for child in artifact.children() {
            match child.refresh() {
                Ok(true) => {}
                Ok(false) => refreshed = false,
                Err(error) => {
                    tracing::warn!(plan = %artifact, child = %child, error = %error, "Child refresh failed");
                    refreshed = false;
                }
            }
        }
        Ok(refreshed)
    }
}

fn first_error<F>(artifact: &InstallArtifact, operation: &'static str, mut apply: F) -> Result<(), DeploymentError>
where
    F: FnMut(&Arc<InstallArtifact>) -> Result<(), DeploymentError>,
{
    let mut first = None;
    for child in artifact.children().iter().rev() {
        if let Err(error) = apply(child) {
            tracing::warn!(plan = %artifact, child = %child, operation, error = %error, "Plan member failed");
            first.get_or_insert(error);
        }
    }
    first.map_or(Ok(()), Err)
}

/// Handler for bundles living in a [`ModuleFramework`]
///
/// The bundle id is assigned when the bundle is committed to the framework. Fragments
/// have no lifecycle of their own and start immediately.
pub struct BundleLifecycle {
    framework: Arc<dyn ModuleFramework>,
    tracker: Arc<BundleStartTracker>,
}

impl BundleLifecycle {
    #[must_use]
    pub fn new(framework: Arc<dyn ModuleFramework>, tracker: Arc<BundleStartTracker>) -> Self {
        Self { framework, tracker }
    }

    fn bundle_id(artifact: &InstallArtifact, operation: &'static str) -> Result<BundleId, DeploymentError> {
        artifact
            .as_bundle()
            .and_then(|bundle| bundle.bundle_id())
            .ok_or_else(|| DeploymentError::Operation {
                artifact: artifact.to_string(),
                operation,
                reason: "bundle has not been installed in the framework".to_string(),
            })
    }

    fn is_fragment(artifact: &InstallArtifact) -> bool {
        artifact.as_bundle().is_some_and(|bundle| bundle.is_fragment())
    }
}

impl LifecycleHandler for BundleLifecycle {
    fn do_start(&self, artifact: &InstallArtifact, signal: Signal) -> Result<(), DeploymentError> {
        if Self::is_fragment(artifact) {
            signal.succeed();
            return Ok(());
        }
        let id = Self::bundle_id(artifact, "start")?;
        self.framework.start(id)?;
        self.tracker.track_start(id, Some(signal))
    }

    fn do_stop(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        if Self::is_fragment(artifact) {
            return Ok(());
        }
        let id = Self::bundle_id(artifact, "stop")?;
        self.framework.stop(id)?;
        Ok(())
    }

    fn do_uninstall(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        let id = Self::bundle_id(artifact, "uninstall")?;
        self.framework.uninstall(id)?;
        Ok(())
    }

    fn do_refresh(&self, artifact: &InstallArtifact) -> Result<bool, DeploymentError> {
        let id = Self::bundle_id(artifact, "refresh")?;
        match self.framework.update(id) {
            Ok(()) => Ok(true),
            Err(error) => {
                tracing::warn!(artifact = %artifact, error = %error, "Bundle update failed");
                Ok(false)
            }
        }
    }
}

impl std::fmt::Debug for BundleLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleLifecycle").finish_non_exhaustive()
    }
}
