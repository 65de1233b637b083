//! Atomic plan propagation
//!
//! Members of an atomic plan start, stop and uninstall as one unit. When a member starts,
//! fails to start, stops or is uninstalled, the same operation is applied to the nearest
//! atomic plan above it. Non-atomic plans in between are skipped; nothing above that
//! atomic plan is touched directly.

use crate::artifact::InstallArtifact;
use crate::error::DeploymentError;
use crate::monitor::{Cause, InstallArtifactLifecycleListener};
use std::sync::Arc;

/// Lifecycle listener that propagates member transitions to their atomic plan
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicLifecycleListener;

impl AtomicLifecycleListener {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Nearest strict ancestor of `artifact` that is an atomic plan
    #[must_use]
    pub fn atomic_ancestor(artifact: &InstallArtifact) -> Option<Arc<InstallArtifact>> {
        artifact.ancestors().into_iter().find(|ancestor| ancestor.is_atomic())
    }
}

impl InstallArtifactLifecycleListener for AtomicLifecycleListener {
    fn on_starting(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        if let Some(plan) = Self::atomic_ancestor(artifact) {
            tracing::debug!(member = %artifact, plan = %plan, "Starting atomic plan");
            plan.start(None)?;
        }
        Ok(())
    }

    fn on_start_failed(&self, artifact: &InstallArtifact, _cause: Cause<'_>) -> Result<(), DeploymentError> {
        if let Some(plan) = Self::atomic_ancestor(artifact) {
            tracing::debug!(member = %artifact, plan = %plan, "Stopping atomic plan after failed start");
            plan.stop()?;
        }
        Ok(())
    }

    fn on_stopped(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        if let Some(plan) = Self::atomic_ancestor(artifact) {
            tracing::debug!(member = %artifact, plan = %plan, "Stopping atomic plan");
            plan.stop()?;
        }
        Ok(())
    }

    fn on_uninstalled(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        if let Some(plan) = Self::atomic_ancestor(artifact) {
            tracing::debug!(member = %artifact, plan = %plan, "Uninstalling atomic plan");
            plan.uninstall()?;
        }
        Ok(())
    }
}
