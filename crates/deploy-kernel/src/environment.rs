//! Install environment
//!
//! Every install of an artifact tree gets an [`InstallEnvironment`]: an id, an install log
//! recording what each stage did, and the event logger lifecycle events go to. Stages
//! that install bundles in the live framework record them here so a failed install can
//! remove them again.

use crate::artifact::InstallArtifact;
use deploy_artifact::{ArtifactIdentity, EventLogger};
use deploy_quasi::BundleId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// One entry of an install log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallLogEntry {
    pub sequence: u64,
    pub source: String,
    pub message: String,
}

/// Append-only record of one install
#[derive(Debug, Default)]
pub struct InstallLog {
    inner: Mutex<Vec<InstallLogEntry>>,
}

impl InstallLog {
    pub fn append(&self, source: impl Into<String>, message: impl Into<String>) -> u64 {
        let mut guard = self.inner.lock();
        let sequence = guard.len() as u64;
        let entry = InstallLogEntry {
            sequence,
            source: source.into(),
            message: message.into(),
        };
        tracing::debug!(sequence, source = %entry.source, message = %entry.message, "Install log");
        guard.push(entry);
        sequence
    }

    #[must_use]
    pub fn entries(&self) -> Vec<InstallLogEntry> {
        self.inner.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Context shared by every stage of one install
pub struct InstallEnvironment {
    id: Uuid,
    root: ArtifactIdentity,
    install_log: InstallLog,
    event_logger: Arc<dyn EventLogger>,
    committed_bundles: Mutex<Vec<BundleId>>,
}

impl InstallEnvironment {
    #[must_use]
    pub fn new(root: ArtifactIdentity, event_logger: Arc<dyn EventLogger>) -> Self {
        Self {
            id: Uuid::new_v4(),
            root,
            install_log: InstallLog::default(),
            event_logger,
            committed_bundles: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Identity of the artifact the install was started for
    #[inline]
    #[must_use]
    pub fn root(&self) -> &ArtifactIdentity {
        &self.root
    }

    #[inline]
    #[must_use]
    pub fn install_log(&self) -> &InstallLog {
        &self.install_log
    }

    #[inline]
    #[must_use]
    pub fn event_logger(&self) -> &Arc<dyn EventLogger> {
        &self.event_logger
    }

    /// Note that this install put `id` into the live framework
    pub fn record_committed_bundle(&self, id: BundleId) {
        self.committed_bundles.lock().push(id);
    }

    /// Framework bundles installed by this install, oldest first
    #[must_use]
    pub fn committed_bundles(&self) -> Vec<BundleId> {
        self.committed_bundles.lock().clone()
    }

    /// Forget the recorded bundles, returning them oldest first
    pub fn take_committed_bundles(&self) -> Vec<BundleId> {
        std::mem::take(&mut *self.committed_bundles.lock())
    }
}

impl std::fmt::Debug for InstallEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallEnvironment")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("log_entries", &self.install_log.len())
            .field("committed_bundles", &self.committed_bundles.lock().len())
            .finish_non_exhaustive()
    }
}

/// Creates the environment for installing an artifact
pub trait InstallEnvironmentFactory: Send + Sync {
    fn create_install_environment(&self, artifact: &InstallArtifact) -> InstallEnvironment;
}

/// Factory sharing one event logger between all environments
pub struct StandardInstallEnvironmentFactory {
    event_logger: Arc<dyn EventLogger>,
}

impl StandardInstallEnvironmentFactory {
    #[must_use]
    pub fn new(event_logger: Arc<dyn EventLogger>) -> Self {
        Self { event_logger }
    }
}

impl InstallEnvironmentFactory for StandardInstallEnvironmentFactory {
    fn create_install_environment(&self, artifact: &InstallArtifact) -> InstallEnvironment {
        InstallEnvironment::new(artifact.identity().clone(), Arc::clone(&self.event_logger))
    }
}

impl std::fmt::Debug for StandardInstallEnvironmentFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardInstallEnvironmentFactory").finish_non_exhaustive()
    }
}
