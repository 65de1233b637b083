//! Concrete pipeline stages

use crate::artifact::{ArtifactTree, InstallArtifact};
use crate::environment::InstallEnvironment;
use crate::error::DeploymentError;
use crate::monitor::InstallArtifactLifecycleListener;
use crate::pipeline::PipelineStage;
use dashmap::DashMap;
use deploy_artifact::ArtifactIdentity;
use deploy_quasi::{BundleId, ManifestTransformer, ModuleFramework, QuasiFramework, Repository};
use std::sync::Arc;

fn bundle_artifacts(tree: &ArtifactTree) -> Vec<Arc<InstallArtifact>> {
    tree.values(tree.root())
        .into_iter()
        .filter(|artifact| artifact.as_bundle().is_some())
        .collect()
}

/// Applies manifest transformers to every bundle in the tree, in order
#[derive(Default)]
pub struct TransformStage {
    transformers: Vec<Arc<dyn ManifestTransformer>>,
}

impl TransformStage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_transformer(mut self, transformer: Arc<dyn ManifestTransformer>) -> Self {
        self.transformers.push(transformer);
        self
    }
}

impl PipelineStage for TransformStage {
    fn name(&self) -> &str {
        "transform"
    }

    fn process(&self, tree: &Arc<ArtifactTree>, environment: &InstallEnvironment) -> Result<(), DeploymentError> {
        if self.transformers.is_empty() {
            return Ok(());
        }
        for artifact in bundle_artifacts(tree) {
            let Some(bundle) = artifact.as_bundle() else {
                continue;
            };
            let manifest = self
                .transformers
                .iter()
                .fold(bundle.manifest(), |manifest, transformer| transformer.transform(manifest));
            bundle.set_manifest(manifest);
            environment
                .install_log()
                .append(self.name(), format!("transformed manifest of {artifact}"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for TransformStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformStage")
            .field("transformers", &self.transformers.len())
            .finish()
    }
}

/// Resolves the tree's bundles against the live framework before anything is installed
///
/// Bundles already holding a framework id are left alone. With commit enabled, the
/// bundles and their dependencies are installed in the framework and each artifact
/// records its real bundle id. Rolling back uninstalls every bundle the install
/// committed, newest first, and clears the ids it handed out.
pub struct QuasiResolveStage {
    framework: Arc<dyn ModuleFramework>,
    repository: Arc<dyn Repository>,
    commit: bool,
}

impl QuasiResolveStage {
    #[must_use]
    pub fn new(framework: Arc<dyn ModuleFramework>, repository: Arc<dyn Repository>) -> Self {
        Self {
            framework,
            repository,
            commit: true,
        }
    }

    /// Only check that the tree would resolve
    #[must_use]
    pub fn without_commit(mut self) -> Self {
        self.commit = false;
        self
    }
}

impl PipelineStage for QuasiResolveStage {
    fn name(&self) -> &str {
        "quasi-resolve"
    }

    fn process(&self, tree: &Arc<ArtifactTree>, environment: &InstallEnvironment) -> Result<(), DeploymentError> {
        let quasi = QuasiFramework::new(Arc::clone(&self.framework), Arc::clone(&self.repository));
        let mut candidates: Vec<(BundleId, Arc<InstallArtifact>)> = Vec::new();
        for artifact in bundle_artifacts(tree) {
            let Some(bundle) = artifact.as_bundle() else {
                continue;
            };
            if bundle.bundle_id().is_some() {
                continue;
            }
            let location = artifact.artifact_fs().display().to_string();
            let quasi_bundle = quasi.install(&location, bundle.manifest())?;
            candidates.push((quasi_bundle.bundle_id(), artifact));
        }
        if candidates.is_empty() {
            return Ok(());
        }

        let failures = quasi.resolve();
        if !failures.is_empty() {
            for failure in &failures {
                environment.install_log().append(self.name(), failure.description());
            }
            return Err(DeploymentError::UnsatisfiedDependencies {
                artifact: environment.root().to_string(),
                failures,
            });
        }
        environment
            .install_log()
            .append(self.name(), format!("{} bundle(s) resolve", candidates.len()));

        if self.commit {
            quasi.commit()?;
            for (quasi_id, artifact) in &candidates {
                let real = quasi.bundle(*quasi_id).and_then(|bundle| bundle.real_bundle_id());
                if let (Some(real), Some(bundle)) = (real, artifact.as_bundle()) {
                    bundle.set_bundle_id(real);
                    environment.record_committed_bundle(real);
                    tracing::debug!(artifact = %artifact, bundle = real.value(), "Bundle committed");
                }
            }
            for dependency in quasi.dependencies() {
                if let Some(real) = dependency.real_bundle_id() {
                    environment.record_committed_bundle(real);
                }
            }
            environment
                .install_log()
                .append(self.name(), format!("committed {} bundle(s)", candidates.len()));
        }
        Ok(())
    }

    fn rollback(&self, tree: &Arc<ArtifactTree>, environment: &InstallEnvironment) {
        let committed = environment.take_committed_bundles();
        if committed.is_empty() {
            return;
        }
        for artifact in bundle_artifacts(tree) {
            if let Some(bundle) = artifact.as_bundle() {
                if bundle.bundle_id().is_some_and(|id| committed.contains(&id)) {
                    bundle.clear_bundle_id();
                }
            }
        }
        for id in committed.iter().rev() {
            if let Err(error) = self.framework.uninstall(*id) {
                tracing::error!(bundle = id.value(), error = %error, "Uninstall during install rollback failed");
            }
        }
        environment
            .install_log()
            .append(self.name(), format!("rolled back {} bundle(s)", committed.len()));
    }
}

impl std::fmt::Debug for QuasiResolveStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuasiResolveStage")
            .field("commit", &self.commit)
            .finish_non_exhaustive()
    }
}

/// Installed artifacts keyed by identity
#[derive(Debug, Default)]
pub struct ArtifactRegistry {
    artifacts: DashMap<ArtifactIdentity, Arc<InstallArtifact>>,
}

impl ArtifactRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `artifact`, returning any artifact it replaced
    pub fn register(&self, artifact: Arc<InstallArtifact>) -> Option<Arc<InstallArtifact>> {
        self.artifacts.insert(artifact.identity().clone(), artifact)
    }

    pub fn unregister(&self, identity: &ArtifactIdentity) -> Option<Arc<InstallArtifact>> {
        self.artifacts.remove(identity).map(|(_, artifact)| artifact)
    }

    /// Unregister `artifact` if it is the one registered under its identity
    pub fn unregister_artifact(&self, artifact: &InstallArtifact) -> bool {
        self.artifacts
            .remove_if(artifact.identity(), |_, registered| std::ptr::eq(Arc::as_ptr(registered), artifact))
            .is_some()
    }

    #[must_use]
    pub fn get(&self, identity: &ArtifactIdentity) -> Option<Arc<InstallArtifact>> {
        self.artifacts.get(identity).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn identities(&self) -> Vec<ArtifactIdentity> {
        self.artifacts.iter().map(|entry| entry.key().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Uninstalled artifacts leave the registry
impl InstallArtifactLifecycleListener for ArtifactRegistry {
    fn on_uninstalled(&self, artifact: &InstallArtifact) -> Result<(), DeploymentError> {
        if self.unregister_artifact(artifact) {
            tracing::debug!(artifact = %artifact, "Unregistered artifact");
        }
        Ok(())
    }
}

/// Records every artifact of the tree in an [`ArtifactRegistry`]
///
/// Rolling back unregisters them again.
#[derive(Debug)]
pub struct RegistrationStage {
    registry: Arc<ArtifactRegistry>,
}

impl RegistrationStage {
    #[must_use]
    pub fn new(registry: Arc<ArtifactRegistry>) -> Self {
        Self { registry }
    }
}

impl PipelineStage for RegistrationStage {
    fn name(&self) -> &str {
        "register"
    }

    fn process(&self, tree: &Arc<ArtifactTree>, environment: &InstallEnvironment) -> Result<(), DeploymentError> {
        for artifact in tree.values(tree.root()) {
            if self.registry.register(Arc::clone(&artifact)).is_some() {
                tracing::debug!(artifact = %artifact, "Replaced registered artifact");
            }
            environment.install_log().append(self.name(), format!("registered {artifact}"));
        }
        Ok(())
    }

    fn rollback(&self, tree: &Arc<ArtifactTree>, _environment: &InstallEnvironment) {
        for artifact in tree.values(tree.root()) {
            self.registry.unregister_artifact(&artifact);
        }
    }
}
