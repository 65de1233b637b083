//! Kernel assembly
//!
//! [`DeploymentKernel`] wires configuration, the signal executor, the start tracker, the
//! standard pipeline and the deployer around a live framework and a repository.

use crate::artifact::{ArtifactKind, ArtifactStorage, InstallArtifact, PlanDescriptor};
use crate::config::KernelConfig;
use crate::deployer::Deployer;
use crate::environment::StandardInstallEnvironmentFactory;
use crate::executor::executor_from_config;
use crate::handlers::BundleLifecycle;
use crate::pipeline::Pipeline;
use crate::InstallArtifactLifecycleListener;
use crate::stages::{ArtifactRegistry, QuasiResolveStage, RegistrationStage, TransformStage};
use crate::tracker::{BundleStartTracker, HeaderContainerDetector};
use deploy_artifact::{ArtifactIdentity, BundleManifest, EventLogger};
use deploy_quasi::{ModuleFramework, PackageImportWildcardExpander, Repository};
use std::sync::Arc;

pub struct DeploymentKernel {
    config: KernelConfig,
    framework: Arc<dyn ModuleFramework>,
    event_logger: Arc<dyn EventLogger>,
    tracker: Arc<BundleStartTracker>,
    registry: Arc<ArtifactRegistry>,
    deployer: Deployer,
}

impl DeploymentKernel {
    /// Assemble a kernel with the standard pipeline: transform, quasi-resolve, register
    #[must_use]
    pub fn new(
        config: KernelConfig,
        framework: Arc<dyn ModuleFramework>,
        repository: Arc<dyn Repository>,
        event_logger: Arc<dyn EventLogger>,
    ) -> Self {
        let executor = executor_from_config(&config.signals);
        let detector = Arc::new(HeaderContainerDetector::new(config.tracker.container_header.clone()));
        let tracker = Arc::new(BundleStartTracker::new(Arc::clone(&framework), detector, executor));
        let registry = Arc::new(ArtifactRegistry::new());

        let pipeline = Arc::new(Pipeline::new("install"));
        pipeline
            .append_stage(Arc::new(TransformStage::new()))
            .append_stage(Arc::new(QuasiResolveStage::new(Arc::clone(&framework), repository)))
            .append_stage(Arc::new(RegistrationStage::new(Arc::clone(&registry))));

        let factory = Arc::new(StandardInstallEnvironmentFactory::new(Arc::clone(&event_logger)));
        let deployer = Deployer::new(pipeline, factory).with_listener(Arc::clone(&registry) as Arc<dyn InstallArtifactLifecycleListener>);

        tracing::info!(
            signal_threads = config.signals.threads,
            container_header = %config.tracker.container_header,
            "Deployment kernel assembled"
        );
        Self {
            config,
            framework,
            event_logger,
            tracker,
            registry,
            deployer,
        }
    }

    /// Bundle artifact driven through the live framework
    #[must_use]
    pub fn bundle_artifact(
        &self,
        identity: ArtifactIdentity,
        manifest: BundleManifest,
        storage: Arc<dyn ArtifactStorage>,
    ) -> Arc<InstallArtifact> {
        InstallArtifact::builder(identity, ArtifactKind::bundle(manifest))
            .with_storage(storage)
            .with_handler(Arc::new(BundleLifecycle::new(
                Arc::clone(&self.framework),
                Arc::clone(&self.tracker),
            )))
            .with_event_logger(Arc::clone(&self.event_logger))
            .build()
    }

    #[must_use]
    pub fn plan_artifact(&self, identity: ArtifactIdentity, plan: PlanDescriptor) -> Arc<InstallArtifact> {
        InstallArtifact::builder(identity, ArtifactKind::Plan(plan))
            .with_event_logger(Arc::clone(&self.event_logger))
            .build()
    }

    /// Wildcard expander using the configured marker
    #[must_use]
    pub fn wildcard_expander(&self) -> PackageImportWildcardExpander {
        PackageImportWildcardExpander::new(Arc::clone(&self.event_logger)).with_wildcard(self.config.quasi.wildcard.clone())
    }

    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub fn deployer(&self) -> &Deployer {
        &self.deployer
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<BundleStartTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ArtifactRegistry> {
        &self.registry
    }

    /// Stop the signal executor
    pub fn shutdown(&self) {
        tracing::info!("Deployment kernel shutting down");
        self.tracker.shutdown();
    }
}

impl std::fmt::Debug for DeploymentKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentKernel")
            .field("config", &self.config)
            .field("registered", &self.registry.len())
            .finish_non_exhaustive()
    }
}
