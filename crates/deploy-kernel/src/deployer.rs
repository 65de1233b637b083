//! Deployer
//!
//! Drives a whole artifact tree through install, resolve, start and uninstall. Install
//! runs the pipeline between beginning and ending the install of every artifact; if
//! anything fails, the pipeline is rolled back and every artifact in the tree is marked
//! INSTALL_FAILED. Deployer listeners are attached to an artifact at most once, however
//! often its install is retried.

use crate::artifact::{ArtifactTree, InstallArtifact};
use crate::atomic::AtomicLifecycleListener;
use crate::environment::{InstallEnvironment, InstallEnvironmentFactory};
use crate::error::DeploymentError;
use crate::monitor::InstallArtifactLifecycleListener;
use crate::pipeline::Pipeline;
use crate::signal::{Signal, SignalReceiver};
use deploy_artifact::TreeError;
use std::sync::Arc;

pub struct Deployer {
    pipeline: Arc<Pipeline>,
    environment_factory: Arc<dyn InstallEnvironmentFactory>,
    listeners: Vec<Arc<dyn InstallArtifactLifecycleListener>>,
}

impl Deployer {
    /// Deployer that attaches an [`AtomicLifecycleListener`] to every artifact it installs
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, environment_factory: Arc<dyn InstallEnvironmentFactory>) -> Self {
        Self {
            pipeline,
            environment_factory,
            listeners: vec![Arc::new(AtomicLifecycleListener::new())],
        }
    }

    /// Attach `listener` to every artifact installed from now on
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn InstallArtifactLifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Install every artifact of `tree`
    ///
    /// # Errors
    /// Returns the first error from beginning an install, a pipeline stage, or ending an
    /// install; the pipeline is rolled back and every artifact failed first
    pub fn install(&self, tree: &Arc<ArtifactTree>) -> Result<InstallEnvironment, DeploymentError> {
        let root = root_of(tree)?;
        let artifacts = tree.values(tree.root());
        for artifact in &artifacts {
            for listener in &self.listeners {
                artifact.add_listener(Arc::clone(listener));
            }
        }

        let environment = self.environment_factory.create_install_environment(&root);
        tracing::info!(root = %root, install = %environment.id(), artifacts = artifacts.len(), "Installing");

        let outcome = artifacts
            .iter()
            .try_for_each(|artifact| artifact.begin_install())
            .and_then(|()| self.pipeline.run(tree, &environment))
            .and_then(|()| artifacts.iter().try_for_each(|artifact| artifact.end_install()));

        match outcome {
            Ok(()) => Ok(environment),
            Err(error) => {
                tracing::warn!(root = %root, error = %error, "Install failed");
                self.pipeline.rollback(tree, &environment);
                fail_all(&artifacts, |artifact| artifact.fail_install(Some(&error)));
                Err(error)
            }
        }
    }

    /// Resolve every artifact of `tree`
    ///
    /// # Errors
    /// Returns the first error; every artifact still resolving is failed first
    pub fn resolve(&self, tree: &Arc<ArtifactTree>) -> Result<(), DeploymentError> {
        let artifacts = tree.values(tree.root());
        let outcome = artifacts
            .iter()
            .try_for_each(|artifact| artifact.begin_resolve())
            .and_then(|()| artifacts.iter().try_for_each(|artifact| artifact.end_resolve()));

        if let Err(error) = outcome {
            fail_all(&artifacts, |artifact| artifact.fail_resolve(Some(&error)));
            return Err(error);
        }
        Ok(())
    }

    /// Install, resolve and start `tree`; the receiver reports when the root is running
    ///
    /// # Errors
    /// Returns error if any phase fails synchronously
    pub fn deploy(&self, tree: &Arc<ArtifactTree>) -> Result<(InstallEnvironment, SignalReceiver), DeploymentError> {
        let environment = self.install(tree)?;
        self.resolve(tree)?;
        let root = root_of(tree)?;
        let (signal, receiver) = Signal::channel();
        root.start(Some(signal))?;
        tracing::info!(root = %root, "Deployed");
        Ok((environment, receiver))
    }

    /// Uninstall the root of `tree`, and with it every member
    ///
    /// # Errors
    /// Returns error if the root fails to stop or uninstall
    pub fn undeploy(&self, tree: &Arc<ArtifactTree>) -> Result<(), DeploymentError> {
        let root = root_of(tree)?;
        root.uninstall()?;
        tracing::info!(root = %root, "Undeployed");
        Ok(())
    }
}

impl std::fmt::Debug for Deployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployer")
            .field("pipeline", &self.pipeline)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

fn root_of(tree: &ArtifactTree) -> Result<Arc<InstallArtifact>, DeploymentError> {
    let root = tree.root();
    Ok(tree.value(root).ok_or(TreeError::UnknownNode(root))?)
}

fn fail_all<F>(artifacts: &[Arc<InstallArtifact>], fail: F)
where
    F: Fn(&InstallArtifact),
{
    for artifact in artifacts {
        fail(artifact);
    }
}
