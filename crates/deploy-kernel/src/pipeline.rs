//! Install pipeline
//!
//! A [`Pipeline`] runs its stages over an artifact tree, strictly in the order they were
//! appended. The first stage to fail ends the run and its error is returned; `run` does
//! not undo stages that already ran. Whoever drives the install calls
//! [`Pipeline::rollback`] once it has failed, which visits every stage in reverse order.
//! A pipeline is itself a stage, so pipelines nest.

use crate::artifact::ArtifactTree;
use crate::environment::InstallEnvironment;
use crate::error::DeploymentError;
use parking_lot::Mutex;
use std::sync::Arc;

/// One step applied to a whole artifact tree during installation
pub trait PipelineStage: Send + Sync {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    /// # Errors
    /// Returns error if the stage rejects the tree
    fn process(&self, tree: &Arc<ArtifactTree>, environment: &InstallEnvironment) -> Result<(), DeploymentError>;

    /// Undo whatever `process` did for the failed install described by `environment`
    ///
    /// Called for every stage, including those that never ran or failed.
    fn rollback(&self, _tree: &Arc<ArtifactTree>, _environment: &InstallEnvironment) {}
}

/// Ordered sequence of stages
pub struct Pipeline {
    name: String,
    stages: Mutex<Vec<Arc<dyn PipelineStage>>>,
}

impl Pipeline {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Mutex::new(Vec::new()),
        }
    }

    /// Append a stage, returning the pipeline for chaining
    pub fn append_stage(&self, stage: Arc<dyn PipelineStage>) -> &Self {
        self.stages.lock().push(stage);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.lock().iter().map(|stage| stage.name().to_string()).collect()
    }

    /// Run every stage over `tree`
    ///
    /// # Errors
    /// Returns the error of the first failing stage
    pub fn run(&self, tree: &Arc<ArtifactTree>, environment: &InstallEnvironment) -> Result<(), DeploymentError> {
        let mut index = 0;
        loop {
            let stage = {
                let stages = self.stages.lock();
                match stages.get(index) {
                    Some(stage) => Arc::clone(stage),
                    None => break,
                }
            };
            tracing::debug!(pipeline = %self.name, stage = stage.name(), "Running stage");
            if let Err(error) = stage.process(tree, environment) {
                tracing::warn!(pipeline = %self.name, stage = stage.name(), error = %error, "Stage failed");
                return Err(error);
            }
            index += 1;
        }
        Ok(())
    }

    /// Roll back every stage, last appended first
    pub fn rollback(&self, tree: &Arc<ArtifactTree>, environment: &InstallEnvironment) {
        let stages: Vec<Arc<dyn PipelineStage>> = self.stages.lock().clone();
        for stage in stages.iter().rev() {
            tracing::debug!(pipeline = %self.name, stage = stage.name(), "Rolling back stage");
            stage.rollback(tree, environment);
        }
    }
}

impl PipelineStage for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, tree: &Arc<ArtifactTree>, environment: &InstallEnvironment) -> Result<(), DeploymentError> {
        self.run(tree, environment)
    }

    fn rollback(&self, tree: &Arc<ArtifactTree>, environment: &InstallEnvironment) {
        Pipeline::rollback(self, tree, environment);
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .finish()
    }
}
