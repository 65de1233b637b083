//! Error types for the deployment kernel

use crate::state::ArtifactState;
use deploy_artifact::{ManifestError, TreeError};
use deploy_quasi::{FrameworkError, QuasiError, QuasiResolutionFailure};
use std::path::PathBuf;

/// Synchronous failure of a lifecycle operation
#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    /// The artifact's current state does not allow the operation
    #[error("cannot {operation} {artifact} while it is {from}")]
    IllegalTransition {
        artifact: String,
        operation: &'static str,
        from: ArtifactState,
    },

    /// Staged storage could not be synchronised, rolled back or deleted
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// Candidates do not resolve against the framework and repository
    #[error("unsatisfied dependencies for {artifact}: {}", describe(.failures))]
    UnsatisfiedDependencies {
        artifact: String,
        failures: Vec<QuasiResolutionFailure>,
    },

    /// A bundle without independent lifecycle was passed to the start tracker
    #[error("bundle {0} is a fragment and cannot be tracked")]
    FragmentNotTrackable(String),

    /// A variant handler reported a failure
    #[error("{operation} of {artifact} failed: {reason}")]
    Operation {
        artifact: String,
        operation: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Framework(#[from] FrameworkError),

    #[error(transparent)]
    Quasi(#[from] QuasiError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DeploymentError {
    /// Whether retrying the operation later may succeed
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            DeploymentError::IllegalTransition { .. }
            | DeploymentError::UnsatisfiedDependencies { .. }
            | DeploymentError::Framework(_)
            | DeploymentError::Quasi(_)
            | DeploymentError::Operation { .. } => true,
            DeploymentError::Storage(_)
            | DeploymentError::FragmentNotTrackable(_)
            | DeploymentError::Manifest(_)
            | DeploymentError::Tree(_)
            | DeploymentError::Config(_) => false,
        }
    }
}

fn describe(failures: &[QuasiResolutionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure of the staged artifact storage
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{operation} failed for {path}: {reason}")]
    Operation {
        operation: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure to load kernel configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}
