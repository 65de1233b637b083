//! Deploy Kernel
//!
//! Lifecycle management for deployable artifacts.
//!
//! # Core Concepts
//!
//! - [`InstallArtifact`]: one bundle, plan or composite and its lifecycle state
//! - [`ArtifactStateMonitor`]: serialises state changes and notifies listeners
//! - [`Signal`]: one-shot completion of an asynchronous start
//! - [`BundleStartTracker`]: completes bundle starts once the container or framework reports
//! - [`AtomicLifecycleListener`]: makes atomic plans start, stop and uninstall as a unit
//! - [`Pipeline`]: ordered stages applied to an artifact tree during install
//! - [`Deployer`]: drives a tree through install, resolve, start and uninstall
//!
//! # Example
//!
//! ```rust,ignore
//! let kernel = DeploymentKernel::new(KernelConfig::default(), framework, repository, logger);
//! let bundle = kernel.bundle_artifact(identity, manifest, storage);
//! let tree = artifact_tree(bundle);
//! let (_environment, started) = kernel.deployer().deploy(&tree)?;
//! started.wait();
//! ```
//!
//! A container that never reports on a bundle leaves its artifact STARTING; there is no
//! timeout on asynchronous starts.

#![allow(missing_docs)]

pub mod artifact;
pub mod atomic;
pub mod collector;
pub mod config;
pub mod deployer;
pub mod environment;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod kernel;
pub mod logging;
pub mod monitor;
pub mod pipeline;
pub mod signal;
pub mod stages;
pub mod state;
pub mod tracker;

pub use artifact::{
    add_artifact, artifact_tree, graft_artifacts, remove_artifact, ArtifactKind, ArtifactSpecification,
    ArtifactStorage, ArtifactTree, BundleDescriptor, DetachedStorage, InstallArtifact, InstallArtifactBuilder,
    LifecycleHandler, PlanDescriptor,
};
pub use atomic::AtomicLifecycleListener;
pub use collector::collect_plan_members;
pub use config::{KernelConfig, LoggingConfig, QuasiConfig, SignalConfig, TrackerConfig};
pub use deployer::Deployer;
pub use environment::{
    InstallEnvironment, InstallEnvironmentFactory, InstallLog, InstallLogEntry, StandardInstallEnvironmentFactory,
};
pub use error::{ConfigError, DeploymentError, StorageError};
pub use executor::{executor_from_config, InlineExecutor, Job, SignalExecutor, ThreadPoolExecutor};
pub use handlers::{BundleLifecycle, PassiveLifecycle, PlanLifecycle};
pub use kernel::DeploymentKernel;
pub use logging::init_tracing;
pub use monitor::{ArtifactStateMonitor, Cause, InstallArtifactLifecycleListener};
pub use pipeline::{Pipeline, PipelineStage};
pub use signal::{failure_cause, FailureCause, Signal, SignalFailure, SignalJunction, SignalOutcome, SignalReceiver};
pub use stages::{ArtifactRegistry, QuasiResolveStage, RegistrationStage, TransformStage};
pub use state::{allowed_transitions, transition_allowed, validate_transition, ArtifactState, IllegalStateTransition};
pub use tracker::{BundleStartTracker, ContainerDetector, HeaderContainerDetector, TrackerEvent};
