//! Bundle start tracking
//!
//! Starting a bundle in the framework is not the end of its start. A bundle powered by
//! the injection container is only running once the container reports its context as
//! created, or has failed. Any other bundle is running once the framework reports it
//! ACTIVE.
//!
//! [`BundleStartTracker`] queues the signals of bundles whose start has not completed
//! and drives them, in order and exactly once, when completion is observed. Signals are
//! driven on the configured [`SignalExecutor`], never on the notifying thread.
//!
//! # Panics
//!
//! A container reporting the same bundle as both created and failed violates the
//! container's contract. The tracker panics rather than pick an outcome.

use crate::error::DeploymentError;
use crate::executor::SignalExecutor;
use crate::signal::{failure_cause, FailureCause, Signal};
use deploy_quasi::{BundleId, BundleState, FrameworkError, InstalledBundle, ModuleFramework};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Decides whether a bundle's start completes through the injection container
pub trait ContainerDetector: Send + Sync {
    fn is_container_powered(&self, bundle: &InstalledBundle) -> bool;
}

/// Bundles declaring a given manifest header are container powered
#[derive(Debug, Clone)]
pub struct HeaderContainerDetector {
    header: String,
}

impl HeaderContainerDetector {
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self { header: header.into() }
    }
}

impl Default for HeaderContainerDetector {
    fn default() -> Self {
        Self::new("Bundle-Blueprint")
    }
}

impl ContainerDetector for HeaderContainerDetector {
    fn is_container_powered(&self, bundle: &InstalledBundle) -> bool {
        bundle.manifest.header(&self.header).is_some()
    }
}

/// Notifications the tracker reacts to
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// The container created the bundle's context
    ContainerCreated(BundleId),
    /// The container failed to create the bundle's context
    ContainerFailed(BundleId, FailureCause),
    /// The framework reports the bundle ACTIVE
    BundleStarted(BundleId),
    /// The framework reports the bundle stopped
    BundleStopped(BundleId),
}

#[derive(Default)]
struct TrackerState {
    created: HashSet<BundleId>,
    failures: HashMap<BundleId, FailureCause>,
    signals: HashMap<BundleId, Vec<Signal>>,
}

/// Tracks asynchronous bundle starts
pub struct BundleStartTracker {
    framework: Arc<dyn ModuleFramework>,
    detector: Arc<dyn ContainerDetector>,
    executor: Arc<dyn SignalExecutor>,
    state: Mutex<TrackerState>,
}

impl BundleStartTracker {
    #[must_use]
    pub fn new(
        framework: Arc<dyn ModuleFramework>,
        detector: Arc<dyn ContainerDetector>,
        executor: Arc<dyn SignalExecutor>,
    ) -> Self {
        Self {
            framework,
            detector,
            executor,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Drive `signal` once the start of `bundle` completes
    ///
    /// # Errors
    /// Returns error if the bundle is unknown to the framework or is a fragment
    pub fn track_start(&self, bundle: BundleId, signal: Option<Signal>) -> Result<(), DeploymentError> {
        let installed = self
            .framework
            .bundle(bundle)
            .ok_or(FrameworkError::UnknownBundle(bundle))?;
        if installed.is_fragment() {
            return Err(DeploymentError::FragmentNotTrackable(installed.symbolic_name().to_string()));
        }

        let container_powered = self.detector.is_container_powered(&installed);
        let active = installed.state == BundleState::Active;

        if let Some(signal) = signal {
            if container_powered || !active {
                tracing::debug!(bundle = bundle.value(), "Queueing start signal");
                self.state.lock().signals.entry(bundle).or_default().push(signal);
            } else {
                self.drive(vec![signal], None);
            }
        }
        self.drive_signals_if_start_completed(bundle, container_powered, active);
        Ok(())
    }

    fn drive_signals_if_start_completed(&self, bundle: BundleId, container_powered: bool, active: bool) {
        let (signals, failure) = {
            let mut state = self.state.lock();
            if container_powered {
                let created = state.created.contains(&bundle);
                let failure = state.failures.get(&bundle).cloned();
                if let (true, Some(failure)) = (created, &failure) {
                    panic!("container reported bundle {bundle} both created and failed: {failure}");
                }
                if created {
                    tracing::info!(bundle = bundle.value(), "Bundle started and its container context is available");
                    (state.signals.remove(&bundle), None)
                } else if let Some(failure) = failure {
                    tracing::info!(bundle = bundle.value(), failure = %failure, "Bundle failed to start");
                    (state.signals.remove(&bundle), Some(failure))
                } else {
                    (None, None)
                }
            } else if active {
                (state.signals.remove(&bundle), None)
            } else {
                (None, None)
            }
        };

        if let Some(signals) = signals {
            self.drive(signals, failure);
        }
    }

    /// React to a container or framework notification
    pub fn handle_event(&self, event: TrackerEvent) {
        tracing::debug!(event = ?event, "Handling tracker event");
        match event {
            TrackerEvent::ContainerFailed(bundle, cause) => {
                let signals = {
                    let mut state = self.state.lock();
                    tracing::error!(bundle = bundle.value(), cause = %cause, "Recording container failure");
                    state.failures.insert(bundle, Arc::clone(&cause));
                    state.signals.remove(&bundle)
                };
                if let Some(signals) = signals {
                    self.drive(signals, Some(cause));
                }
            }
            TrackerEvent::ContainerCreated(bundle) => {
                let signals = {
                    let mut state = self.state.lock();
                    tracing::info!(bundle = bundle.value(), "Recording created container context");
                    state.created.insert(bundle);
                    state.signals.remove(&bundle)
                };
                if let Some(signals) = signals {
                    self.drive(signals, None);
                }
            }
            TrackerEvent::BundleStarted(bundle) => {
                let powered = self
                    .framework
                    .bundle(bundle)
                    .is_some_and(|installed| self.detector.is_container_powered(&installed));
                if !powered {
                    let signals = self.state.lock().signals.remove(&bundle);
                    if let Some(signals) = signals {
                        tracing::info!(bundle = bundle.value(), count = signals.len(), "Bundle started; driving signals");
                        self.drive(signals, None);
                    }
                }
            }
            TrackerEvent::BundleStopped(bundle) => {
                tracing::info!(bundle = bundle.value(), "Bundle stopped; removing its tracking state");
                self.cleanup(bundle, failure_cause("bundle stopped"));
            }
        }
    }

    /// Forget everything about `bundle`, failing its pending signals with `cause`
    pub fn cleanup(&self, bundle: BundleId, cause: FailureCause) {
        let dangling = {
            let mut state = self.state.lock();
            state.created.remove(&bundle);
            state.failures.remove(&bundle);
            state.signals.remove(&bundle)
        };
        if let Some(signals) = dangling {
            self.drive(signals, Some(cause));
        }
    }

    /// Number of signals waiting for `bundle`
    #[must_use]
    pub fn pending_signals(&self, bundle: BundleId) -> usize {
        self.state.lock().signals.get(&bundle).map_or(0, Vec::len)
    }

    /// Stop the signal executor
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }

    fn drive(&self, signals: Vec<Signal>, cause: Option<FailureCause>) {
        self.executor.execute(Box::new(move || {
            for signal in signals {
                match &cause {
                    None => signal.succeed(),
                    Some(cause) => signal.fail(Arc::clone(cause)),
                }
            }
        }));
    }
}

impl std::fmt::Debug for BundleStartTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BundleStartTracker")
            .field("created", &state.created.len())
            .field("failures", &state.failures.len())
            .field("pending", &state.signals.len())
            .finish_non_exhaustive()
    }
}
