//! One-shot completion signals
//!
//! A [`Signal`] carries the outcome of an operation that may finish on another thread.
//! Completing it consumes it, so a signal is driven at most once. A signal dropped without
//! being completed is logged and never fires.

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Opaque cause of an asynchronous failure, shareable between many signals
pub type FailureCause = Arc<dyn Error + Send + Sync + 'static>;

/// Outcome delivered through a signal
pub type SignalOutcome = Result<(), FailureCause>;

/// Build a [`FailureCause`] from a message
#[must_use]
pub fn failure_cause(message: impl Into<String>) -> FailureCause {
    Arc::new(SignalFailure(message.into()))
}

/// Plain-text failure cause
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SignalFailure(pub String);

type Callback = Box<dyn FnOnce(SignalOutcome) + Send>;

/// Single-use completion callback
pub struct Signal {
    callback: Option<Callback>,
}

impl Signal {
    /// Signal that runs `callback` with the outcome
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: FnOnce(SignalOutcome) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Signal whose outcome is read from the returned receiver
    #[must_use]
    pub fn channel() -> (Self, SignalReceiver) {
        let (sender, receiver) = channel::bounded(1);
        let signal = Self::from_fn(move |outcome| {
            let _ = sender.send(outcome);
        });
        (signal, SignalReceiver { receiver })
    }

    /// Signal that ignores its outcome
    #[must_use]
    pub fn noop() -> Self {
        Self::from_fn(|_| {})
    }

    pub fn succeed(self) {
        self.complete(Ok(()));
    }

    pub fn fail(self, cause: FailureCause) {
        self.complete(Err(cause));
    }

    pub fn complete(mut self, outcome: SignalOutcome) {
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        if self.callback.is_some() {
            tracing::trace!("Signal dropped without completion");
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

/// Receiving end of [`Signal::channel`]
#[derive(Debug)]
pub struct SignalReceiver {
    receiver: Receiver<SignalOutcome>,
}

impl SignalReceiver {
    /// Block until the signal completes; `None` if it was dropped uncompleted
    #[must_use]
    pub fn wait(&self) -> Option<SignalOutcome> {
        self.receiver.recv().ok()
    }

    /// Block for at most `timeout`; `None` on timeout or if the signal was dropped
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<SignalOutcome> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    #[must_use]
    pub fn try_outcome(&self) -> Option<SignalOutcome> {
        self.receiver.try_recv().ok()
    }
}

struct JunctionState {
    remaining: usize,
    parent: Option<Signal>,
}

/// Joins several branch signals into one parent signal
///
/// The parent succeeds once every branch succeeded and fails with the first branch
/// failure. Later branch outcomes are ignored. An abandoned junction never drives its
/// parent.
#[derive(Clone)]
pub struct SignalJunction {
    state: Arc<Mutex<JunctionState>>,
}

impl SignalJunction {
    /// Split `parent` into `branches` signals
    ///
    /// With zero branches the parent succeeds immediately.
    #[must_use]
    pub fn split(parent: Signal, branches: usize) -> (Self, Vec<Signal>) {
        if branches == 0 {
            parent.succeed();
            let junction = Self {
                state: Arc::new(Mutex::new(JunctionState {
                    remaining: 0,
                    parent: None,
                })),
            };
            return (junction, Vec::new());
        }

        let junction = Self {
            state: Arc::new(Mutex::new(JunctionState {
                remaining: branches,
                parent: Some(parent),
            })),
        };
        let signals = (0..branches)
            .map(|_| {
                let junction = junction.clone();
                Signal::from_fn(move |outcome| junction.branch_completed(outcome))
            })
            .collect();
        (junction, signals)
    }

    /// Detach the parent so no branch outcome reaches it; true if it was still pending
    pub fn abandon(&self) -> bool {
        let parent = self.state.lock().parent.take();
        match parent {
            Some(parent) => {
                drop(parent);
                true
            }
            None => false,
        }
    }

    /// Whether the parent has been driven or abandoned
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state.lock().parent.is_none()
    }

    fn branch_completed(&self, outcome: SignalOutcome) {
        let parent = {
            let mut state = self.state.lock();
            match &outcome {
                Ok(()) => {
                    state.remaining = state.remaining.saturating_sub(1);
                    if state.remaining == 0 {
                        state.parent.take()
                    } else {
                        None
                    }
                }
                Err(_) => state.parent.take(),
            }
        };
        if let Some(parent) = parent {
            parent.complete(outcome);
        }
    }
}

impl fmt::Debug for SignalJunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SignalJunction")
            .field("remaining", &state.remaining)
            .field("pending", &state.parent.is_some())
            .finish()
    }
}
