//! Application state for the login handlers.

use handoff_auth::{Handoff, PendingStateStore};
use std::sync::Arc;
use std::time::Duration;

/// Default deadline for a callback, covering the provider round-trips.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// State shared across the login handlers.
///
/// Holds the orchestrator behind an `Arc`; cloning is cheap.
#[derive(Debug)]
pub struct HandoffState<S> {
    /// The orchestrator.
    pub handoff: Arc<Handoff<S>>,
    /// Deadline for begin and callback requests.
    pub timeout: Duration,
}

impl<S: PendingStateStore> HandoffState<S> {
    /// State over `handoff` with the default deadline.
    #[must_use]
    pub fn new(handoff: Handoff<S>) -> Self {
        Self::from_arc(Arc::new(handoff))
    }

    /// State over a shared `handoff`.
    #[must_use]
    pub const fn from_arc(handoff: Arc<Handoff<S>>) -> Self {
        Self {
            handoff,
            timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    /// Set the per-request deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl<S> Clone for HandoffState<S> {
    fn clone(&self) -> Self {
        Self {
            handoff: Arc::clone(&self.handoff),
            timeout: self.timeout,
        }
    }
}
