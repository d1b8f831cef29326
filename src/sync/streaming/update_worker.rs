//! Generic convergence loop of the streaming update workers.
//!
//! An [`UpdateWorker`] receives version announcements through [`UpdateWorker::put`] and refreshes
//! its [`UpdateTarget`] until the cached version reaches the highest announced one. Unproductive
//! refreshes are throttled by a [`Backoff`]; once the retry budget is spent, the worker retries
//! with a CDN bypass, and gives up if that is unproductive too.
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    backoff::Backoff,
    dtos::{ChangeNumber, NO_CHANGE_NUMBER},
    sync::UpdateOutcome,
    SyncConfig,
};

/// A resource refreshed by an [`UpdateWorker`].
#[async_trait]
pub trait UpdateTarget: Send + Sync + 'static {
    /// Data carried by a notification that can stand in for a fetch.
    type Payload: Clone + Send + Sync + 'static;

    /// Version currently held by the cache, or `None` if the resource does not expose one. In the
    /// latter case the worker infers the version from successful refreshes.
    fn cached_version(&self) -> Option<ChangeNumber>;

    /// Refresh the resource, revalidating intermediate caches. `cdn_bypass` is the target version
    /// when a CDN bypass is requested.
    async fn refresh(
        &self,
        payload: Option<Self::Payload>,
        cdn_bypass: Option<ChangeNumber>,
    ) -> UpdateOutcome;
}

/// Retry policy of an [`UpdateWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    #[allow(missing_docs)]
    pub base: Duration,
    #[allow(missing_docs)]
    pub max_wait: Duration,
    /// Unproductive refreshes allowed before escalating to a CDN bypass.
    pub max_retries: u32,
}

impl From<&SyncConfig> for BackoffConfig {
    fn from(config: &SyncConfig) -> Self {
        BackoffConfig {
            base: config.fetch_backoff_base,
            max_wait: config.fetch_backoff_max_wait,
            max_retries: config.fetch_backoff_max_retries,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::from(&SyncConfig::default())
    }
}

struct WorkerState<P> {
    max_requested: ChangeNumber,
    /// Inferred version, only used when the target does not expose one.
    current: ChangeNumber,
    payload: Option<P>,
    handling: bool,
    pending_newer: bool,
    cdn_bypass: bool,
    /// Bumped on stop, so a loop started before the stop exits at its next step.
    epoch: u64,
    backoff: Backoff,
    /// Set while the loop waits for its backoff deadline.
    waker: Option<Arc<Notify>>,
}

struct Shared<T: UpdateTarget> {
    target: T,
    max_retries: u32,
    state: Mutex<WorkerState<T::Payload>>,
}

impl<T: UpdateTarget> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, WorkerState<T::Payload>> {
        self.state
            .lock()
            .expect("thread holding update worker lock should not panic")
    }

    fn current_version(&self, state: &WorkerState<T::Payload>) -> ChangeNumber {
        self.target.cached_version().unwrap_or(state.current)
    }
}

/// Converges a single resource to the highest announced version.
pub struct UpdateWorker<T: UpdateTarget> {
    shared: Arc<Shared<T>>,
}

impl<T: UpdateTarget> UpdateWorker<T> {
    #[allow(missing_docs)]
    pub fn new(target: T, config: BackoffConfig) -> UpdateWorker<T> {
        UpdateWorker {
            shared: Arc::new(Shared {
                target,
                max_retries: config.max_retries,
                state: Mutex::new(WorkerState {
                    max_requested: 0,
                    current: NO_CHANGE_NUMBER,
                    payload: None,
                    handling: false,
                    pending_newer: false,
                    cdn_bypass: false,
                    epoch: 0,
                    backoff: Backoff::new(config.base, config.max_wait),
                    waker: None,
                }),
            }),
        }
    }

    #[allow(missing_docs)]
    pub fn target(&self) -> &T {
        &self.shared.target
    }

    /// Announce `version`. Stale and duplicate announcements are ignored.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn put(&self, version: ChangeNumber, payload: Option<T::Payload>) {
        let mut state = self.shared.lock();
        let current = self.shared.current_version(&state);
        if version <= current || version <= state.max_requested {
            log::debug!(
                target: "splitio",
                version = version,
                current = current;
                "ignoring stale update notification"
            );
            return;
        }

        state.max_requested = version;
        state.pending_newer = true;
        state.payload = payload;
        state.cdn_bypass = false;
        state.backoff.reset();

        if state.handling {
            if let Some(waker) = state.waker.take() {
                waker.notify_one();
            }
            return;
        }
        self.spawn(&mut state);
    }

    /// Resume convergence towards the highest announced version after a [`UpdateWorker::stop`].
    pub fn resume(&self) {
        let mut state = self.shared.lock();
        if state.handling || state.max_requested <= self.shared.current_version(&state) {
            return;
        }
        state.backoff.reset();
        state.cdn_bypass = false;
        self.spawn(&mut state);
    }

    /// Cancel any pending backoff and mark the worker idle. The highest announced version is kept.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        state.epoch += 1;
        state.handling = false;
        state.pending_newer = false;
        state.backoff.reset();
        if let Some(waker) = state.waker.take() {
            waker.notify_one();
        }
    }

    /// Highest version announced so far.
    pub fn max_requested(&self) -> ChangeNumber {
        self.shared.lock().max_requested
    }

    /// Version the worker considers cached.
    pub fn current_version(&self) -> ChangeNumber {
        let state = self.shared.lock();
        self.shared.current_version(&state)
    }

    /// Whether a convergence loop is active.
    pub fn is_handling(&self) -> bool {
        self.shared.lock().handling
    }

    fn spawn(&self, state: &mut WorkerState<T::Payload>) {
        state.handling = true;
        tokio::spawn(converge(self.shared.clone(), state.epoch));
    }
}

async fn converge<T: UpdateTarget>(shared: Arc<Shared<T>>, epoch: u64) {
    loop {
        let (target_version, payload, cdn_bypass) = {
            let mut state = shared.lock();
            if state.epoch != epoch {
                return;
            }
            state.waker = None;
            if state.max_requested <= shared.current_version(&state) {
                state.handling = false;
                return;
            }
            state.pending_newer = false;
            let cdn_bypass = state.cdn_bypass.then_some(state.max_requested);
            (state.max_requested, state.payload.clone(), cdn_bypass)
        };

        let outcome = shared.target.refresh(payload, cdn_bypass).await;

        let (deadline, waker) = {
            let mut state = shared.lock();
            if state.epoch != epoch {
                return;
            }
            if outcome.is_success() && shared.target.cached_version().is_none() {
                // Use the version captured before the refresh: a newer one may have been announced
                // while it was in flight.
                state.current = state.current.max(target_version);
            }
            if state.pending_newer {
                continue;
            }

            let attempts = state.backoff.attempts() + 1;
            if state.max_requested <= shared.current_version(&state) {
                log::debug!(
                    target: "splitio",
                    "refresh completed{} in {} attempts",
                    if state.cdn_bypass { " bypassing the CDN" } else { "" },
                    attempts
                );
                state.handling = false;
                state.backoff.reset();
                return;
            }

            if attempts < shared.max_retries {
                let delay = state.backoff.schedule();
                log::debug!(target: "splitio", "refresh unproductive, retrying in {:?}", delay);
            } else if state.cdn_bypass {
                log::debug!(
                    target: "splitio",
                    "no changes fetched after {} attempts with CDN bypassed", attempts
                );
                state.handling = false;
                state.backoff.reset();
                return;
            } else {
                state.backoff.reset();
                state.cdn_bypass = true;
                continue;
            }

            let waker = Arc::new(Notify::new());
            state.waker = Some(waker.clone());
            (state.backoff.deadline(), waker)
        };

        tokio::select! {
            _ = Backoff::wait(deadline) => {}
            _ = waker.notified() => {}
        }
    }
}
