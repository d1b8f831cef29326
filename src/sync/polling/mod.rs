//! Polling transport: updaters that pull changes from the fetch capability, and the manager that
//! schedules them.
use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use crate::{
    sync::{SyncTask, UncaughtErrorSink, UpdateOutcome},
    Error, Result, SyncConfig,
};

mod my_segments_updater;
mod segment_changes_updater;
mod split_changes_updater;

pub use my_segments_updater::{MySegmentsRequest, MySegmentsUpdater};
pub use segment_changes_updater::{SegmentChangesUpdater, SegmentsRequest};
pub use split_changes_updater::{SplitChangesRequest, SplitChangesUpdater};

/// Retry and timeout policy applied until the first successful synchronization.
pub(crate) struct StartupPolicy {
    starting_up: AtomicBool,
    request_timeout: Option<Duration>,
    retries: u32,
    uncaught: UncaughtErrorSink,
}

impl StartupPolicy {
    pub(crate) fn new(config: &SyncConfig, uncaught: UncaughtErrorSink) -> StartupPolicy {
        StartupPolicy {
            starting_up: AtomicBool::new(true),
            request_timeout: config.request_timeout_before_ready,
            retries: config.retries_on_failure_before_ready,
            uncaught,
        }
    }

    pub(crate) fn is_starting_up(&self) -> bool {
        self.starting_up.load(Ordering::SeqCst)
    }

    pub(crate) fn started(&self) {
        self.starting_up.store(false, Ordering::SeqCst);
    }

    /// Await `fetch`, bounded by the request timeout while starting up.
    pub(crate) async fn fetch<T>(&self, fetch: impl Future<Output = Result<T>>) -> Result<T> {
        match self.request_timeout {
            Some(timeout) if self.is_starting_up() && !timeout.is_zero() => {
                tokio::time::timeout(timeout, fetch)
                    .await
                    .map_err(|_| Error::Timeout(timeout))?
            }
            _ => fetch.await,
        }
    }

    /// Handle a failed attempt. Returns `true` if the caller should retry with the same input.
    ///
    /// Unexpected errors are reported to the uncaught-error sink and end the startup phase, so
    /// they are never retried.
    pub(crate) fn should_retry(&self, err: &Error, retry: u32, resource: &str) -> bool {
        if err.is_sync_error() {
            log::warn!(target: "splitio", "error while doing fetch of {}: {}", resource, err);
        } else {
            self.uncaught.report(err.clone());
            self.started();
        }

        if self.is_starting_up() && self.retries > retry {
            log::info!(
                target: "splitio",
                "retrying download of {} #{}. Reason: {}", resource, retry + 1, err
            );
            return true;
        }

        self.started();
        false
    }
}

/// Schedules split and segment polling.
#[derive(Clone)]
pub struct PollingManager {
    splits_task: SyncTask<SplitChangesUpdater>,
    segments_task: SyncTask<SegmentChangesUpdater>,
}

impl PollingManager {
    #[allow(missing_docs)]
    pub fn new(
        splits_task: SyncTask<SplitChangesUpdater>,
        segments_task: SyncTask<SegmentChangesUpdater>,
    ) -> PollingManager {
        PollingManager {
            splits_task,
            segments_task,
        }
    }

    #[allow(missing_docs)]
    pub fn splits_task(&self) -> &SyncTask<SplitChangesUpdater> {
        &self.splits_task
    }

    #[allow(missing_docs)]
    pub fn segments_task(&self) -> &SyncTask<SegmentChangesUpdater> {
        &self.segments_task
    }

    /// Start periodic fetching. Segment polling starts once the first split cycle has completed,
    /// so that segments referenced by the splits are registered first.
    pub fn start(&self) {
        log::info!(target: "splitio", "starting polling");

        let Some(first_cycle) = self.splits_task.start(SplitChangesRequest::default()) else {
            return;
        };

        let splits_task = self.splits_task.clone();
        let segments_task = self.segments_task.clone();
        tokio::spawn(async move {
            // Error means splits polling was stopped before its first cycle completed.
            if first_cycle.await.is_ok() && splits_task.is_running() {
                let _ = segments_task.start(SegmentsRequest::default());
            }
        });
    }

    /// Stop periodic fetching.
    pub fn stop(&self) {
        log::info!(target: "splitio", "stopping polling");
        self.splits_task.stop();
        self.segments_task.stop();
    }

    /// Whether polling is active.
    pub fn is_running(&self) -> bool {
        self.splits_task.is_running()
    }

    /// Fetch splits, then segments, once.
    pub async fn sync_all(&self) -> UpdateOutcome {
        let splits = self
            .splits_task
            .execute(SplitChangesRequest::default())
            .await;
        let segments = self.segments_task.execute(SegmentsRequest::default()).await;
        UpdateOutcome::from(splits.is_success() && segments.is_success())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::{PollingManager, SegmentChangesUpdater, SplitChangesUpdater};
    use crate::{
        readiness::ReadinessManager,
        storage::{InMemorySegmentsCache, InMemorySplitsCache, SegmentsCache, SplitsCache},
        sync::{SyncTask, UncaughtErrorSink},
        test_utils::{split, split_changes, MockSplitApi, Scripted},
        SyncConfig,
    };

    fn polling_manager(api: Arc<MockSplitApi>) -> (PollingManager, ReadinessManager) {
        let config = SyncConfig::default();
        let readiness = ReadinessManager::new(None);
        let splits: Arc<dyn SplitsCache> = Arc::new(InMemorySplitsCache::new());
        let segments: Arc<dyn SegmentsCache> = Arc::new(InMemorySegmentsCache::new());

        let splits_task = SyncTask::new(
            "splitChangesUpdater",
            SplitChangesUpdater::new(
                api.clone(),
                splits,
                segments.clone(),
                readiness.splits(),
                &config,
                UncaughtErrorSink::default(),
            ),
            Duration::from_millis(100),
        );
        let segments_task = SyncTask::new(
            "segmentChangesUpdater",
            SegmentChangesUpdater::new(
                api,
                segments,
                readiness.segments(),
                UncaughtErrorSink::default(),
            ),
            Duration::from_millis(100),
        );

        (PollingManager::new(splits_task, segments_task), readiness)
    }

    #[tokio::test(start_paused = true)]
    async fn start_polls_splits_then_segments() {
        let api = Arc::new(MockSplitApi::new());
        api.script_split_changes([Scripted::Respond(split_changes(
            vec![split("f1", "ACTIVE", &["seg1"])],
            -1,
            5,
        ))]);
        let (polling, readiness) = polling_manager(api.clone());

        polling.start();
        assert!(polling.is_running());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(readiness.is_ready());
        assert_eq!(api.segment_calls()[0].0, "seg1");
        assert!(polling.segments_task().is_running());

        polling.stop();
        assert!(!polling.is_running());
        assert!(!polling.segments_task().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn sync_all_runs_both_updaters_once() {
        let api = Arc::new(MockSplitApi::new());
        let (polling, readiness) = polling_manager(api.clone());

        assert!(polling.sync_all().await.is_success());

        assert_eq!(api.split_calls().len(), 1);
        assert!(readiness.is_ready());
        assert!(!polling.is_running());
    }
}
