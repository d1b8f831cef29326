use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;

use crate::{
    api::SplitApi,
    dtos::{compute_splits_mutation, ChangeNumber},
    readiness::SplitsReadiness,
    storage::{SegmentsCache, SplitsCache},
    sync::{UncaughtErrorSink, UpdateOutcome, Updater},
    Result, SyncConfig,
};

use super::StartupPolicy;

/// Arguments of a split changes cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SplitChangesRequest {
    /// Ask intermediate caches to revalidate.
    pub no_cache: bool,
    /// Target change number of a CDN bypass.
    pub till: Option<ChangeNumber>,
}

/// Fetches split changes since the cached change number and applies them to the caches.
pub struct SplitChangesUpdater {
    api: Arc<dyn SplitApi>,
    splits: Arc<dyn SplitsCache>,
    segments: Arc<dyn SegmentsCache>,
    readiness: SplitsReadiness,
    startup: StartupPolicy,
    /// Set until the first successful cycle, which signals arrival even without changes.
    ready_on_already_existent_state: AtomicBool,
}

impl SplitChangesUpdater {
    #[allow(missing_docs)]
    pub fn new(
        api: Arc<dyn SplitApi>,
        splits: Arc<dyn SplitsCache>,
        segments: Arc<dyn SegmentsCache>,
        readiness: SplitsReadiness,
        config: &SyncConfig,
        uncaught: UncaughtErrorSink,
    ) -> SplitChangesUpdater {
        SplitChangesUpdater {
            api,
            splits,
            segments,
            readiness,
            startup: StartupPolicy::new(config, uncaught),
            ready_on_already_existent_state: AtomicBool::new(true),
        }
    }

    #[allow(missing_docs)]
    pub fn splits(&self) -> &Arc<dyn SplitsCache> {
        &self.splits
    }

    async fn fetch_and_apply(&self, since: ChangeNumber, request: SplitChangesRequest) -> Result<()> {
        let fetch = self
            .api
            .fetch_split_changes(since, request.no_cache, request.till);

        // Checked before the response arrives, so cached data is usable while we wait.
        if self.startup.is_starting_up() && self.splits.check_cache() {
            self.readiness.splits_cache_loaded();
        }

        let response = self.startup.fetch(fetch).await?;
        self.startup.started();

        let mutation = compute_splits_mutation(&response.splits)?;
        log::debug!(
            target: "splitio",
            added = mutation.added.len(),
            removed = mutation.removed.len(),
            segments = mutation.segments.len();
            "split changes fetched, till {}", response.till
        );

        let changed = if response.till < since {
            log::warn!(
                target: "splitio",
                "ignoring split changes with till {} older than cached {}", response.till, since
            );
            false
        } else {
            self.splits.set_change_number(response.till)?;
            self.splits.add_splits(&mutation.added)?;
            self.splits.remove_splits(&mutation.removed)?;
            let segments: Vec<String> = mutation.segments.into_iter().collect();
            self.segments.register_segments(&segments)?;
            since != response.till
        };

        let first_cycle = self
            .ready_on_already_existent_state
            .swap(false, Ordering::SeqCst);
        if changed || first_cycle {
            self.readiness.splits_arrived();
        }

        Ok(())
    }
}

#[async_trait]
impl Updater for SplitChangesUpdater {
    type Input = SplitChangesRequest;

    async fn update(&self, request: SplitChangesRequest) -> UpdateOutcome {
        // Retries reuse the change number read before the first attempt.
        let since = self.splits.change_number();
        let mut retry = 0;
        loop {
            match self.fetch_and_apply(since, request).await {
                Ok(()) => return UpdateOutcome::Success,
                Err(err) => {
                    if self.startup.should_retry(&err, retry, "splits") {
                        retry += 1;
                        continue;
                    }
                    return UpdateOutcome::Failure;
                }
            }
        }
    }
}
