use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use futures::future::join_all;

use crate::{
    api::SplitApi,
    dtos::ChangeNumber,
    readiness::SegmentsReadiness,
    storage::SegmentsCache,
    sync::{UncaughtErrorSink, UpdateOutcome, Updater},
    Result,
};

/// Arguments of a segment changes cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SegmentsRequest {
    /// Segments to synchronize. `None` means every registered segment.
    pub segment_names: Option<Vec<String>>,
    /// Ask intermediate caches to revalidate.
    pub no_cache: bool,
    /// Store changes without signaling readiness.
    pub fetch_only: bool,
    /// Target change number of a CDN bypass.
    pub till: Option<ChangeNumber>,
}

/// Fetches membership changes of segments and applies them to the segments cache.
pub struct SegmentChangesUpdater {
    api: Arc<dyn SplitApi>,
    segments: Arc<dyn SegmentsCache>,
    readiness: SegmentsReadiness,
    uncaught: UncaughtErrorSink,
    ready_on_already_existent_state: AtomicBool,
}

impl SegmentChangesUpdater {
    #[allow(missing_docs)]
    pub fn new(
        api: Arc<dyn SplitApi>,
        segments: Arc<dyn SegmentsCache>,
        readiness: SegmentsReadiness,
        uncaught: UncaughtErrorSink,
    ) -> SegmentChangesUpdater {
        SegmentChangesUpdater {
            api,
            segments,
            readiness,
            uncaught,
            ready_on_already_existent_state: AtomicBool::new(true),
        }
    }

    #[allow(missing_docs)]
    pub fn segments(&self) -> &Arc<dyn SegmentsCache> {
        &self.segments
    }

    /// Page through the changes of one segment until the backend reports no more. Returns whether
    /// the segment change number advanced.
    async fn update_segment(
        &self,
        name: &str,
        no_cache: bool,
        till: Option<ChangeNumber>,
    ) -> Result<bool> {
        let initial = self.segments.change_number(name);
        let mut since = initial;

        loop {
            let response = self
                .api
                .fetch_segment_changes(name, since, no_cache, till)
                .await?;

            if response.till < since {
                log::warn!(
                    target: "splitio",
                    segment = name;
                    "ignoring segment changes with till {} older than cached {}", response.till, since
                );
                break;
            }

            if !response.added.is_empty() {
                self.segments.add_to_segment(name, &response.added)?;
            }
            if !response.removed.is_empty() {
                self.segments.remove_from_segment(name, &response.removed)?;
            }
            self.segments.set_change_number(name, response.till)?;
            log::debug!(
                target: "splitio",
                segment = name,
                added = response.added.len(),
                removed = response.removed.len();
                "segment changes applied, till {}", response.till
            );

            if response.since == response.till || response.till == since {
                break;
            }
            since = response.till;
        }

        Ok(self.segments.change_number(name) > initial)
    }
}

#[async_trait]
impl Updater for SegmentChangesUpdater {
    type Input = SegmentsRequest;

    async fn update(&self, request: SegmentsRequest) -> UpdateOutcome {
        let names = match request.segment_names {
            Some(names) => names,
            None => self.segments.registered_segments(),
        };
        log::debug!(target: "splitio", "started update of {} segments", names.len());

        let results = join_all(
            names
                .iter()
                .map(|name| self.update_segment(name, request.no_cache, request.till)),
        )
        .await;

        let mut changed = false;
        let mut failed = false;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(segment_changed) => changed |= segment_changed,
                Err(err) if err.is_sync_error() => {
                    log::warn!(
                        target: "splitio",
                        segment = name.as_str();
                        "error while doing fetch of segment: {}", err
                    );
                    failed = true;
                }
                Err(err) => {
                    self.uncaught.report(err);
                    failed = true;
                }
            }
        }
        if failed {
            return UpdateOutcome::Failure;
        }

        let first_cycle = self
            .ready_on_already_existent_state
            .swap(false, Ordering::SeqCst);
        if (changed && !request.fetch_only) || first_cycle {
            self.readiness.segments_arrived();
        }

        UpdateOutcome::Success
    }
}
