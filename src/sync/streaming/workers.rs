//! Update workers of the split, segment and my-segments resources.
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::{
    dtos::ChangeNumber,
    readiness::SplitsReadiness,
    sync::{
        polling::{
            MySegmentsRequest, MySegmentsUpdater, SegmentChangesUpdater, SegmentsRequest,
            SplitChangesRequest, SplitChangesUpdater,
        },
        SyncTask, UncaughtErrorSink, UpdateOutcome,
    },
};

use super::update_worker::{BackoffConfig, UpdateTarget, UpdateWorker};

/// Refreshes splits through the split changes task.
pub struct SplitsTarget {
    task: SyncTask<SplitChangesUpdater>,
}

#[async_trait]
impl UpdateTarget for SplitsTarget {
    type Payload = ();

    fn cached_version(&self) -> Option<ChangeNumber> {
        Some(self.task.updater().splits().change_number())
    }

    async fn refresh(&self, _payload: Option<()>, cdn_bypass: Option<ChangeNumber>) -> UpdateOutcome {
        self.task
            .execute(SplitChangesRequest {
                no_cache: true,
                till: cdn_bypass,
            })
            .await
    }
}

/// Handles `SPLIT_UPDATE` and `SPLIT_KILL` notifications.
pub struct SplitsUpdateWorker {
    worker: UpdateWorker<SplitsTarget>,
    readiness: SplitsReadiness,
    uncaught: UncaughtErrorSink,
}

impl SplitsUpdateWorker {
    #[allow(missing_docs)]
    pub fn new(
        task: SyncTask<SplitChangesUpdater>,
        readiness: SplitsReadiness,
        config: BackoffConfig,
        uncaught: UncaughtErrorSink,
    ) -> SplitsUpdateWorker {
        SplitsUpdateWorker {
            worker: UpdateWorker::new(SplitsTarget { task }, config),
            readiness,
            uncaught,
        }
    }

    /// Converge splits to `change_number`.
    pub fn put(&self, change_number: ChangeNumber) {
        self.worker.put(change_number, None);
    }

    /// Kill `split_name` locally right away, then fetch the change that killed it.
    pub fn kill_split(&self, change_number: ChangeNumber, split_name: &str, default_treatment: &str) {
        let splits = self.worker.target().task.updater().splits();
        match splits.kill_locally(split_name, default_treatment, change_number) {
            Ok(true) => self.readiness.splits_arrived(),
            Ok(false) => {}
            Err(err) => self.uncaught.report(err),
        }
        self.put(change_number);
    }

    #[allow(missing_docs)]
    pub fn stop(&self) {
        self.worker.stop();
    }

    #[allow(missing_docs)]
    pub fn worker(&self) -> &UpdateWorker<SplitsTarget> {
        &self.worker
    }
}

/// Refreshes a single segment through the segment changes task.
pub struct SegmentTarget {
    task: SyncTask<SegmentChangesUpdater>,
    segment_name: String,
}

#[async_trait]
impl UpdateTarget for SegmentTarget {
    type Payload = ();

    fn cached_version(&self) -> Option<ChangeNumber> {
        Some(
            self.task
                .updater()
                .segments()
                .change_number(&self.segment_name),
        )
    }

    async fn refresh(&self, _payload: Option<()>, cdn_bypass: Option<ChangeNumber>) -> UpdateOutcome {
        self.task
            .execute(SegmentsRequest {
                segment_names: Some(vec![self.segment_name.clone()]),
                no_cache: true,
                fetch_only: false,
                till: cdn_bypass,
            })
            .await
    }
}

/// Handles `SEGMENT_UPDATE` notifications, with one worker per segment.
pub struct SegmentsUpdateWorker {
    task: SyncTask<SegmentChangesUpdater>,
    config: BackoffConfig,
    workers: Mutex<HashMap<String, UpdateWorker<SegmentTarget>>>,
}

impl SegmentsUpdateWorker {
    #[allow(missing_docs)]
    pub fn new(task: SyncTask<SegmentChangesUpdater>, config: BackoffConfig) -> SegmentsUpdateWorker {
        SegmentsUpdateWorker {
            task,
            config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UpdateWorker<SegmentTarget>>> {
        self.workers
            .lock()
            .expect("thread holding segment workers lock should not panic")
    }

    /// Converge `segment_name` to `change_number`.
    pub fn put(&self, change_number: ChangeNumber, segment_name: &str) {
        let mut workers = self.lock();
        let worker = workers
            .entry(segment_name.to_owned())
            .or_insert_with(|| {
                UpdateWorker::new(
                    SegmentTarget {
                        task: self.task.clone(),
                        segment_name: segment_name.to_owned(),
                    },
                    self.config,
                )
            });
        worker.put(change_number, None);
    }

    /// Stop every segment worker.
    pub fn stop(&self) {
        for worker in self.lock().values() {
            worker.stop();
        }
    }

    /// Highest announced version of `segment_name`, if any was announced.
    pub fn max_requested(&self, segment_name: &str) -> Option<ChangeNumber> {
        self.lock().get(segment_name).map(UpdateWorker::max_requested)
    }
}

/// Refreshes the segments of a single key. The endpoint exposes no version.
pub struct MySegmentsTarget {
    task: SyncTask<MySegmentsUpdater>,
}

#[async_trait]
impl UpdateTarget for MySegmentsTarget {
    type Payload = Vec<String>;

    fn cached_version(&self) -> Option<ChangeNumber> {
        None
    }

    async fn refresh(
        &self,
        payload: Option<Vec<String>>,
        _cdn_bypass: Option<ChangeNumber>,
    ) -> UpdateOutcome {
        self.task
            .execute(MySegmentsRequest {
                segment_list: payload,
                no_cache: true,
            })
            .await
    }
}

/// Handles `MY_SEGMENTS_UPDATE` notifications.
pub struct MySegmentsUpdateWorker {
    worker: UpdateWorker<MySegmentsTarget>,
}

impl MySegmentsUpdateWorker {
    #[allow(missing_docs)]
    pub fn new(task: SyncTask<MySegmentsUpdater>, config: BackoffConfig) -> MySegmentsUpdateWorker {
        MySegmentsUpdateWorker {
            worker: UpdateWorker::new(MySegmentsTarget { task }, config),
        }
    }

    /// Converge to `change_number`, using `segment_list` instead of a fetch when present.
    pub fn put(&self, change_number: ChangeNumber, segment_list: Option<Vec<String>>) {
        self.worker.put(change_number, segment_list);
    }

    #[allow(missing_docs)]
    pub fn stop(&self) {
        self.worker.stop();
    }

    #[allow(missing_docs)]
    pub fn worker(&self) -> &UpdateWorker<MySegmentsTarget> {
        &self.worker
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use crate::{
        readiness::{ReadinessManager, SdkEvent},
        storage::{
            InMemoryMySegmentsCache, InMemorySegmentsCache, InMemorySplitsCache, MySegmentsCache,
            SegmentsCache, SplitsCache,
        },
        sync::{
            polling::{MySegmentsUpdater, SegmentChangesUpdater, SplitChangesUpdater},
            streaming::BackoffConfig,
            SyncTask, UncaughtErrorSink,
        },
        test_utils::{drain, segment_changes, split, split_changes, MockSplitApi, Scripted},
        SyncConfig,
    };

    use super::{MySegmentsUpdateWorker, SegmentsUpdateWorker, SplitsUpdateWorker};

    fn splits_worker(
        api: &Arc<MockSplitApi>,
        splits: &Arc<InMemorySplitsCache>,
        readiness: &ReadinessManager,
    ) -> SplitsUpdateWorker {
        let task = SyncTask::new(
            "splitChangesUpdater",
            SplitChangesUpdater::new(
                api.clone(),
                splits.clone(),
                Arc::new(InMemorySegmentsCache::new()),
                readiness.splits(),
                &SyncConfig::default(),
                UncaughtErrorSink::default(),
            ),
            Duration::from_secs(60),
        );
        SplitsUpdateWorker::new(
            task,
            readiness.splits(),
            BackoffConfig::default(),
            UncaughtErrorSink::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn split_update_fetches_without_cache() {
        let api = Arc::new(MockSplitApi::new());
        let splits = Arc::new(InMemorySplitsCache::new());
        let readiness = ReadinessManager::new(None);
        api.script_split_changes([Scripted::Respond(split_changes(
            vec![split("f1", "ACTIVE", &[])],
            -1,
            10,
        ))]);
        let worker = splits_worker(&api, &splits, &readiness);

        worker.put(10);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(splits.change_number(), 10);
        assert_eq!(api.split_calls(), [(-1, true, None)]);
        assert!(!worker.worker().is_handling());
    }

    #[tokio::test(start_paused = true)]
    async fn split_kill_applies_locally_before_fetching() {
        let api = Arc::new(MockSplitApi::new());
        let splits = Arc::new(InMemorySplitsCache::new());
        let readiness = ReadinessManager::new(None);
        readiness.segments().segments_arrived();
        api.script_split_changes([
            Scripted::Respond(split_changes(vec![split("f1", "ACTIVE", &[])], -1, 5)),
            Scripted::Respond(split_changes(vec![], 5, 8)),
        ]);
        let worker = splits_worker(&api, &splits, &readiness);
        worker.put(5);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut events = readiness.subscribe();

        worker.kill_split(8, "f1", "dead");

        let killed: serde_json::Value =
            serde_json::from_str(&splits.get_split("f1").unwrap()).unwrap();
        assert_eq!(killed["killed"], true);
        assert_eq!(killed["defaultTreatment"], "dead");
        assert_eq!(drain(&mut events), [SdkEvent::Update]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(splits.change_number(), 8);
        assert_eq!(api.split_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn segment_updates_are_tracked_per_segment() {
        let api = Arc::new(MockSplitApi::new());
        let segments = Arc::new(InMemorySegmentsCache::new());
        let readiness = ReadinessManager::new(None);
        api.script_segment_changes(
            "seg1",
            [Scripted::Respond(segment_changes("seg1", &["k"], &[], -1, 4))],
        );
        api.script_segment_changes(
            "seg2",
            [Scripted::Respond(segment_changes("seg2", &["j"], &[], -1, 9))],
        );
        let task = SyncTask::new(
            "segmentChangesUpdater",
            SegmentChangesUpdater::new(
                api.clone(),
                segments.clone(),
                readiness.segments(),
                UncaughtErrorSink::default(),
            ),
            Duration::from_secs(60),
        );
        let worker = SegmentsUpdateWorker::new(task, BackoffConfig::default());

        worker.put(4, "seg1");
        worker.put(9, "seg2");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(segments.change_number("seg1"), 4);
        assert_eq!(segments.change_number("seg2"), 9);
        assert!(segments.is_in_segment("seg2", "j"));
        assert_eq!(worker.max_requested("seg1"), Some(4));
        assert_eq!(worker.max_requested("seg3"), None);
        worker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn my_segments_payload_is_applied_without_fetch() {
        let api = Arc::new(MockSplitApi::new());
        let cache = Arc::new(InMemoryMySegmentsCache::new());
        let readiness = ReadinessManager::new(None);
        let task = SyncTask::new(
            "mySegmentsUpdater",
            MySegmentsUpdater::new(
                api.clone(),
                "user-1",
                cache.clone(),
                readiness.segments(),
                &SyncConfig::default(),
                UncaughtErrorSink::default(),
            ),
            Duration::from_secs(60),
        );
        let worker = MySegmentsUpdateWorker::new(task, BackoffConfig::default());

        worker.put(100, Some(vec!["seg1".to_owned()]));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.is_in_segment("seg1"));
        assert_eq!(worker.worker().current_version(), 100);

        worker.put(101, None);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.my_segments_calls(), [("user-1".to_owned(), true)]);
        assert!(cache.segment_names().is_empty());
    }
}
