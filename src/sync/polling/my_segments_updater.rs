use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;

use crate::{
    api::SplitApi,
    readiness::SegmentsReadiness,
    storage::MySegmentsCache,
    sync::{UncaughtErrorSink, UpdateOutcome, Updater},
    Result, SyncConfig,
};

use super::StartupPolicy;

/// Arguments of a my-segments cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MySegmentsRequest {
    /// Segment list delivered by a notification. When present, no fetch is issued.
    pub segment_list: Option<Vec<String>>,
    /// Ask intermediate caches to revalidate.
    pub no_cache: bool,
}

/// Synchronizes the list of segments a single key belongs to.
pub struct MySegmentsUpdater {
    api: Arc<dyn SplitApi>,
    key: String,
    cache: Arc<dyn MySegmentsCache>,
    readiness: SegmentsReadiness,
    startup: StartupPolicy,
    ready_on_already_existent_state: AtomicBool,
}

impl MySegmentsUpdater {
    #[allow(missing_docs)]
    pub fn new(
        api: Arc<dyn SplitApi>,
        key: impl Into<String>,
        cache: Arc<dyn MySegmentsCache>,
        readiness: SegmentsReadiness,
        config: &SyncConfig,
        uncaught: UncaughtErrorSink,
    ) -> MySegmentsUpdater {
        MySegmentsUpdater {
            api,
            key: key.into(),
            cache,
            readiness,
            startup: StartupPolicy::new(config, uncaught),
            ready_on_already_existent_state: AtomicBool::new(true),
        }
    }

    #[allow(missing_docs)]
    pub fn key(&self) -> &str {
        &self.key
    }

    fn apply(&self, segments: &[String]) -> Result<()> {
        let changed = self.cache.reset_segments(segments)?;
        log::debug!(
            target: "splitio",
            key = self.key.as_str(),
            changed = changed;
            "my segments updated, {} segments", segments.len()
        );

        let first_cycle = self
            .ready_on_already_existent_state
            .swap(false, Ordering::SeqCst);
        if changed || first_cycle {
            self.readiness.segments_arrived();
        }
        Ok(())
    }

    async fn fetch_and_apply(&self, no_cache: bool) -> Result<()> {
        let segments = self
            .startup
            .fetch(self.api.fetch_my_segments(&self.key, no_cache))
            .await?;
        self.startup.started();
        self.apply(&segments)
    }
}

#[async_trait]
impl Updater for MySegmentsUpdater {
    type Input = MySegmentsRequest;

    async fn update(&self, request: MySegmentsRequest) -> UpdateOutcome {
        let result = match &request.segment_list {
            Some(segments) => self.apply(segments),
            None => self.fetch_and_apply(request.no_cache).await,
        };

        let mut err = match result {
            Ok(()) => return UpdateOutcome::Success,
            Err(err) => err,
        };

        // Retries always fetch, the payload is only good for one attempt.
        let mut retry = 0;
        while self.startup.should_retry(&err, retry, "my segments") {
            retry += 1;
            match self.fetch_and_apply(request.no_cache).await {
                Ok(()) => return UpdateOutcome::Success,
                Err(next) => err = next,
            }
        }
        UpdateOutcome::Failure
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        readiness::{ReadinessManager, SdkEvent},
        storage::{InMemoryMySegmentsCache, MySegmentsCache},
        sync::{UncaughtErrorSink, UpdateOutcome, Updater},
        test_utils::{drain, MockSplitApi, Scripted},
        Error, SyncConfig,
    };

    use super::{MySegmentsRequest, MySegmentsUpdater};

    fn updater(
        api: &Arc<MockSplitApi>,
        cache: &Arc<InMemoryMySegmentsCache>,
        readiness: &ReadinessManager,
    ) -> MySegmentsUpdater {
        MySegmentsUpdater::new(
            api.clone(),
            "user-1",
            cache.clone(),
            readiness.segments(),
            &SyncConfig::default(),
            UncaughtErrorSink::default(),
        )
    }

    #[tokio::test]
    async fn fetches_and_resets_segments() {
        let api = Arc::new(MockSplitApi::new());
        let cache = Arc::new(InMemoryMySegmentsCache::new());
        let readiness = ReadinessManager::new(None);
        readiness.splits().splits_arrived();
        let mut events = readiness.subscribe();
        api.script_my_segments([
            Scripted::Respond(vec!["seg1".to_owned()]),
            Scripted::Respond(vec!["seg1".to_owned()]),
            Scripted::Respond(vec!["seg2".to_owned()]),
        ]);
        let updater = updater(&api, &cache, &readiness);

        for _ in 0..3 {
            assert!(updater.update(MySegmentsRequest::default()).await.is_success());
        }

        assert_eq!(cache.segment_names(), ["seg2"]);
        assert_eq!(drain(&mut events), [SdkEvent::Ready, SdkEvent::Update]);
        assert_eq!(
            api.my_segments_calls(),
            vec![("user-1".to_owned(), false); 3]
        );
    }

    #[tokio::test]
    async fn payload_skips_the_fetch() {
        let api = Arc::new(MockSplitApi::new());
        let cache = Arc::new(InMemoryMySegmentsCache::new());
        let readiness = ReadinessManager::new(None);
        let updater = updater(&api, &cache, &readiness);

        let request = MySegmentsRequest {
            segment_list: Some(vec!["seg1".to_owned()]),
            no_cache: true,
        };
        assert!(updater.update(request).await.is_success());

        assert!(cache.is_in_segment("seg1"));
        assert!(api.my_segments_calls().is_empty());
        assert!(readiness.segments().has_arrived());
    }

    #[tokio::test]
    async fn failures_are_retried_before_ready() {
        let api = Arc::new(MockSplitApi::new());
        let cache = Arc::new(InMemoryMySegmentsCache::new());
        let readiness = ReadinessManager::new(None);
        api.script_my_segments([
            Scripted::Fail(Error::HttpStatus(503)),
            Scripted::Respond(vec!["seg1".to_owned()]),
            Scripted::Fail(Error::HttpStatus(503)),
        ]);
        let updater = updater(&api, &cache, &readiness);

        assert!(updater.update(MySegmentsRequest::default()).await.is_success());
        assert_eq!(api.my_segments_calls().len(), 2);

        assert_eq!(
            updater.update(MySegmentsRequest::default()).await,
            UpdateOutcome::Failure
        );
        assert_eq!(api.my_segments_calls().len(), 3);
        assert!(cache.is_in_segment("seg1"));
    }
}
