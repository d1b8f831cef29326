//! The synchronization engine: wires readiness, polling and streaming together, and switches
//! between both transports as the push subsystem goes up and down.
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    api::SplitApi,
    readiness::ReadinessManager,
    storage::{SegmentsCache, SplitsCache},
    sync::{
        polling::{PollingManager, SegmentChangesUpdater, SplitChangesUpdater},
        streaming::{
            BackoffConfig, NotificationProcessor, PushEvent, SegmentsUpdateWorker,
            SplitsUpdateWorker,
        },
        SyncTask, UncaughtErrorSink,
    },
    SyncConfig,
};

struct ManagerState {
    streaming_enabled: bool,
    running: bool,
    destroyed: bool,
}

/// Keeps split definitions and segments synchronized, by polling or by streaming.
///
/// The streaming transport is external: it reports connection with [`SyncManager::handle_open`]
/// and delivers raw messages to [`SyncManager::handle_message`].
pub struct SyncManager {
    readiness: ReadinessManager,
    polling: PollingManager,
    processor: NotificationProcessor,
    state: Mutex<ManagerState>,
}

impl SyncManager {
    /// Create a stopped engine. Arms the ready timeout, so it must be called from within a Tokio
    /// runtime.
    pub fn new(
        api: Arc<dyn SplitApi>,
        splits: Arc<dyn SplitsCache>,
        segments: Arc<dyn SegmentsCache>,
        config: SyncConfig,
        uncaught: UncaughtErrorSink,
    ) -> SyncManager {
        let readiness = ReadinessManager::new(config.ready_timeout);

        let splits_task = SyncTask::with_jitter(
            "splitChangesUpdater",
            SplitChangesUpdater::new(
                api.clone(),
                splits,
                segments.clone(),
                readiness.splits(),
                &config,
                uncaught.clone(),
            ),
            config.features_refresh_rate,
            config.refresh_jitter,
        );
        let segments_task = SyncTask::with_jitter(
            "segmentChangesUpdater",
            SegmentChangesUpdater::new(api, segments, readiness.segments(), uncaught.clone()),
            config.segments_refresh_rate,
            config.refresh_jitter,
        );

        let backoff = BackoffConfig::from(&config);
        let processor = NotificationProcessor::new(SplitsUpdateWorker::new(
            splits_task.clone(),
            readiness.splits(),
            backoff,
            uncaught,
        ))
        .with_segments_worker(SegmentsUpdateWorker::new(segments_task.clone(), backoff));

        SyncManager {
            readiness,
            polling: PollingManager::new(splits_task, segments_task),
            processor,
            state: Mutex::new(ManagerState {
                streaming_enabled: config.streaming_enabled,
                running: false,
                destroyed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state
            .lock()
            .expect("thread holding sync manager lock should not panic")
    }

    #[allow(missing_docs)]
    pub fn readiness(&self) -> &ReadinessManager {
        &self.readiness
    }

    #[allow(missing_docs)]
    pub fn polling(&self) -> &PollingManager {
        &self.polling
    }

    #[allow(missing_docs)]
    pub fn processor(&self) -> &NotificationProcessor {
        &self.processor
    }

    /// Whether push notifications are still in use. Turns `false` for good once the backend
    /// disables streaming.
    pub fn is_streaming_enabled(&self) -> bool {
        self.lock().streaming_enabled
    }

    #[allow(missing_docs)]
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Start synchronizing.
    ///
    /// With streaming, an initial synchronization runs right away and the engine then waits for
    /// push events. Without streaming, polling starts.
    pub fn start(&self) {
        let streaming_enabled = {
            let mut state = self.lock();
            if state.running || state.destroyed {
                return;
            }
            state.running = true;
            state.streaming_enabled
        };

        if streaming_enabled {
            log::info!(target: "splitio", "starting in streaming mode");
            self.spawn_sync_all();
        } else {
            self.polling.start();
        }
    }

    /// The streaming transport connected.
    pub fn handle_open(&self) {
        if !self.accepts_push() {
            return;
        }
        let event = self.processor.handle_open();
        self.handle_push_event(event);
    }

    /// Handle a raw message of the streaming transport.
    pub fn handle_message(&self, raw: &str) {
        if !self.accepts_push() {
            log::debug!(target: "splitio", "streaming is off, dropping message");
            return;
        }
        if let Some(event) = self.processor.handle_message(raw) {
            self.handle_push_event(event);
        }
    }

    fn accepts_push(&self) -> bool {
        let state = self.lock();
        state.running && state.streaming_enabled
    }

    fn handle_push_event(&self, event: PushEvent) {
        log::debug!(target: "splitio", "push event: {:?}", event);
        match event {
            PushEvent::SubsystemUp => {
                log::info!(target: "splitio", "streaming up, stopping polling");
                self.polling.stop();
                self.spawn_sync_all();
            }
            PushEvent::SubsystemDown => {
                log::info!(target: "splitio", "streaming down, falling back to polling");
                self.processor.stop_workers();
                self.polling.start();
            }
            PushEvent::NonRetryableError => {
                log::info!(target: "splitio", "streaming disabled, switching to polling for good");
                self.lock().streaming_enabled = false;
                self.processor.stop_workers();
                self.polling.start();
            }
        }
    }

    fn spawn_sync_all(&self) {
        let polling = self.polling.clone();
        tokio::spawn(async move {
            if !polling.sync_all().await.is_success() {
                log::warn!(target: "splitio", "synchronization failed, waiting for the next trigger");
            }
        });
    }

    /// Stop polling and streaming workers. In-flight fetches complete.
    pub fn stop(&self) {
        self.lock().running = false;
        log::info!(target: "splitio", "stopping synchronization");
        self.polling.stop();
        self.processor.stop_workers();
    }

    /// Stop synchronizing and destroy readiness. Idempotent.
    pub fn destroy(&self) {
        {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
        }
        self.stop();
        self.readiness.destroy();
    }
}
