//! Dispatches messages of the streaming transport to the notification keeper and update workers.
use std::sync::{Mutex, MutexGuard};

use super::{
    notification_keeper::{NotificationKeeper, PushEvent},
    notifications::{parse_message, Notification},
    workers::{MySegmentsUpdateWorker, SegmentsUpdateWorker, SplitsUpdateWorker},
};

/// Handles raw messages of the streaming transport.
pub struct NotificationProcessor {
    keeper: Mutex<NotificationKeeper>,
    splits_worker: SplitsUpdateWorker,
    segments_worker: Option<SegmentsUpdateWorker>,
    my_segments_worker: Option<MySegmentsUpdateWorker>,
}

impl NotificationProcessor {
    #[allow(missing_docs)]
    pub fn new(splits_worker: SplitsUpdateWorker) -> NotificationProcessor {
        NotificationProcessor {
            keeper: Mutex::new(NotificationKeeper::new()),
            splits_worker,
            segments_worker: None,
            my_segments_worker: None,
        }
    }

    /// Handle `SEGMENT_UPDATE` notifications (server-side).
    pub fn with_segments_worker(mut self, worker: SegmentsUpdateWorker) -> NotificationProcessor {
        self.segments_worker = Some(worker);
        self
    }

    /// Handle `MY_SEGMENTS_UPDATE` notifications (client-side).
    pub fn with_my_segments_worker(
        mut self,
        worker: MySegmentsUpdateWorker,
    ) -> NotificationProcessor {
        self.my_segments_worker = Some(worker);
        self
    }

    fn keeper(&self) -> MutexGuard<'_, NotificationKeeper> {
        self.keeper
            .lock()
            .expect("thread holding notification keeper lock should not panic")
    }

    #[allow(missing_docs)]
    pub fn splits_worker(&self) -> &SplitsUpdateWorker {
        &self.splits_worker
    }

    /// The transport connected.
    pub fn handle_open(&self) -> PushEvent {
        self.keeper().handle_open()
    }

    /// Whether update notifications are currently processed.
    pub fn is_streaming_up(&self) -> bool {
        self.keeper().is_streaming_up()
    }

    /// Handle a raw transport message. Returns the push subsystem transition it caused, if any.
    ///
    /// Malformed messages are logged and dropped. Update notifications are dropped while
    /// streaming is not up.
    pub fn handle_message(&self, raw: &str) -> Option<PushEvent> {
        let message = match parse_message(raw) {
            Ok(message) => message,
            Err(err) => {
                log::warn!(target: "splitio", "error parsing streaming message: {}", err);
                return None;
            }
        };
        log::debug!(
            target: "splitio",
            channel = message.channel.as_str();
            "streaming message received: {:?}", message.notification
        );

        let mut keeper = self.keeper();
        match message.notification {
            Notification::Occupancy { metrics } => {
                return keeper.handle_occupancy(
                    metrics.into(),
                    &message.channel,
                    message.timestamp,
                );
            }
            Notification::Control { control_type } => {
                return keeper.handle_control(control_type, &message.channel, message.timestamp);
            }
            _ if !keeper.is_streaming_up() => {
                log::debug!(target: "splitio", "streaming is down, dropping update notification");
                return None;
            }
            _ => {}
        }
        drop(keeper);

        match message.notification {
            Notification::SplitUpdate { change_number } => self.splits_worker.put(change_number),
            Notification::SplitKill {
                change_number,
                split_name,
                default_treatment,
            } => self
                .splits_worker
                .kill_split(change_number, &split_name, &default_treatment),
            Notification::SegmentUpdate {
                change_number,
                segment_name,
            } => match &self.segments_worker {
                Some(worker) => worker.put(change_number, &segment_name),
                None => log::debug!(target: "splitio", "ignoring segment update"),
            },
            Notification::MySegmentsUpdate {
                change_number,
                includes_payload,
                segment_list,
            } => match &self.my_segments_worker {
                Some(worker) => worker.put(
                    change_number,
                    segment_list.filter(|_| includes_payload),
                ),
                None => log::debug!(target: "splitio", "ignoring my segments update"),
            },
            Notification::Unknown => {
                log::debug!(target: "splitio", "ignoring unknown notification type");
            }
            Notification::Occupancy { .. } | Notification::Control { .. } => {}
        }
        None
    }

    /// Stop every update worker.
    pub fn stop_workers(&self) {
        self.splits_worker.stop();
        if let Some(worker) = &self.segments_worker {
            worker.stop();
        }
        if let Some(worker) = &self.my_segments_worker {
            worker.stop();
        }
    }
}
