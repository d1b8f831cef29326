//! Streaming transport: consumes push notifications and converges the caches to the announced
//! versions. The transport client itself is not part of this crate; it feeds raw messages to the
//! [`NotificationProcessor`].
mod notification_keeper;
mod notifications;
mod processor;
mod update_worker;
mod workers;

pub use notification_keeper::{NotificationKeeper, PushEvent};
pub use notifications::{parse_message, ControlType, Message, Notification, OccupancyMetrics};
pub use processor::NotificationProcessor;
pub use update_worker::{BackoffConfig, UpdateTarget, UpdateWorker};
pub use workers::{
    MySegmentsTarget, MySegmentsUpdateWorker, SegmentTarget, SegmentsUpdateWorker, SplitsTarget,
    SplitsUpdateWorker,
};
