//! Tracks occupancy and control messages of the streaming transport to decide whether streaming
//! is usable.
use super::notifications::ControlType;

/// Transitions of the push subsystem, consumed by the sync manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEvent {
    /// Streaming is usable: polling can stop.
    SubsystemUp,
    /// Streaming is temporarily unusable: polling must take over.
    SubsystemDown,
    /// Streaming was disabled for good.
    NonRetryableError,
}

const PRIMARY_CONTROL_CHANNEL: &str = "control_pri";
const SECONDARY_CONTROL_CHANNEL: &str = "control_sec";

#[derive(Debug)]
struct ControlChannel {
    suffix: &'static str,
    has_publishers: bool,
    /// Timestamp of the last occupancy message.
    occupancy_time: i64,
    /// Timestamp of the last control message.
    control_time: i64,
}

impl ControlChannel {
    fn new(suffix: &'static str) -> ControlChannel {
        ControlChannel {
            suffix,
            has_publishers: true,
            occupancy_time: -1,
            control_time: -1,
        }
    }

    /// Occupancy channels carry a `[?occupancy=...]` prefix, so channels are matched by suffix.
    fn matches(&self, channel: &str) -> bool {
        channel.ends_with(self.suffix)
    }
}

/// State machine over occupancy and control messages. Messages older than the last one seen on the
/// same channel are ignored.
#[derive(Debug)]
pub struct NotificationKeeper {
    channels: [ControlChannel; 2],
    has_publishers: bool,
    has_resumed: bool,
}

impl Default for NotificationKeeper {
    fn default() -> Self {
        NotificationKeeper::new()
    }
}

impl NotificationKeeper {
    #[allow(missing_docs)]
    pub fn new() -> NotificationKeeper {
        NotificationKeeper {
            channels: [
                ControlChannel::new(PRIMARY_CONTROL_CHANNEL),
                ControlChannel::new(SECONDARY_CONTROL_CHANNEL),
            ],
            has_publishers: true,
            has_resumed: true,
        }
    }

    /// The transport connected.
    pub fn handle_open(&mut self) -> PushEvent {
        PushEvent::SubsystemUp
    }

    /// Whether update notifications should be processed.
    pub fn is_streaming_up(&self) -> bool {
        self.has_resumed && self.has_publishers
    }

    #[allow(missing_docs)]
    pub fn handle_occupancy(
        &mut self,
        publishers: u32,
        channel: &str,
        timestamp: i64,
    ) -> Option<PushEvent> {
        let control = self.channels.iter_mut().find(|c| c.matches(channel))?;
        if timestamp <= control.occupancy_time {
            return None;
        }
        control.occupancy_time = timestamp;
        control.has_publishers = publishers != 0;

        let had_publishers = self.has_publishers;
        self.has_publishers = self.channels.iter().any(|c| c.has_publishers);

        if !self.has_resumed {
            return None;
        }
        match (had_publishers, self.has_publishers) {
            (true, false) => Some(PushEvent::SubsystemDown),
            (false, true) => Some(PushEvent::SubsystemUp),
            _ => None,
        }
    }

    /// Control messages are only honored on the primary channel.
    pub fn handle_control(
        &mut self,
        control_type: ControlType,
        channel: &str,
        timestamp: i64,
    ) -> Option<PushEvent> {
        let primary = &mut self.channels[0];
        if !primary.matches(channel) || timestamp <= primary.control_time {
            return None;
        }
        primary.control_time = timestamp;

        match control_type {
            ControlType::StreamingPaused if self.has_resumed => {
                self.has_resumed = false;
                self.has_publishers.then_some(PushEvent::SubsystemDown)
            }
            ControlType::StreamingResumed if !self.has_resumed => {
                self.has_resumed = true;
                self.has_publishers.then_some(PushEvent::SubsystemUp)
            }
            ControlType::StreamingDisabled => Some(PushEvent::NonRetryableError),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{NotificationKeeper, PushEvent};
    use crate::sync::streaming::notifications::ControlType;

    const PRI: &str = "[?occupancy=metrics.publishers]control_pri";
    const SEC: &str = "[?occupancy=metrics.publishers]control_sec";

    #[test]
    fn down_only_when_no_channel_has_publishers() {
        let mut keeper = NotificationKeeper::new();
        assert_eq!(keeper.handle_open(), PushEvent::SubsystemUp);

        assert_eq!(keeper.handle_occupancy(0, PRI, 10), None);
        assert!(keeper.is_streaming_up());
        assert_eq!(
            keeper.handle_occupancy(0, SEC, 11),
            Some(PushEvent::SubsystemDown)
        );
        assert!(!keeper.is_streaming_up());
        assert_eq!(
            keeper.handle_occupancy(2, PRI, 12),
            Some(PushEvent::SubsystemUp)
        );
        assert!(keeper.is_streaming_up());
    }

    #[test]
    fn out_of_order_occupancy_is_ignored() {
        let mut keeper = NotificationKeeper::new();

        assert_eq!(keeper.handle_occupancy(0, PRI, 10), None);
        assert_eq!(keeper.handle_occupancy(1, PRI, 5), None);
        assert_eq!(
            keeper.handle_occupancy(0, SEC, 11),
            Some(PushEvent::SubsystemDown)
        );
    }

    #[test]
    fn pause_and_resume() {
        let mut keeper = NotificationKeeper::new();

        assert_eq!(
            keeper.handle_control(ControlType::StreamingPaused, "control_pri", 1),
            Some(PushEvent::SubsystemDown)
        );
        assert!(!keeper.is_streaming_up());
        // Repeated pause and occupancy changes while paused are silent.
        assert_eq!(
            keeper.handle_control(ControlType::StreamingPaused, "control_pri", 2),
            None
        );
        assert_eq!(keeper.handle_occupancy(0, PRI, 3), None);
        assert_eq!(keeper.handle_occupancy(1, PRI, 4), None);

        assert_eq!(
            keeper.handle_control(ControlType::StreamingResumed, "control_pri", 5),
            Some(PushEvent::SubsystemUp)
        );
        assert!(keeper.is_streaming_up());
    }

    #[test]
    fn control_on_secondary_channel_is_ignored() {
        let mut keeper = NotificationKeeper::new();

        assert_eq!(
            keeper.handle_control(ControlType::StreamingPaused, "control_sec", 1),
            None
        );
        assert!(keeper.is_streaming_up());
    }

    #[test]
    fn disabled_is_non_retryable() {
        let mut keeper = NotificationKeeper::new();

        assert_eq!(
            keeper.handle_control(ControlType::StreamingDisabled, "control_pri", 1),
            Some(PushEvent::NonRetryableError)
        );
    }
}
