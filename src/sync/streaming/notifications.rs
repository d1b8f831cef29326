//! Push notification models and parsing of the streaming transport envelope.
use serde::Deserialize;

use crate::{dtos::ChangeNumber, Result};

/// Event name the transport uses for occupancy messages, whose payload carries no `type`.
const OCCUPANCY_EVENT_NAME: &str = "[meta]occupancy";

/// A parsed push notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
#[allow(missing_docs)]
pub enum Notification {
    SplitUpdate {
        change_number: ChangeNumber,
    },
    SplitKill {
        change_number: ChangeNumber,
        split_name: String,
        default_treatment: String,
    },
    SegmentUpdate {
        change_number: ChangeNumber,
        segment_name: String,
    },
    MySegmentsUpdate {
        change_number: ChangeNumber,
        #[serde(default)]
        includes_payload: bool,
        #[serde(default)]
        segment_list: Option<Vec<String>>,
    },
    Occupancy {
        metrics: OccupancyMetrics,
    },
    Control {
        control_type: ControlType,
    },
    /// Notification types this engine does not handle.
    #[serde(other)]
    Unknown,
}

/// Occupancy of a control channel. Converts to and from the number of publishers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Deserialize, derive_more::From, derive_more::Into,
)]
#[allow(missing_docs)]
pub struct OccupancyMetrics {
    pub publishers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ControlType {
    StreamingPaused,
    StreamingResumed,
    StreamingDisabled,
    #[serde(other)]
    Unknown,
}

/// A notification together with the channel it was published on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    #[allow(missing_docs)]
    pub channel: String,
    /// Publication time, in milliseconds.
    pub timestamp: i64,
    #[allow(missing_docs)]
    pub notification: Notification,
}

#[derive(Deserialize)]
struct Envelope {
    channel: String,
    /// JSON-encoded notification.
    data: String,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    name: Option<String>,
}

/// Parse a raw message of the streaming transport.
pub fn parse_message(raw: &str) -> Result<Message> {
    let envelope: Envelope = serde_json::from_str(raw)?;

    let mut data: serde_json::Value = serde_json::from_str(&envelope.data)?;
    if envelope.name.as_deref() == Some(OCCUPANCY_EVENT_NAME) {
        if let Some(data) = data.as_object_mut() {
            data.insert("type".to_owned(), "OCCUPANCY".into());
        }
    }

    Ok(Message {
        channel: envelope.channel,
        timestamp: envelope.timestamp,
        notification: serde_json::from_value(data)?,
    })
}
