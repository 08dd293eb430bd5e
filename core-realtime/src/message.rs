//! Inbound push message decoding and session filtering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

/// Playback update pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    Progress {
        subject_id: String,
        position_ticks: i64,
        duration_ticks: Option<i64>,
        observed_at: DateTime<Utc>,
    },
    Stopped {
        subject_id: String,
        position_ticks: i64,
        duration_ticks: Option<i64>,
        observed_at: DateTime<Utc>,
    },
}

impl PushEvent {
    pub fn subject_id(&self) -> &str {
        match self {
            PushEvent::Progress { subject_id, .. } | PushEvent::Stopped { subject_id, .. } => {
                subject_id
            }
        }
    }
}

/// Identity messages must match to be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFilter {
    pub user_id: String,
    pub device_id: String,
}

/// Server ids arrive both dashed and undashed, in either case.
fn same_id(a: &str, b: &str) -> bool {
    let normalize = |s: &str| -> String {
        s.chars()
            .filter(|c| *c != '-')
            .flat_map(char::to_lowercase)
            .collect()
    };
    normalize(a) == normalize(b)
}

impl SessionFilter {
    /// `UserId` must match; `DeviceId` must match when the server sends it.
    pub fn accepts(&self, user_id: Option<&str>, device_id: Option<&str>) -> bool {
        let Some(user_id) = user_id else {
            return false;
        };
        if !same_id(user_id, &self.user_id) {
            return false;
        }
        match device_id {
            Some(device_id) => device_id == self.device_id,
            None => true,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope {
    message_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct PlaybackData {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    item_id: Option<String>,
    #[serde(default)]
    position_ticks: Option<i64>,
    #[serde(default)]
    run_time_ticks: Option<i64>,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Push(PushEvent),
    /// Server asks for a keep-alive within this period.
    KeepAliveRequested(Duration),
    Ignored,
}

pub const KEEP_ALIVE_MESSAGE: &str = r#"{"MessageType":"KeepAlive"}"#;

pub fn decode(text: &str, filter: &SessionFilter, now: DateTime<Utc>) -> Inbound {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            trace!(error = %e, "undecodable push frame");
            return Inbound::Ignored;
        }
    };

    let progress = match envelope.message_type.as_str() {
        "PlaybackProgress" => true,
        "PlaybackStopped" => false,
        "ForceKeepAlive" => {
            return match envelope.data.as_u64() {
                Some(secs) if secs > 0 => Inbound::KeepAliveRequested(Duration::from_secs(secs)),
                _ => Inbound::Ignored,
            };
        }
        other => {
            trace!(message_type = other, "push message ignored");
            return Inbound::Ignored;
        }
    };

    let data: PlaybackData = serde_json::from_value(envelope.data).unwrap_or_default();
    if !filter.accepts(data.user_id.as_deref(), data.device_id.as_deref()) {
        trace!("push message for another session dropped");
        return Inbound::Ignored;
    }
    let Some(subject_id) = data.item_id else {
        return Inbound::Ignored;
    };

    let position_ticks = data.position_ticks.unwrap_or(0);
    let duration_ticks = data.run_time_ticks;
    Inbound::Push(if progress {
        PushEvent::Progress {
            subject_id,
            position_ticks,
            duration_ticks,
            observed_at: now,
        }
    } else {
        PushEvent::Stopped {
            subject_id,
            position_ticks,
            duration_ticks,
            observed_at: now,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn filter() -> SessionFilter {
        SessionFilter {
            user_id: "6f1c2a9e-0000-4000-8000-000000000001".to_string(),
            device_id: "tv-1".to_string(),
        }
    }

    fn frame(kind: &str, user: &str, device: Option<&str>) -> String {
        let mut data = serde_json::json!({
            "UserId": user,
            "ItemId": "item-9",
            "PositionTicks": 1200,
            "RunTimeTicks": 5000,
        });
        if let Some(device) = device {
            data["DeviceId"] = serde_json::Value::from(device);
        }
        serde_json::json!({ "MessageType": kind, "Data": data }).to_string()
    }

    #[test]
    fn test_progress_for_session_is_delivered() {
        let now = Utc::now();
        let text = frame("PlaybackProgress", "6F1C2A9E000040008000000000000001", Some("tv-1"));
        assert_eq!(
            decode(&text, &filter(), now),
            Inbound::Push(PushEvent::Progress {
                subject_id: "item-9".to_string(),
                position_ticks: 1200,
                duration_ticks: Some(5000),
                observed_at: now,
            })
        );
    }

    #[test]
    fn test_stopped_without_device_is_delivered() {
        let text = frame("PlaybackStopped", "6f1c2a9e-0000-4000-8000-000000000001", None);
        match decode(&text, &filter(), Utc::now()) {
            Inbound::Push(event @ PushEvent::Stopped { .. }) => assert_eq!(event.subject_id(), "item-9"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_other_sessions_are_dropped() {
        let now = Utc::now();
        let other_user = frame("PlaybackProgress", "someone-else", Some("tv-1"));
        assert_eq!(decode(&other_user, &filter(), now), Inbound::Ignored);

        let other_device = frame(
            "PlaybackProgress",
            "6f1c2a9e-0000-4000-8000-000000000001",
            Some("phone-2"),
        );
        assert_eq!(decode(&other_device, &filter(), now), Inbound::Ignored);
    }

    #[test]
    fn test_keep_alive_and_unknown_messages() {
        let now = Utc::now();
        assert_eq!(
            decode(r#"{"MessageType":"ForceKeepAlive","Data":60}"#, &filter(), now),
            Inbound::KeepAliveRequested(Duration::from_secs(60))
        );
        assert_eq!(
            decode(r#"{"MessageType":"LibraryChanged","Data":{}}"#, &filter(), now),
            Inbound::Ignored
        );
        assert_eq!(decode("not json", &filter(), now), Inbound::Ignored);
    }
}
