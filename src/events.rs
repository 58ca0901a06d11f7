//! C12: per-meeting WebSocket fan-out with ordered, replayable events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct MeetingEvent {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub meeting_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub sequence_number: u64,
    pub data: Value,
}

struct MeetingChannel {
    sender: broadcast::Sender<MeetingEvent>,
    sequence: AtomicU64,
}

/// One broadcast channel per meeting, matching the reference crate's
/// one-broadcast-channel-per-scope pattern. Late joiners replay state via
/// a `state_sync` event rather than a full message backlog.
#[derive(Default)]
pub struct EventBus {
    channels: DashMap<Uuid, Arc<MeetingChannel>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, meeting_id: Uuid) -> Arc<MeetingChannel> {
        self.channels
            .entry(meeting_id)
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(1024);
                Arc::new(MeetingChannel { sender, sequence: AtomicU64::new(0) })
            })
            .clone()
    }

    pub fn subscribe(&self, meeting_id: Uuid) -> broadcast::Receiver<MeetingEvent> {
        self.channel(meeting_id).sender.subscribe()
    }

    pub fn publish(&self, meeting_id: Uuid, event_type: &'static str, agent_id: Option<String>, data: Value) -> MeetingEvent {
        let channel = self.channel(meeting_id);
        let sequence_number = channel.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = MeetingEvent {
            event_type,
            meeting_id,
            timestamp: Utc::now(),
            agent_id,
            sequence_number,
            data,
        };
        let _ = channel.sender.send(event.clone());
        event
    }

    pub fn drop_meeting(&self, meeting_id: Uuid) {
        self.channels.remove(&meeting_id);
    }
}
