use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Maximum serialized payload size, per the durable-schema spec.
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Higher-priority messages sort first within a FIFO queue.
impl Priority {
    pub fn rank(self) -> u8 {
        match self {
            Priority::Urgent => 3,
            Priority::High => 2,
            Priority::Normal => 1,
            Priority::Low => 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageHeaders {
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    #[serde(default)]
    pub custom: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub protocol_name: String,
    pub protocol_version: String,
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub headers: MessageHeaders,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        match self.headers.ttl {
            Some(ttl) => self.timestamp + chrono::Duration::seconds(ttl) < at,
            None => false,
        }
    }
}

/// Validates a message payload against the non-empty / size-bound rules
/// shared by every inbound send path (point-to-point, broadcast, cross-project).
pub fn validate_payload(payload: &Map<String, Value>) -> crate::error::BrokerResult<()> {
    if payload.is_empty() {
        return Err(crate::error::BrokerError::Validation("message payload must not be empty".to_string()));
    }
    let size = serde_json::to_vec(payload).map(|v| v.len()).unwrap_or(usize::MAX);
    if size > MAX_PAYLOAD_BYTES {
        return Err(crate::error::BrokerError::Validation(format!(
            "message payload of {size} bytes exceeds the {MAX_PAYLOAD_BYTES}-byte limit"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessage {
    pub protocol_name: String,
    pub protocol_version: String,
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub headers: MessageHeaders,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageStatistics {
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_queued: u64,
    pub total_failed: u64,
    pub total_broadcast: u64,
    pub total_expired: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendResult {
    pub message_id: String,
    pub delivered: bool,
    pub queued: bool,
    pub queue_size: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastResult {
    pub message_id: String,
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}
