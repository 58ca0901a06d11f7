use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Stale,
    Disconnected,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub supported_protocols: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub supported_features: HashSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub project_id: String,
    pub connection_time: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: SessionStatus,
    pub capabilities: Capabilities,
    pub queue_size: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSession {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListSessionsQuery {
    pub status: Option<SessionStatus>,
}
