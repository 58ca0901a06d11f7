use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::Capabilities;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
    Busy,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub project_id: String,
    pub nickname: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    pub status: AgentStatus,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterAgent {
    pub project_id: String,
    pub nickname: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub created_by_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedAgent {
    #[serde(flatten)]
    pub agent: Agent,
    pub plaintext_token: String,
}
