use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
    #[serde(default = "default_max_protocols")]
    pub max_protocols: u32,
    #[serde(default = "default_max_queue_size")]
    pub max_message_queue_size: usize,
    #[serde(default)]
    pub allow_cross_project: bool,
    #[serde(default = "default_true")]
    pub discoverable: bool,
}

fn default_max_sessions() -> u32 {
    1000
}
fn default_max_protocols() -> u32 {
    100
}
fn default_max_queue_size() -> usize {
    100
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            max_sessions: default_max_sessions(),
            max_protocols: default_max_protocols(),
            max_message_queue_size: default_max_queue_size(),
            allow_cross_project: false,
            discoverable: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectStatistics {
    #[serde(default)]
    pub session_count: u32,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub protocol_count: u32,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossProjectPermission {
    pub target_project_id: String,
    #[serde(default)]
    pub allowed_protocols: Vec<String>,
    #[serde(default)]
    pub message_rate_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub key_id: String,
    /// Hash of the secret half only; the plaintext `api_key` is never persisted.
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub config: ProjectConfig,
    #[serde(default)]
    pub statistics: ProjectStatistics,
    pub status: ProjectStatus,
    pub api_keys: Vec<ApiKey>,
    #[serde(default)]
    pub cross_project_permissions: Vec<CrossProjectPermission>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: Option<ProjectConfig>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub description: Option<String>,
    pub config: Option<ProjectConfig>,
    pub tags: Option<Vec<String>>,
    pub status: Option<ProjectStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListProjectsQuery {
    pub name_filter: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
    #[serde(default)]
    pub include_stats: bool,
}

/// Result of minting a project: the stored record plus the one-time plaintext key.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedProject {
    #[serde(flatten)]
    pub project: Project,
    pub plaintext_api_key: String,
}

/// Result of a key rotation: the freshly minted key(s) in plaintext.
#[derive(Debug, Clone, Serialize)]
pub struct RotatedKey {
    pub key_id: String,
    pub plaintext_api_key: String,
    pub expires_old_at: DateTime<Utc>,
}

pub const RESERVED_PROJECT_IDS: &[&str] = &["admin", "system", "__internal__"];

pub fn is_valid_project_id(id: &str) -> bool {
    if RESERVED_PROJECT_IDS.contains(&id) {
        return false;
    }
    let bytes = id.as_bytes();
    if bytes.len() < 2 {
        return false;
    }
    let first_ok = bytes[0].is_ascii_lowercase();
    let last_ok = bytes[bytes.len() - 1].is_ascii_lowercase() || bytes[bytes.len() - 1].is_ascii_digit();
    let body_ok = bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'_');
    first_ok && last_ok && body_ok
}
