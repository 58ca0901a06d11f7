use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Protocol {
    pub name: String,
    pub version: String,
    pub message_schema: Value,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: ProtocolMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterProtocol {
    pub name: String,
    pub version: String,
    pub message_schema: Value,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: ProtocolMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoverProtocolsQuery {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub include_shared: bool,
}

/// A protocol shared in from another project; carries its source so callers
/// can tell a weak reference apart from a project's own record.
#[derive(Debug, Clone, Serialize)]
pub struct SharedProtocol {
    #[serde(flatten)]
    pub protocol: Protocol,
    pub source_project_id: String,
}
