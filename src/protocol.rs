use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Placeholder returned to the browser in place of the real session token.
pub const TOKEN_PLACEHOLDER: &str = "[set]";

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AboutMe {
    pub user_id: String,
    #[serde(default)]
    pub is_sys_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgWithRole {
    pub org_id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub role: String,
}

/// An orchestrator instance as listed by the backend. Fields the relay does
/// not care about are kept in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orchestrator {
    pub instance_id: String,
    pub org_id: String,
    pub name: String,
    #[serde(default)]
    pub framework_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tier: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub instance_id: String,
    pub message: String,
    pub conversation_id: Option<String>,
}

/// An out-of-band event decoded from a named SSE event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

/// One classified unit of a decoded chat stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUnit {
    Content(String),
    Event(ChatEvent),
    SessionId(String),
}

/// Health answer used when the backend cannot be reached or its body is not
/// JSON. Any JSON the backend does return is relayed as is.
pub fn unreachable_health() -> Value {
    json!({ "status": "unreachable" })
}
