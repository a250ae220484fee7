use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only record of one agent command dispatch (§3). No tokens or
/// credentials are ever logged here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandLogEntry {
    pub id: String,
    pub agent_id: String,
    pub tool_name: String,
    pub request_id: String,
    pub duration_ms: Option<u64>,
    pub success: bool,
    pub error_code: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of one MCP JSON-RPC request (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpRequestLogEntry {
    pub id: String,
    pub connection_id: String,
    pub method: String,
    pub duration_ms: Option<u64>,
    pub success: bool,
    pub error_code: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Severity used to decide whether an [`AuditEvent`] may be dropped under
/// backpressure (§4.8 / §7): security events always block rather than
/// being silently discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Security,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    pub severity: AuditSeverity,
    pub kind: String,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
