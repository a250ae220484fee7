use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a tenant-facing MCP endpoint (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Active,
    Paused,
    Revoked,
}

/// A tenant-facing logical MCP endpoint, reachable at
/// `/mcp/{endpointUuid}`. `endpointUuid` is the sole tenant URL path
/// component and must never be reused across users.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpConnection {
    pub id: String,
    pub user_id: String,
    pub endpoint_uuid: String,
    pub name: String,
    pub status: ConnectionStatus,
    pub request_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl McpConnection {
    pub fn new(id: String, user_id: String, endpoint_uuid: String, name: String) -> Self {
        Self {
            id,
            user_id,
            endpoint_uuid,
            name,
            status: ConnectionStatus::Active,
            request_count: 0,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    /// The audience value tokens issued against this connection must carry:
    /// `{issuer}/mcp/{endpointUuid}`.
    pub fn audience(&self, issuer: &str) -> String {
        format!("{}/mcp/{}", issuer.trim_end_matches('/'), self.endpoint_uuid)
    }
}
