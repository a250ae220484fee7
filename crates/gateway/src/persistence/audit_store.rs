//! Append-only logs: agent command dispatches, MCP requests, and security
//! audit events (§3/§4.1/§4.8). These are write-mostly; nothing here ever
//! mutates a previously-appended row.

use std::path::Path;

use fleet_domain::model::{AuditEvent, CommandLogEntry, McpRequestLogEntry};
use fleet_domain::Result;

use super::journal::Journal;

/// `logCommand(entry)` and the MCP-request equivalent (§4.1). Kept as a
/// single store since both are pure append logs with no secondary index.
pub struct CommandLogStore {
    commands: Journal,
    mcp_requests: Journal,
}

impl CommandLogStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            commands: Journal::open(data_dir, "command_log")?,
            mcp_requests: Journal::open(data_dir, "mcp_request_log")?,
        })
    }

    pub fn log_command(&self, entry: &CommandLogEntry) -> Result<()> {
        self.commands.append(entry)
    }

    pub fn log_mcp_request(&self, entry: &McpRequestLogEntry) -> Result<()> {
        self.mcp_requests.append(entry)
    }
}

/// Security/info audit trail (§4.8). The bounded blocking-vs-drop-oldest
/// backpressure policy lives in the channel feeding this store (see
/// `crate::audit`); this type is just the durable sink.
pub struct AuditStore {
    journal: Journal,
}

impl AuditStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            journal: Journal::open(data_dir, "audit_log")?,
        })
    }

    pub fn append(&self, event: &AuditEvent) -> Result<()> {
        self.journal.append(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_domain::model::AuditSeverity;
    use uuid::Uuid;

    #[test]
    fn logs_append_without_error() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fleet-gateway-auditstore-test-{}", Uuid::new_v4()));
        let commands = CommandLogStore::open(&dir).unwrap();
        commands
            .log_command(&CommandLogEntry {
                id: Uuid::new_v4().to_string(),
                agent_id: "a1".into(),
                tool_name: "screenshot".into(),
                request_id: "r1".into(),
                duration_ms: Some(120),
                success: true,
                error_code: None,
                ip: None,
                created_at: Utc::now(),
            })
            .unwrap();

        let audit = AuditStore::open(&dir).unwrap();
        audit
            .append(&AuditEvent {
                id: Uuid::new_v4().to_string(),
                severity: AuditSeverity::Security,
                kind: "oauth_token_issued".into(),
                detail: serde_json::json!({"clientId": "c1"}),
                created_at: Utc::now(),
            })
            .unwrap();

        std::fs::remove_dir_all(dir).ok();
    }
}
