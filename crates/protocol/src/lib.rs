//! Wire protocol between the control plane and an agent's WebSocket
//! connection (§6.1). JSON frames, UTF-8, one message per WebSocket text
//! frame, discriminated by `type`.

use fleet_domain::model::OsType;
use serde::{Deserialize, Serialize};

/// Maximum size of a single `response` payload before it is truncated
/// with `truncated:true` set. Keeps one oversized tool result from
/// blocking the writer task's mailbox for other commands.
pub const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineInfo {
    pub hostname: String,
    pub os_type: OsType,
    pub os_version: String,
    pub arch: String,
    pub cpu_model: String,
    pub cpu_id: String,
    pub disk_serial: String,
    pub motherboard_uuid: String,
    pub mac_address: String,
    pub total_ram_mb: u64,
    pub local_username: String,
    pub local_ip_address: String,
    #[serde(default)]
    pub os_installation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub ready: bool,
    pub screen_locked: bool,
    pub current_task: Option<String>,
    #[serde(default)]
    pub cpu_usage: Option<f32>,
    #[serde(default)]
    pub memory_usage: Option<f32>,
}

/// A tool an agent advertises at REGISTER time. The relay does not
/// validate `input_schema`; it is opaque JSON passed through to MCP
/// clients verbatim (§9 Design Notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Frames sent by an agent to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    #[serde(rename_all = "camelCase")]
    Register {
        customer_id: String,
        machine_id: String,
        fingerprint: String,
        license_uuid: Option<String>,
        machine_info: MachineInfo,
        status: AgentStatus,
        #[serde(default)]
        tools: Vec<AgentTool>,
    },
    #[serde(rename_all = "camelCase")]
    Heartbeat { status: AgentStatus },
    #[serde(rename_all = "camelCase")]
    Response {
        request_id: String,
        #[serde(default)]
        success: bool,
        #[serde(default)]
        result: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        truncated: bool,
    },
    Pong,
}

/// Frames sent by the control plane to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Registered {
        agent_id: String,
        license_status: String,
        license_uuid: Option<String>,
        license_expires_at: Option<String>,
        heartbeat_interval: u64,
        server_time: String,
    },
    #[serde(rename_all = "camelCase")]
    HeartbeatAck {
        license_status: String,
        target_state: String,
        heartbeat_interval: u64,
        pending_commands: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        wake_at: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Request {
        request_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    Error { code: String, message: String },
    #[serde(rename_all = "camelCase")]
    StateChange { target_state: String },
    Ping,
}

impl ServerFrame {
    /// Close code to send alongside (or immediately after) this frame,
    /// when the frame terminates the connection (§4.4 failure taxonomy).
    pub fn close_code(&self) -> Option<u16> {
        match self {
            ServerFrame::Error { code, .. } if code == "INVALID_REGISTRATION" => Some(4400),
            ServerFrame::Error { code, .. } if code == "LICENSE_INVALID" => Some(4401),
            ServerFrame::Error { code, .. } if code == "DUPLICATE" => Some(4402),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_roundtrips_through_json() {
        let raw = serde_json::json!({
            "type": "register",
            "customerId": "cust-1",
            "machineId": "m1",
            "fingerprint": "ab12",
            "licenseUuid": null,
            "machineInfo": {
                "hostname": "box",
                "osType": "macOS",
                "osVersion": "14.0",
                "arch": "arm64",
                "cpuModel": "M2",
                "cpuId": "cpu-1",
                "diskSerial": "disk-1",
                "motherboardUuid": "mb-1",
                "macAddress": "aa:bb",
                "totalRamMb": 16384,
                "localUsername": "alice",
                "localIpAddress": "10.0.0.5"
            },
            "status": { "ready": true, "screenLocked": false, "currentTask": null },
            "tools": []
        });
        let frame: AgentFrame = serde_json::from_value(raw).unwrap();
        match frame {
            AgentFrame::Register { customer_id, machine_id, .. } => {
                assert_eq!(customer_id, "cust-1");
                assert_eq!(machine_id, "m1");
            }
            _ => panic!("expected Register"),
        }
    }

    #[test]
    fn error_frame_maps_to_close_code() {
        let frame = ServerFrame::Error {
            code: "LICENSE_INVALID".into(),
            message: "blocked".into(),
        };
        assert_eq!(frame.close_code(), Some(4401));
    }

    #[test]
    fn heartbeat_ack_serializes_without_wake_at_when_absent() {
        let frame = ServerFrame::HeartbeatAck {
            license_status: "active".into(),
            target_state: "ACTIVE".into(),
            heartbeat_interval: 7000,
            pending_commands: false,
            wake_at: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("wakeAt"));
    }

    #[test]
    fn response_defaults_truncated_false() {
        let raw = serde_json::json!({
            "type": "response",
            "requestId": "r1",
            "success": true,
            "result": {"ok": true}
        });
        let frame: AgentFrame = serde_json::from_value(raw).unwrap();
        match frame {
            AgentFrame::Response { truncated, .. } => assert!(!truncated),
            _ => panic!("expected Response"),
        }
    }
}
