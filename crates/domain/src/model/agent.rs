use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an [`Agent`]. Transitions are guarded by the
/// persistence gateway via compare-and-swap on the expected `from` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentState {
    Pending,
    Active,
    Blocked,
    Expired,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Pending => "PENDING",
            AgentState::Active => "ACTIVE",
            AgentState::Blocked => "BLOCKED",
            AgentState::Expired => "EXPIRED",
        };
        write!(f, "{s}")
    }
}

/// Heartbeat cadence tier. Drives the interval handed back in
/// `heartbeat_ack` and, indirectly, quiet-hour detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerState {
    Active,
    Passive,
    Sleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OsType {
    MacOS,
    Windows,
    Linux,
}

/// Hardware and network facts reported at REGISTER / heartbeat time.
/// Mirrors the `machineInfo` frame payload (§6.1); used both to compute
/// the fingerprint and as the `Agent` row's cached live facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineFacts {
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

/// One installed agent process and its machine identity (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub owner_user_id: String,
    pub customer_id: String,
    pub machine_id: String,
    pub license_uuid: Option<String>,
    pub fingerprint: Option<String>,
    pub fingerprint_raw: Option<MachineFacts>,
    pub state: AgentState,
    pub power_state: PowerState,
    pub is_online: bool,
    pub is_screen_locked: bool,
    pub is_duplicate: bool,
    pub current_task: Option<String>,
    pub ip_address: Option<String>,
    pub local_ip_address: Option<String>,
    /// Commands queued while the agent was asleep; drained on next
    /// heartbeat by setting `targetState=ACTIVE` (§4.5).
    pub pending_commands: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(id: String, owner_user_id: String, customer_id: String, machine_id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_user_id,
            customer_id,
            machine_id,
            license_uuid: None,
            fingerprint: None,
            fingerprint_raw: None,
            state: AgentState::Pending,
            power_state: PowerState::Active,
            is_online: false,
            is_screen_locked: false,
            is_duplicate: false,
            current_task: None,
            ip_address: None,
            local_ip_address: None,
            pending_commands: 0,
            first_seen_at: now,
            last_seen_at: now,
            activated_at: None,
            blocked_at: None,
            deactivated_at: None,
        }
    }

    /// `licenseStatus` string surfaced on `registered` / `heartbeat_ack`.
    pub fn license_status(&self) -> &'static str {
        match self.state {
            AgentState::Active => "active",
            AgentState::Pending => "pending",
            AgentState::Expired => "expired",
            AgentState::Blocked => "blocked",
        }
    }
}

/// Kind of drift detected between a presented fingerprint and the stored
/// one (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintChangeType {
    IpChange,
    UsernameChange,
    HardwareChange,
    DuplicateDetected,
}

/// Append-only audit of fingerprint drift. Immutable once written (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintChange {
    pub id: String,
    pub agent_id: String,
    pub change_type: FingerprintChangeType,
    pub previous_fingerprint: Option<String>,
    pub new_fingerprint: Option<String>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}
