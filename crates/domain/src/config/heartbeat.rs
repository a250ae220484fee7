use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Heartbeat / power-state cadence (§4.5, §6.5)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval handed out while an agent is ACTIVE, in milliseconds.
    #[serde(default = "d_active_ms")]
    pub active_ms: u64,
    /// Interval handed out while an agent is PASSIVE, in milliseconds.
    #[serde(default = "d_passive_ms")]
    pub passive_ms: u64,
    /// Interval handed out while an agent is SLEEP, in milliseconds.
    #[serde(default = "d_sleep_ms")]
    pub sleep_ms: u64,
    /// Per-command dispatch timeout, in milliseconds.
    #[serde(default = "d_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// How long an MCP `tools/call` against a sleeping agent waits for
    /// the wake-triggered heartbeat before surfacing `gateway_timeout`.
    #[serde(default = "d_wake_timeout_ms")]
    pub wake_timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            active_ms: d_active_ms(),
            passive_ms: d_passive_ms(),
            sleep_ms: d_sleep_ms(),
            command_timeout_ms: d_command_timeout_ms(),
            wake_timeout_ms: d_wake_timeout_ms(),
        }
    }
}

impl HeartbeatConfig {
    /// The offline threshold for a given interval: a missed window of
    /// `3 * interval` marks the agent offline (§4.4, §8 boundary case).
    pub fn offline_after_ms(interval_ms: u64) -> u64 {
        interval_ms * 3
    }
}

fn d_active_ms() -> u64 {
    7_000
}
fn d_passive_ms() -> u64 {
    45_000
}
fn d_sleep_ms() -> u64 {
    450_000
}
fn d_command_timeout_ms() -> u64 {
    30_000
}
fn d_wake_timeout_ms() -> u64 {
    10_000
}
