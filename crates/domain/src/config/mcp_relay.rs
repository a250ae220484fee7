use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP Relay (§4.7, §6.5)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRelayConfig {
    /// Size of the per-session SSE replay ring buffer.
    #[serde(default = "d_sse_buffer_events")]
    pub sse_buffer_events: usize,
    /// Maximum age of a buffered SSE event before it's evicted, in seconds.
    #[serde(default = "d_sse_buffer_ttl_secs")]
    pub sse_buffer_ttl_secs: u64,
    /// GUI-classified tool-name prefixes requiring the agent's screen to
    /// be unlocked before dispatch (§4.7).
    #[serde(default = "d_gui_tool_prefixes")]
    pub gui_tool_prefixes: Vec<String>,
}

impl Default for McpRelayConfig {
    fn default() -> Self {
        Self {
            sse_buffer_events: d_sse_buffer_events(),
            sse_buffer_ttl_secs: d_sse_buffer_ttl_secs(),
            gui_tool_prefixes: d_gui_tool_prefixes(),
        }
    }
}

fn d_sse_buffer_events() -> usize {
    256
}
fn d_sse_buffer_ttl_secs() -> u64 {
    300
}
fn d_gui_tool_prefixes() -> Vec<String> {
    [
        "screenshot",
        "click",
        "typeText",
        "pressKey",
        "ocr",
        "getUIElements",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
