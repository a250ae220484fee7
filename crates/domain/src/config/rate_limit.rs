use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate limiting (§4.8, §6.5)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// `POST /oauth/register` cap, per IP.
    #[serde(default = "d_register_per_hour")]
    pub register_per_hour: u32,
    /// `POST /oauth/token` cap, per IP.
    #[serde(default = "d_token_per_min")]
    pub token_per_min: u32,
    /// `/mcp/{uuid}` cap per authenticated connection.
    #[serde(default = "d_mcp_per_min_connection")]
    pub mcp_per_min_connection: u32,
    /// `/mcp/{uuid}` cap per IP when unauthenticated.
    #[serde(default = "d_mcp_per_min_ip")]
    pub mcp_per_min_ip: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            register_per_hour: d_register_per_hour(),
            token_per_min: d_token_per_min(),
            mcp_per_min_connection: d_mcp_per_min_connection(),
            mcp_per_min_ip: d_mcp_per_min_ip(),
        }
    }
}

fn d_register_per_hour() -> u32 {
    10
}
fn d_token_per_min() -> u32 {
    60
}
fn d_mcp_per_min_connection() -> u32 {
    100
}
fn d_mcp_per_min_ip() -> u32 {
    20
}
