//! The fleet control-plane gateway: agent registration/heartbeat over
//! WebSocket (C2-C5), the MCP Relay (C7), and the OAuth 2.1 Authorization
//! Server gating it (C6), all sharing one persistence gateway (C1) and
//! audit/rate-limit layer (C8).

pub mod agents;
pub mod api;
pub mod audit;
pub mod bootstrap;
pub mod cli;
pub mod mcp;
pub mod oauth;
pub mod persistence;
pub mod rate_limit;
pub mod state;
