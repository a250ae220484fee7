//! MCP Relay (§4.7): per-tenant `/mcp/{endpointUuid}` endpoints that expose
//! connected agents' tools to AI clients over JSON-RPC 2.0 + SSE.

pub mod handlers;
pub mod protocol;
pub mod sse;
