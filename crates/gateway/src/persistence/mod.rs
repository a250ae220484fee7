//! C1 Persistence Gateway: the sole write path for `Agent`, `FingerprintChange`,
//! `CommandLogEntry`, `McpRequestLogEntry`, and `AuditEvent` rows (§4.1).
//!
//! Each sub-store owns one in-memory index backed by one append-only JSONL
//! journal (see [`journal::Journal`]); there is no shared lock across
//! stores, so operations that touch two entities (e.g. issuing a token tied
//! to an MCP connection) take the two stores' locks in a fixed order
//! (agents -> mcp -> oauth -> activity -> audit) to avoid deadlock, though
//! in practice no single request currently needs more than one store at a
//! write site.

mod activity_store;
mod agent_store;
mod audit_store;
pub mod journal;
mod mcp_store;
mod oauth_store;

pub use activity_store::ActivityStore;
pub use agent_store::AgentStore;
pub use audit_store::{AuditStore, CommandLogStore};
pub use mcp_store::McpConnectionStore;
pub use oauth_store::{OAuthClientStore, OAuthCodeStore, OAuthTokenStore};

use std::path::Path;
use std::sync::Arc;

use fleet_domain::Result;

/// Aggregates every C1 store behind one handle so `AppState` only needs to
/// carry one field for "the persistence gateway".
pub struct Persistence {
    pub agents: AgentStore,
    pub mcp_connections: McpConnectionStore,
    pub oauth_clients: OAuthClientStore,
    pub oauth_codes: OAuthCodeStore,
    pub oauth_tokens: OAuthTokenStore,
    pub activity: ActivityStore,
    pub command_log: CommandLogStore,
    /// Shared so [`crate::audit::AuditLog`]'s background writer task can
    /// hold its own handle without borrowing from the rest of the gateway.
    pub audit: Arc<AuditStore>,
}

impl Persistence {
    pub fn open(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            agents: AgentStore::open(data_dir)?,
            mcp_connections: McpConnectionStore::open(data_dir)?,
            oauth_clients: OAuthClientStore::open(data_dir)?,
            oauth_codes: OAuthCodeStore::open(data_dir)?,
            oauth_tokens: OAuthTokenStore::open(data_dir)?,
            activity: ActivityStore::open(data_dir)?,
            command_log: CommandLogStore::open(data_dir)?,
            audit: Arc::new(AuditStore::open(data_dir)?),
        })
    }
}
