//! Shared application state handed to every axum handler and WebSocket
//! task. Construction lives in [`crate::bootstrap::build_app_state`].

use std::sync::Arc;

use fleet_domain::config::Config;

use crate::agents::dispatch::Dispatcher;
use crate::agents::power::PowerEngine;
use crate::agents::registry::AgentRegistry;
use crate::audit::AuditLog;
use crate::mcp::sse::SseHub;
use crate::persistence::Persistence;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub persistence: Arc<Persistence>,
    pub registry: Arc<AgentRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub power: Arc<PowerEngine>,
    pub audit: AuditLog,
    pub sse: Arc<SseHub>,
    /// SHA-256 of the admin bearer token read from `config.admin.token_env`
    /// at startup. `None` means the env var was unset — admin routes fall
    /// back to dev-mode (unauthenticated) rather than becoming unreachable.
    pub admin_token_hash: Option<Vec<u8>>,
}
