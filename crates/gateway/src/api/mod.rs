//! HTTP/WebSocket router assembly. Routes are split into **public** (no
//! bearer token required — discovery documents, health, the agent
//! WebSocket, and the OAuth flow endpoints themselves, which gate access by
//! their own tokens) and **admin** (gated behind [`admin::AdminGuard`]).
//!
//! `POST /oauth/register`, `POST /oauth/token`, and `/mcp/{endpointUuid}`
//! are each exposed by their own router-builder function rather than
//! folded into [`rest_router`], because each carries a distinct rate limit
//! (§4.8) that `main` layers on independently before merging everything
//! back together. The agent WebSocket has no request-rate budget of its
//! own — it's one long-lived connection per agent, not a request burst.

pub mod admin;

use axum::routing::{get, post};
use axum::Router;

use crate::agents::ws::agent_ws;
use crate::mcp::handlers::{mcp_post, mcp_sse};
use crate::oauth::handlers as oauth;
use crate::state::AppState;

/// Dynamic client registration (§4.8 `register_per_hour`).
pub fn oauth_register_router() -> Router<AppState> {
    Router::new().route("/oauth/register", post(oauth::register_client))
}

/// The OAuth token endpoint (§4.8 `token_per_min`).
pub fn oauth_token_router() -> Router<AppState> {
    Router::new().route("/oauth/token", post(oauth::token))
}

/// The per-endpoint MCP relay surface (§4.8 `mcp_per_min_ip` /
/// `mcp_per_min_connection`).
pub fn mcp_router() -> Router<AppState> {
    Router::new().route("/mcp/:endpoint_uuid", post(mcp_post).get(mcp_sse))
}

/// Everything else: health, discovery documents, the agent WebSocket, the
/// rest of the OAuth flow, and the admin surface.
pub fn rest_router() -> Router<AppState> {
    let public = Router::new()
        .route("/healthz", get(admin::health))
        .route("/ws", get(agent_ws))
        .route(
            "/.well-known/oauth-authorization-server",
            get(oauth::authorization_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource/:endpoint_uuid",
            get(oauth::protected_resource_metadata),
        )
        .route("/oauth/authorize", get(oauth::authorize))
        .route("/oauth/authorize/consent", post(oauth::authorize_consent))
        .route("/oauth/revoke", post(oauth::revoke));

    let admin = Router::new().route("/admin/agents/:agent_id/activate", post(admin::activate));

    public.merge(admin)
}

/// The full router with no rate limiting applied, for callers (e.g. tests)
/// that don't need `main`'s per-path governor layers.
pub fn router() -> Router<AppState> {
    rest_router()
        .merge(oauth_register_router())
        .merge(oauth_token_router())
        .merge(mcp_router())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
