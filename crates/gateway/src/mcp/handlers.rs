//! HTTP/SSE surface for C7 (§4.7): `/mcp/{endpointUuid}` accepts `POST`
//! (JSON-RPC) and `GET` (SSE). Bearer-token audience, session assignment,
//! tool aggregation/namespacing, and GUI-tool screen-lock preconditions all
//! live here.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use serde_json::{json, Value};

use fleet_domain::model::{AgentState, ConnectionStatus, McpConnection};
use fleet_domain::Error;

use crate::state::AppState;

use super::protocol::{JsonRpcRequest, JsonRpcResponse};
use super::sse::Replay;

fn unauthorized(resource: &str) -> axum::response::Response {
    let mut resp = (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "invalid or missing bearer token" })),
    )
        .into_response();
    if let Ok(value) = axum::http::HeaderValue::from_str(&format!("Bearer resource_metadata=\"{resource}\"")) {
        resp.headers_mut().insert("WWW-Authenticate", value);
    }
    resp
}

/// Validates `Authorization: Bearer <token>` against `endpoint_uuid`'s
/// audience and returns the connection it authorizes.
fn authorize_request(state: &AppState, headers: &HeaderMap, endpoint_uuid: &str) -> Result<McpConnection, axum::response::Response> {
    let issuer = &state.config.oauth.issuer_url;
    let resource_metadata_url = format!("{issuer}/.well-known/oauth-protected-resource/{endpoint_uuid}");

    let Some(connection) = state.persistence.mcp_connections.find_by_endpoint(endpoint_uuid) else {
        return Err((StatusCode::NOT_FOUND, Json(json!({ "error": "unknown endpoint" }))).into_response());
    };
    if connection.status != ConnectionStatus::Active {
        return Err((StatusCode::FORBIDDEN, Json(json!({ "error": "connection is not active" }))).into_response());
    }

    let token_plain = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if token_plain.is_empty() {
        return Err(unauthorized(&resource_metadata_url));
    }

    let token_hash = crate::oauth::hash_token(token_plain);
    let Some(access_token) = state.persistence.oauth_tokens.find_by_access_hash(&token_hash) else {
        return Err(unauthorized(&resource_metadata_url));
    };
    if !access_token.is_access_valid(chrono::Utc::now()) {
        return Err(unauthorized(&resource_metadata_url));
    }
    if access_token.audience != connection.audience(issuer) {
        return Err(unauthorized(&resource_metadata_url));
    }

    Ok(connection)
}

fn session_id_from(headers: &HeaderMap) -> String {
    headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

// ── POST /mcp/{endpointUuid} ─────────────────────────────────────────

pub async fn mcp_post(
    State(state): State<AppState>,
    Path(endpoint_uuid): Path<String>,
    headers: HeaderMap,
    Json(req): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let connection = match authorize_request(&state, &headers, &endpoint_uuid) {
        Ok(connection) => connection,
        Err(resp) => return resp,
    };
    let _ = state.persistence.mcp_connections.record_request(&connection.id);

    let session_id = session_id_from(&headers);
    let id = req.id.clone().unwrap_or(Value::Null);

    let body = match req.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": { "listChanged": false },
                    "resources": { "listChanged": false },
                    "prompts": { "listChanged": false },
                },
                "serverInfo": { "name": "fleet-mcp-relay", "version": env!("CARGO_PKG_VERSION") },
            }),
        ),
        "tools/list" => handle_tools_list(&state, &connection.user_id, id),
        "tools/call" => handle_tools_call(&state, &connection, &req.params, id).await,
        "resources/list" => JsonRpcResponse::success(id, json!({ "resources": [] })),
        "prompts/list" => JsonRpcResponse::success(id, json!({ "prompts": [] })),
        other => JsonRpcResponse::failure(id, -32601, format!("unknown method: {other}")),
    };

    let mut response = Json(body).into_response();
    if let Ok(value) = axum::http::HeaderValue::from_str(&session_id) {
        response.headers_mut().insert("mcp-session-id", value);
    }
    response
}

/// `{agentHostname}__{toolName}` namespacing applied only on a bare-name
/// collision across the owner's connected agents (§4.7).
fn handle_tools_list(state: &AppState, owner_user_id: &str, id: Value) -> JsonRpcResponse {
    let toolsets = state.registry.toolsets_for_owner(owner_user_id);

    let mut name_counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for toolset in &toolsets {
        for tool in &toolset.tools {
            *name_counts.entry(tool.name.as_str()).or_insert(0) += 1;
        }
    }

    let mut tools = Vec::new();
    for toolset in &toolsets {
        for tool in &toolset.tools {
            let name = if name_counts.get(tool.name.as_str()).copied().unwrap_or(0) > 1 {
                format!("{}__{}", toolset.hostname, tool.name)
            } else {
                tool.name.clone()
            };
            tools.push(json!({
                "name": name,
                "description": tool.description,
                "inputSchema": tool.input_schema,
            }));
        }
    }

    JsonRpcResponse::success(id, json!({ "tools": tools }))
}

async fn handle_tools_call(state: &AppState, connection: &McpConnection, params: &Value, id: Value) -> JsonRpcResponse {
    let Some(requested_name) = params.get("name").and_then(|v| v.as_str()) else {
        return JsonRpcResponse::failure(id, -32602, "missing required param: name");
    };
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let (agent_id, bare_tool_name) = match resolve_target_agent(state, &connection.user_id, requested_name) {
        Some(found) => found,
        None => return JsonRpcResponse::failure(id, -32601, format!("no agent offers tool: {requested_name}")),
    };

    if is_gui_tool(state, &bare_tool_name) {
        if let Some(agent) = state.persistence.agents.get(&agent_id) {
            if agent.is_screen_locked {
                return JsonRpcResponse::from_domain_error(id, &Error::ScreenLocked);
            }
        }
    }

    match state.persistence.agents.get(&agent_id) {
        Some(agent) if agent.state != AgentState::Active => {
            return JsonRpcResponse::from_domain_error(id, &Error::AgentNotActivated);
        }
        None => return JsonRpcResponse::from_domain_error(id, &Error::AgentOffline),
        _ => {}
    }

    state.power.touch_activity(&agent_id, chrono::Utc::now());
    if !state.registry.is_online(&agent_id) {
        // The agent isn't connected to take this call directly; record a
        // pending command so its next heartbeat reports pendingCommands=true
        // and targetState=ACTIVE, which is what actually wakes a sleeping
        // agent (§4.5) rather than this best-effort in-process broadcast.
        if let Err(err) = state.persistence.agents.increment_pending_commands(&agent_id) {
            tracing::warn!(agent_id = %agent_id, error = %err, "failed to record pending command for offline agent");
        }
        state.registry.broadcast_wake(&connection.user_id).await;
        let wake_timeout = Duration::from_millis(state.config.heartbeat.wake_timeout_ms);
        let deadline = tokio::time::Instant::now() + wake_timeout;
        while tokio::time::Instant::now() < deadline && !state.registry.is_online(&agent_id) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if !state.registry.is_online(&agent_id) {
            return JsonRpcResponse::from_domain_error(id, &Error::GatewayTimeout);
        }
    }

    match state.dispatcher.dispatch(&agent_id, &bare_tool_name, arguments).await {
        Ok(response) if response.success => JsonRpcResponse::success(id, response.result.unwrap_or(Value::Null)),
        Ok(response) => JsonRpcResponse::failure(id, -32000, response.error.unwrap_or_else(|| "tool call failed".into())),
        Err(e) => JsonRpcResponse::from_domain_error(id, &e),
    }
}

/// Strip a `{hostname}__` prefix if present and resolve to the agent that
/// advertised the tool under its bare name; otherwise resolve directly.
fn resolve_target_agent(state: &AppState, owner_user_id: &str, requested_name: &str) -> Option<(String, String)> {
    if let Some((hostname, bare)) = requested_name.split_once("__") {
        let toolsets = state.registry.toolsets_for_owner(owner_user_id);
        if let Some(toolset) = toolsets.iter().find(|t| t.hostname == hostname && t.tools.iter().any(|tool| tool.name == bare)) {
            return Some((toolset.agent_id.clone(), bare.to_string()));
        }
    }
    state
        .registry
        .find_agent_for_tool(owner_user_id, requested_name)
        .map(|agent_id| (agent_id, requested_name.to_string()))
}

fn is_gui_tool(state: &AppState, tool_name: &str) -> bool {
    state
        .config
        .mcp_relay
        .gui_tool_prefixes
        .iter()
        .any(|prefix| tool_name.starts_with(prefix.as_str()))
}

// ── GET /mcp/{endpointUuid} (SSE) ────────────────────────────────────

pub async fn mcp_sse(
    State(state): State<AppState>,
    Path(endpoint_uuid): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    let connection = match authorize_request(&state, &headers, &endpoint_uuid) {
        Ok(connection) => connection,
        Err(resp) => return resp,
    };

    let session_id = session_id_from(&headers);
    let last_event_id: Option<u64> = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    let replay_events = match last_event_id {
        Some(last_id) => match state.sse.replay_since(&session_id, last_id) {
            Replay::Events(events) => events,
            Replay::Reset => Vec::new(),
        },
        None => Vec::new(),
    };
    let mut live_rx = state.sse.subscribe(&session_id);
    let _ = connection;

    let stream = async_stream::stream! {
        for event in replay_events {
            yield to_sse_event(&event);
        }
        loop {
            match live_rx.recv().await {
                Ok(event) => yield to_sse_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    yield Ok(Event::default().event("warning").data(format!("missed {n} events")));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn to_sse_event(event: &super::sse::SseEvent) -> Result<Event, std::convert::Infallible> {
    Ok(Event::default()
        .id(event.id.to_string())
        .event(event.event)
        .data(serde_json::to_string(&event.data).unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_protocol::AgentTool;

    #[test]
    fn is_gui_tool_matches_configured_prefix() {
        let mut config = fleet_domain::config::Config::default();
        config.mcp_relay.gui_tool_prefixes = vec!["screenshot".into(), "click".into()];
        let state = test_state(config);
        assert!(is_gui_tool(&state, "screenshot_full"));
        assert!(!is_gui_tool(&state, "list_processes"));
    }

    #[test]
    fn resolve_target_agent_strips_hostname_prefix_on_collision() {
        let state = test_state(fleet_domain::config::Config::default());
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let tool = AgentTool {
            name: "take_screenshot".into(),
            description: String::new(),
            input_schema: json!({}),
        };
        state.registry.register("a1", "u1", "box1", vec![tool], tx);
        let (agent_id, bare) = resolve_target_agent(&state, "u1", "box1__take_screenshot").unwrap();
        assert_eq!(agent_id, "a1");
        assert_eq!(bare, "take_screenshot");
    }

    fn test_state(config: fleet_domain::config::Config) -> AppState {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fleet-gateway-mcphandlers-test-{}", uuid::Uuid::new_v4()));
        let persistence = std::sync::Arc::new(crate::persistence::Persistence::open(&dir).unwrap());
        let registry = std::sync::Arc::new(crate::agents::registry::AgentRegistry::new());
        let dispatcher = std::sync::Arc::new(crate::agents::dispatch::Dispatcher::new(
            registry.clone(),
            std::time::Duration::from_secs(1),
        ));
        let power = std::sync::Arc::new(crate::agents::power::PowerEngine::new(config.heartbeat.clone()));
        let audit = crate::audit::AuditLog::spawn(std::sync::Arc::new(
            crate::persistence::AuditStore::open(&dir).unwrap(),
        ));
        let sse = std::sync::Arc::new(super::super::sse::SseHub::new(
            config.mcp_relay.sse_buffer_events,
            config.mcp_relay.sse_buffer_ttl_secs,
        ));
        AppState {
            config: std::sync::Arc::new(config),
            persistence,
            registry,
            dispatcher,
            power,
            audit,
            sse,
            admin_token_hash: None,
        }
    }
}
