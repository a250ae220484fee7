//! HTTP surface for C6 (§4.6): discovery documents, dynamic client
//! registration, the authorize/consent redirect dance, the token endpoint,
//! and revocation.

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use fleet_domain::model::{
    AccessToken, AuthorizationCode, ConnectionStatus, OAuthClient, TokenEndpointAuth, KNOWN_SCOPES,
};
use fleet_domain::Error;

use crate::state::AppState;

use super::{hash_token, pkce_matches, random_token, PendingAuth};

fn oauth_error(status: StatusCode, error: &str, description: impl Into<String>) -> impl IntoResponse {
    (
        status,
        Json(json!({ "error": error, "error_description": description.into() })),
    )
}

fn parse_scope(requested: Option<&str>) -> Result<BTreeSet<String>, String> {
    match requested {
        None => Ok(fleet_domain::model::default_scopes()),
        Some(raw) => {
            let scopes: BTreeSet<String> = raw.split_whitespace().map(|s| s.to_string()).collect();
            let unknown: Vec<&String> = scopes.iter().filter(|s| !KNOWN_SCOPES.contains(&s.as_str())).collect();
            if !unknown.is_empty() {
                return Err(format!("unknown scope(s): {unknown:?}"));
            }
            Ok(scopes)
        }
    }
}

// ── Discovery ───────────────────────────────────────────────────────

pub async fn authorization_server_metadata(State(state): State<AppState>) -> impl IntoResponse {
    let issuer = &state.config.oauth.issuer_url;
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/oauth/authorize"),
        "token_endpoint": format!("{issuer}/oauth/token"),
        "registration_endpoint": format!("{issuer}/oauth/register"),
        "revocation_endpoint": format!("{issuer}/oauth/revoke"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_post"],
        "scopes_supported": KNOWN_SCOPES,
    }))
}

pub async fn protected_resource_metadata(
    State(state): State<AppState>,
    Path(endpoint_uuid): Path<String>,
) -> impl IntoResponse {
    let issuer = &state.config.oauth.issuer_url;
    let resource = format!("{issuer}/mcp/{endpoint_uuid}");
    Json(json!({
        "resource": resource,
        "authorization_servers": [issuer],
    }))
}

// ── Dynamic client registration (RFC 7591) ──────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterClientRequest {
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    #[serde(default)]
    pub grant_types: Option<Vec<String>>,
    #[serde(default)]
    pub response_types: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct RegisterClientResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub token_endpoint_auth_method: TokenEndpointAuth,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
}

/// `redirect_uris` must be absolute, fragment-free, and `https://` unless
/// the host is a loopback address (localhost dev clients, §4.6 edge case).
fn validate_redirect_uris(uris: &[String]) -> Result<(), String> {
    if uris.is_empty() {
        return Err("redirect_uris must not be empty".into());
    }
    for uri in uris {
        let parsed = url::Url::parse(uri).map_err(|_| format!("invalid redirect_uri: {uri}"))?;
        if parsed.fragment().is_some() {
            return Err(format!("redirect_uri must not contain a fragment: {uri}"));
        }
        let is_loopback = matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1") | Some("::1"));
        if parsed.scheme() != "https" && !is_loopback {
            return Err(format!("redirect_uri must use https (except loopback): {uri}"));
        }
    }
    Ok(())
}

pub async fn register_client(
    State(state): State<AppState>,
    Json(req): Json<RegisterClientRequest>,
) -> impl IntoResponse {
    if let Err(message) = validate_redirect_uris(&req.redirect_uris) {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_client_metadata", message).into_response();
    }

    let auth_method = match req.token_endpoint_auth_method.as_deref() {
        None | Some("client_secret_post") => TokenEndpointAuth::ClientSecretPost,
        Some("none") => TokenEndpointAuth::None,
        Some(other) => {
            return oauth_error(
                StatusCode::BAD_REQUEST,
                "invalid_client_metadata",
                format!("unsupported token_endpoint_auth_method: {other}"),
            )
            .into_response()
        }
    };

    let client_id = uuid::Uuid::new_v4().to_string();
    let (client_secret_hash, client_secret_plain) = if auth_method == TokenEndpointAuth::None {
        (None, None)
    } else {
        let secret = random_token();
        (Some(hash_token(&secret)), Some(secret))
    };

    let client = OAuthClient {
        client_id: client_id.clone(),
        client_secret_hash,
        client_name: req.client_name.clone(),
        redirect_uris: req.redirect_uris.clone(),
        token_endpoint_auth: auth_method,
        grant_types: req
            .grant_types
            .unwrap_or_else(|| vec!["authorization_code".into(), "refresh_token".into()]),
        response_types: req.response_types.unwrap_or_else(|| vec!["code".into()]),
        created_at: Utc::now(),
    };

    match state.persistence.oauth_clients.create(client) {
        Ok(client) => Json(RegisterClientResponse {
            client_id: client.client_id,
            client_secret: client_secret_plain,
            client_name: client.client_name,
            redirect_uris: client.redirect_uris,
            token_endpoint_auth_method: client.token_endpoint_auth,
            grant_types: client.grant_types,
            response_types: client.response_types,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to persist oauth client registration");
            oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "registration failed").into_response()
        }
    }
}

// ── Authorize ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    #[serde(default)]
    pub scope: Option<String>,
    pub resource: String,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// Resolves the resource owner's identity from the request forwarded by the
/// (external) dashboard after it has already logged the user in — this
/// relay never renders its own login form.
fn authenticated_user_id(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("x-fleet-user-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// `GET /oauth/authorize` validates the request and, on success, returns a
/// sealed `pending_auth` token for the dashboard to render a consent screen
/// around and post back to `/oauth/authorize/consent`. It never itself
/// prompts for credentials (§4.6 Non-goals: no bundled login UI).
pub async fn authorize(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(q): Query<AuthorizeQuery>,
) -> impl IntoResponse {
    let Some(user_id) = authenticated_user_id(&headers) else {
        return oauth_error(StatusCode::UNAUTHORIZED, "login_required", "no authenticated user session").into_response();
    };

    let Some(client) = state.persistence.oauth_clients.find(&q.client_id) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_client", "unknown client_id").into_response();
    };

    if !client.redirect_uris.iter().any(|u| u == &q.redirect_uri) {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "redirect_uri does not match a registered value")
            .into_response();
    }

    if q.response_type != "code" {
        return redirect_with_error(&q.redirect_uri, q.state.as_deref(), "unsupported_response_type");
    }

    let scope = match parse_scope(q.scope.as_deref()) {
        Ok(scope) => scope,
        Err(message) => return redirect_with_error_described(&q.redirect_uri, q.state.as_deref(), "invalid_scope", &message),
    };

    if client.is_public() && q.code_challenge.is_none() {
        return redirect_with_error(&q.redirect_uri, q.state.as_deref(), "invalid_request");
    }
    if let Some(method) = &q.code_challenge_method {
        if method != "S256" {
            return redirect_with_error(&q.redirect_uri, q.state.as_deref(), "invalid_request");
        }
    }

    let connection = state
        .persistence
        .mcp_connections
        .list_by_user(&user_id)
        .into_iter()
        .find(|c| c.audience(&state.config.oauth.issuer_url) == q.resource && c.status == ConnectionStatus::Active);
    if connection.is_none() {
        return redirect_with_error(&q.redirect_uri, q.state.as_deref(), "invalid_target_uri");
    }

    let pending = PendingAuth::new(
        client.client_id.clone(),
        q.redirect_uri.clone(),
        scope,
        q.resource.clone(),
        q.code_challenge.clone(),
        q.state.clone(),
        user_id,
    );
    let sealed = match pending.seal(&state.config.oauth.signing_secret) {
        Ok(sealed) => sealed,
        Err(e) => {
            tracing::error!(error = %e, "failed to seal pending authorization");
            return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "internal error").into_response();
        }
    };

    Json(json!({
        "pending_auth": sealed,
        "client_name": client.client_name,
        "scope": pending_scope_list(&q.scope),
    }))
    .into_response()
}

fn pending_scope_list(scope: &Option<String>) -> Vec<String> {
    scope
        .as_deref()
        .map(|s| s.split_whitespace().map(|x| x.to_string()).collect())
        .unwrap_or_else(|| fleet_domain::model::default_scopes().into_iter().collect())
}

fn redirect_with_error(redirect_uri: &str, state: Option<&str>, error: &str) -> axum::response::Response {
    redirect_with_error_described(redirect_uri, state, error, error)
}

fn redirect_with_error_described(redirect_uri: &str, state: Option<&str>, error: &str, description: &str) -> axum::response::Response {
    let mut url = match url::Url::parse(redirect_uri) {
        Ok(url) => url,
        Err(_) => return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "malformed redirect_uri").into_response(),
    };
    url.query_pairs_mut().append_pair("error", error);
    url.query_pairs_mut().append_pair("error_description", description);
    if let Some(state) = state {
        url.query_pairs_mut().append_pair("state", state);
    }
    Redirect::to(url.as_str()).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ConsentRequest {
    pub pending_auth: String,
    pub approve: bool,
}

/// `POST /oauth/authorize/consent`: mints the authorization code and
/// redirects back to the client's `redirect_uri` (§4.6). The resource
/// owner's identity was already embedded in the pending-auth blob at `GET
/// /oauth/authorize` time, so this step is a bare approve/deny signal.
pub async fn authorize_consent(State(state): State<AppState>, Json(req): Json<ConsentRequest>) -> impl IntoResponse {
    let pending = match PendingAuth::open(&req.pending_auth, &state.config.oauth.signing_secret) {
        Ok(pending) => pending,
        Err(e) => return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", e.to_string()).into_response(),
    };

    if !req.approve {
        return redirect_with_error(&pending.redirect_uri, pending.state.as_deref(), "access_denied");
    }

    let now = Utc::now();
    let code_plain = random_token();
    let code = AuthorizationCode {
        code_hash: hash_token(&code_plain),
        client_id: pending.client_id,
        user_id: pending.user_id,
        redirect_uri: pending.redirect_uri.clone(),
        scope: pending.scope,
        resource: pending.resource,
        code_challenge: pending.code_challenge,
        state: pending.state.clone(),
        created_at: now,
        expires_at: now + chrono::Duration::seconds(state.config.oauth.auth_code_ttl_secs),
        used_at: None,
    };

    if let Err(e) = state.persistence.oauth_codes.create(code) {
        tracing::error!(error = %e, "failed to persist authorization code");
        return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "internal error").into_response();
    }

    let mut url = match url::Url::parse(&pending.redirect_uri) {
        Ok(url) => url,
        Err(_) => return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "malformed redirect_uri").into_response(),
    };
    url.query_pairs_mut().append_pair("code", &code_plain);
    if let Some(state) = &pending.state {
        url.query_pairs_mut().append_pair("state", state);
    }
    Redirect::to(url.as_str()).into_response()
}

// ── Token ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

fn authenticate_client(state: &AppState, client_id: &str, client_secret: Option<&str>) -> Result<OAuthClient, &'static str> {
    let client = state.persistence.oauth_clients.find(client_id).ok_or("invalid client_id")?;
    match (&client.client_secret_hash, client.is_public()) {
        (_, true) => Ok(client),
        (Some(expected_hash), false) => {
            let provided = client_secret.ok_or("client_secret required")?;
            if super::constant_time_eq(&hash_token(provided), expected_hash) {
                Ok(client)
            } else {
                Err("invalid client_secret")
            }
        }
        (None, false) => Err("client is confidential but has no secret on record"),
    }
}

pub async fn token(State(state): State<AppState>, axum::extract::Form(req): axum::extract::Form<TokenRequest>) -> impl IntoResponse {
    let client = match authenticate_client(&state, &req.client_id, req.client_secret.as_deref()) {
        Ok(client) => client,
        Err(message) => return oauth_error(StatusCode::UNAUTHORIZED, "invalid_client", message).into_response(),
    };

    match req.grant_type.as_str() {
        "authorization_code" => authorization_code_grant(&state, &client, req).await,
        "refresh_token" => refresh_token_grant(&state, &client, req).await,
        other => {
            oauth_error(StatusCode::BAD_REQUEST, "unsupported_grant_type", format!("unsupported grant_type: {other}")).into_response()
        }
    }
}

async fn authorization_code_grant(state: &AppState, client: &OAuthClient, req: TokenRequest) -> axum::response::Response {
    let (Some(code_plain), Some(redirect_uri)) = (req.code, req.redirect_uri) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "code and redirect_uri are required").into_response();
    };

    let code_hash = hash_token(&code_plain);
    let code = match state.persistence.oauth_codes.consume(&code_hash, Utc::now()) {
        Ok(code) => code,
        Err(Error::InvalidGrant(message)) => {
            // A replay of an already-used code revokes whatever it minted
            // the first time, per the authorization server's replay defence.
            if state.persistence.oauth_codes.find(&code_hash).is_some_and(|c| c.used_at.is_some()) {
                let revoked = state.persistence.oauth_tokens.revoke_by_code_hash(&code_hash, Utc::now());
                if revoked > 0 {
                    tracing::warn!(revoked, "authorization code replay detected, revoked tokens issued from it");
                }
            }
            return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", message).into_response();
        }
        Err(e) => return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", e.to_string()).into_response(),
    };

    if code.client_id != client.client_id || code.redirect_uri != redirect_uri {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "code does not match client_id or redirect_uri").into_response();
    }

    if let Some(challenge) = &code.code_challenge {
        let Some(verifier) = &req.code_verifier else {
            return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "code_verifier required").into_response();
        };
        if !pkce_matches(verifier, challenge) {
            return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "code_verifier does not match code_challenge").into_response();
        }
    }

    let Some(connection) = state
        .persistence
        .mcp_connections
        .list_by_user(&code.user_id)
        .into_iter()
        .find(|c| c.audience(&state.config.oauth.issuer_url) == code.resource)
    else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_target_uri", "resource no longer has an active connection").into_response();
    };

    mint_token_response(state, client, code.user_id, connection.id, code.scope, code.resource, Some(code_hash))
}

async fn refresh_token_grant(state: &AppState, client: &OAuthClient, req: TokenRequest) -> axum::response::Response {
    let Some(refresh_plain) = req.refresh_token else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "refresh_token is required").into_response();
    };

    let Some(existing) = state.persistence.oauth_tokens.find_by_refresh_hash(&hash_token(&refresh_plain)) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "unknown refresh_token").into_response();
    };

    if !existing.is_refresh_valid(Utc::now()) {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "refresh_token expired or revoked").into_response();
    }
    if existing.client_id != client.client_id {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "refresh_token was not issued to this client").into_response();
    }

    let now = Utc::now();
    let access_plain = random_token();
    let refresh_plain_new = random_token();
    let rotated = AccessToken {
        access_token_hash: hash_token(&access_plain),
        refresh_token_hash: Some(hash_token(&refresh_plain_new)),
        scope: existing.scope.clone(),
        audience: existing.audience.clone(),
        client_id: existing.client_id.clone(),
        user_id: existing.user_id.clone(),
        connection_id: existing.connection_id.clone(),
        issued_at: now,
        access_expires_at: now + chrono::Duration::seconds(state.config.oauth.access_token_ttl_secs),
        refresh_expires_at: Some(now + chrono::Duration::seconds(state.config.oauth.refresh_token_ttl_secs)),
        revoked_at: None,
        issued_from_code_hash: existing.issued_from_code_hash.clone(),
    };

    match state.persistence.oauth_tokens.rotate_refresh(&existing.access_token_hash, rotated.clone()) {
        Ok(token) => Json(token_response_body(&access_plain, &refresh_plain_new, &token)).into_response(),
        Err(e) => oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", e.to_string()).into_response(),
    }
}

fn mint_token_response(
    state: &AppState,
    client: &OAuthClient,
    user_id: String,
    connection_id: String,
    scope: BTreeSet<String>,
    audience: String,
    issued_from_code_hash: Option<String>,
) -> axum::response::Response {
    let now = Utc::now();
    let access_plain = random_token();
    let refresh_plain = random_token();
    let token = AccessToken {
        access_token_hash: hash_token(&access_plain),
        refresh_token_hash: Some(hash_token(&refresh_plain)),
        scope,
        audience,
        client_id: client.client_id.clone(),
        user_id,
        connection_id,
        issued_at: now,
        access_expires_at: now + chrono::Duration::seconds(state.config.oauth.access_token_ttl_secs),
        refresh_expires_at: Some(now + chrono::Duration::seconds(state.config.oauth.refresh_token_ttl_secs)),
        revoked_at: None,
        issued_from_code_hash,
    };

    match state.persistence.oauth_tokens.create(token.clone()) {
        Ok(token) => Json(token_response_body(&access_plain, &refresh_plain, &token)).into_response(),
        Err(e) => oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", e.to_string()).into_response(),
    }
}

fn token_response_body(access_plain: &str, refresh_plain: &str, token: &AccessToken) -> serde_json::Value {
    json!({
        "access_token": access_plain,
        "token_type": "Bearer",
        "expires_in": (token.access_expires_at - token.issued_at).num_seconds(),
        "refresh_token": refresh_plain,
        "scope": token.scope.iter().cloned().collect::<Vec<_>>().join(" "),
    })
}

// ── Revoke ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
    #[serde(default)]
    pub token_type_hint: Option<String>,
}

/// `POST /oauth/revoke` (§4.6): idempotent regardless of whether `token` is
/// an access or refresh token, or unknown entirely (RFC 7009 §2.2).
pub async fn revoke(State(state): State<AppState>, axum::extract::Form(req): axum::extract::Form<RevokeRequest>) -> impl IntoResponse {
    let candidate_hash = hash_token(&req.token);

    let access_hash = if state.persistence.oauth_tokens.find_by_access_hash(&candidate_hash).is_some() {
        Some(candidate_hash.clone())
    } else {
        state
            .persistence
            .oauth_tokens
            .find_by_refresh_hash(&candidate_hash)
            .map(|t| t.access_token_hash)
    };

    if let Some(access_hash) = access_hash {
        if let Err(e) = state.persistence.oauth_tokens.revoke(&access_hash) {
            tracing::error!(error = %e, "failed to revoke token");
            return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "internal error").into_response();
        }
    }

    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_redirect_uris_rejects_fragment() {
        let err = validate_redirect_uris(&["https://example.com/cb#frag".to_string()]).unwrap_err();
        assert!(err.contains("fragment"));
    }

    #[test]
    fn validate_redirect_uris_allows_loopback_http() {
        assert!(validate_redirect_uris(&["http://localhost:8080/cb".to_string()]).is_ok());
    }

    #[test]
    fn validate_redirect_uris_rejects_non_https_non_loopback() {
        let err = validate_redirect_uris(&["http://example.com/cb".to_string()]).unwrap_err();
        assert!(err.contains("https"));
    }

    #[test]
    fn parse_scope_rejects_unknown_scope() {
        assert!(parse_scope(Some("mcp:tools made_up_scope")).is_err());
    }

    #[test]
    fn parse_scope_defaults_when_absent() {
        let scope = parse_scope(None).unwrap();
        assert!(scope.contains("mcp:tools"));
    }
}
