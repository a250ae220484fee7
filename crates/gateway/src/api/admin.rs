//! Admin surface: owner-only agent lifecycle actions (§8 scenario 1) plus a
//! health probe. Gated by [`AdminGuard`], which mirrors the bearer-token +
//! constant-time-compare pattern used for OAuth client secrets.

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use fleet_domain::model::AgentState;
use fleet_domain::Error;

use crate::state::AppState;

/// Axum extractor enforcing the admin bearer token. If
/// `config.admin.token_env` is unset at startup, `state.admin_token_hash` is
/// `None` and every request passes (dev mode).
pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected_hash = match &state.admin_token_hash {
            Some(h) => h,
            None => return Ok(AdminGuard),
        };

        let provided = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        let provided_hash = Sha256::digest(provided.as_bytes());
        if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid admin token" })),
            ));
        }
        Ok(AdminGuard)
    }
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `activate(agentId)` (§8 scenario 1): moves a `PENDING` agent to `ACTIVE`,
/// assigning its `licenseUuid` and `activatedAt` in the same step.
pub async fn activate(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    let agent = match state.persistence.agents.get(&agent_id) {
        Some(a) => a,
        None => return error_response(Error::NotFound(format!("agent {agent_id}"))),
    };
    if agent.state != AgentState::Pending {
        return error_response(Error::StaleState {
            entity: "Agent",
            id: agent_id,
            expected: "PENDING".into(),
            found: agent.state.to_string(),
        });
    }

    match state.persistence.agents.assign_license(&agent_id) {
        Ok(license_uuid) => {
            state
                .audit
                .info("agent.activated", json!({ "agentId": agent_id, "licenseUuid": license_uuid }));
            let agent = state.persistence.agents.get(&agent_id).expect("just written");
            (StatusCode::OK, Json(json!(agent))).into_response()
        }
        Err(e) => error_response(e),
    }
}

fn error_response(err: Error) -> axum::response::Response {
    let status = match err.code() {
        fleet_domain::ErrorCode::InvalidRequest | fleet_domain::ErrorCode::Duplicate => StatusCode::BAD_REQUEST,
        fleet_domain::ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        fleet_domain::ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.code(), "message": err.to_string() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_error_maps_not_found_to_400() {
        let resp = error_response(Error::NotFound("agent x".into()));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
