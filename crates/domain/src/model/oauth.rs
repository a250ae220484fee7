use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of scopes the authorization server will ever issue
/// (§4.6). Unknown scopes in a request are rejected rather than silently
/// dropped.
pub const KNOWN_SCOPES: &[&str] = &[
    "mcp:tools",
    "mcp:resources",
    "mcp:prompts",
    "mcp:agents:read",
    "mcp:agents:write",
];

pub fn default_scopes() -> BTreeSet<String> {
    ["mcp:tools", "mcp:resources", "mcp:agents:read"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuth {
    None,
    ClientSecretPost,
}

/// Dynamic Client Registration record (RFC 7591).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthClient {
    pub client_id: String,
    /// Present only for confidential clients; stored as a salted hash,
    /// never the plaintext secret.
    pub client_secret_hash: Option<String>,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub token_endpoint_auth: TokenEndpointAuth,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl OAuthClient {
    pub fn is_public(&self) -> bool {
        matches!(self.token_endpoint_auth, TokenEndpointAuth::None)
    }
}

/// One-time, 10-minute-TTL artefact binding a pending authorization to a
/// user/client/redirect/resource (§3). Stored only as a hash of the
/// opaque code value actually handed to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationCode {
    pub code_hash: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: BTreeSet<String>,
    /// The MCP connection endpoint URL this code authorises.
    pub resource: String,
    /// `None` only for confidential clients; public clients always set this.
    pub code_challenge: Option<String>,
    pub state: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl AuthorizationCode {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

/// An issued access/refresh token pair (§3). Only hashes are stored;
/// comparisons against a presented token use constant-time equality on
/// the computed hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub access_token_hash: String,
    pub refresh_token_hash: Option<String>,
    pub scope: BTreeSet<String>,
    /// The MCP endpoint URL this token is bound to; immutable for the
    /// lifetime of the token and inherited unchanged across refresh
    /// rotations.
    pub audience: String,
    pub client_id: String,
    pub user_id: String,
    pub connection_id: String,
    pub issued_at: DateTime<Utc>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Hash of the authorization code this token (or, across refresh
    /// rotations, an ancestor of it) was minted from. `None` for tokens that
    /// can't be traced to a code. Lets a replayed code revoke every token it
    /// ever produced (§4.6).
    pub issued_from_code_hash: Option<String>,
}

impl AccessToken {
    pub fn is_access_valid(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.access_expires_at > now
    }

    pub fn is_refresh_valid(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none()
            && self
                .refresh_expires_at
                .is_some_and(|exp| exp > now)
    }
}
