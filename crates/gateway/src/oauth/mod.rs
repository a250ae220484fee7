//! OAuth 2.1 Authorization Server (C6, §4.6). Crypto primitives and the
//! signed pending-authorization blob live here; axum handlers are in
//! [`handlers`].
//!
//! The interactive login/consent screen is an excluded external
//! collaborator (the web dashboard) — everything below assumes that
//! surface has already authenticated the resource owner and forwards
//! their identity via the `X-Fleet-User-Id` header on `GET
//! /oauth/authorize` (§9 Design Notes: "keeps the authorize endpoint
//! stateless between GET-authorize and POST-consent").

pub mod handlers;

use std::collections::BTreeSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// 32 random bytes, base64url-encoded: used for authorization codes,
/// access tokens, refresh tokens, and client secrets alike.
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Stable hash of an opaque token value for storage/lookup; plaintext
/// tokens are never persisted (§3).
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Constant-time comparison of two token-shaped strings. Hashing first
/// normalizes length so `ct_eq` always compares a fixed 32 bytes,
/// avoiding a length side-channel.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

/// PKCE `S256`: `code_challenge == BASE64URL(SHA256(code_verifier))`.
pub fn pkce_challenge_from_verifier(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub fn pkce_matches(verifier: &str, challenge: &str) -> bool {
    constant_time_eq(&pkce_challenge_from_verifier(verifier), challenge)
}

/// The stateless artefact bridging `GET /oauth/authorize` to `POST
/// /oauth/authorize/consent`. Everything the consent step needs to mint a
/// code travels inside this signed blob rather than in server-side state
/// (§9 Design Notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuth {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: BTreeSet<String>,
    pub resource: String,
    pub code_challenge: Option<String>,
    pub state: Option<String>,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

const PENDING_AUTH_TTL_SECS: i64 = 600;

impl PendingAuth {
    pub fn new(
        client_id: String,
        redirect_uri: String,
        scope: BTreeSet<String>,
        resource: String,
        code_challenge: Option<String>,
        state: Option<String>,
        user_id: String,
    ) -> Self {
        Self {
            client_id,
            redirect_uri,
            scope,
            resource,
            code_challenge,
            state,
            user_id,
            expires_at: Utc::now() + chrono::Duration::seconds(PENDING_AUTH_TTL_SECS),
        }
    }

    /// HMAC-sign and base64url-encode this blob as `payload.signature`.
    pub fn seal(&self, signing_secret: &str) -> Result<String, fleet_domain::Error> {
        let payload = serde_json::to_vec(self)?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);
        let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
            .map_err(|e| fleet_domain::Error::Other(e.to_string()))?;
        mac.update(payload_b64.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{payload_b64}.{sig_b64}"))
    }

    /// Verify the HMAC and expiry, returning the embedded blob.
    pub fn open(token: &str, signing_secret: &str) -> Result<Self, fleet_domain::Error> {
        let (payload_b64, sig_b64) = token
            .split_once('.')
            .ok_or_else(|| fleet_domain::Error::InvalidRequest("malformed pending-auth token".into()))?;

        let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
            .map_err(|e| fleet_domain::Error::Other(e.to_string()))?;
        mac.update(payload_b64.as_bytes());
        let expected_sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        if !constant_time_eq(&expected_sig, sig_b64) {
            return Err(fleet_domain::Error::InvalidRequest("pending-auth signature mismatch".into()));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| fleet_domain::Error::InvalidRequest("malformed pending-auth payload".into()))?;
        let pending: PendingAuth = serde_json::from_slice(&payload)?;
        if pending.expires_at < Utc::now() {
            return Err(fleet_domain::Error::InvalidGrant("pending authorization expired".into()));
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_matches_correct_verifier() {
        let verifier = "a-fixed-length-test-code-verifier-value";
        let challenge = pkce_challenge_from_verifier(verifier);
        assert!(pkce_matches(verifier, &challenge));
        assert!(!pkce_matches("wrong-verifier", &challenge));
    }

    #[test]
    fn pending_auth_roundtrips_through_seal_and_open() {
        let pending = PendingAuth::new(
            "client-1".into(),
            "https://example.com/cb".into(),
            BTreeSet::from(["mcp:tools".to_string()]),
            "https://issuer/mcp/e1".into(),
            Some("chal".into()),
            Some("xyz".into()),
            "user-1".into(),
        );
        let sealed = pending.seal("secret").unwrap();
        let opened = PendingAuth::open(&sealed, "secret").unwrap();
        assert_eq!(opened.client_id, "client-1");
        assert_eq!(opened.user_id, "user-1");
    }

    #[test]
    fn pending_auth_rejects_tampered_signature() {
        let pending = PendingAuth::new(
            "client-1".into(),
            "https://example.com/cb".into(),
            BTreeSet::new(),
            "https://issuer/mcp/e1".into(),
            None,
            None,
            "user-1".into(),
        );
        let sealed = pending.seal("secret").unwrap();
        let err = PendingAuth::open(&sealed, "different-secret").unwrap_err();
        assert!(matches!(err, fleet_domain::Error::InvalidRequest(_)));
    }

    #[test]
    fn random_tokens_are_unique() {
        assert_ne!(random_token(), random_token());
    }
}
