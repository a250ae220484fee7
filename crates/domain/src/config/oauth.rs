use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OAuth 2.1 Authorization Server (§4.6, §6.5)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Canonical issuer URL, used as the `iss` / audience prefix and in
    /// discovery documents. Must be set explicitly in production; the
    /// loopback default is only fit for local development.
    #[serde(default = "d_issuer_url")]
    pub issuer_url: String,
    /// HMAC key signing the stateless pending-authorization token carried
    /// across the authorize → consent redirect (§9 Design Notes). Must be
    /// overridden outside of local development.
    #[serde(default = "d_signing_secret")]
    pub signing_secret: String,
    #[serde(default = "d_access_token_ttl")]
    pub access_token_ttl_secs: i64,
    #[serde(default = "d_refresh_token_ttl")]
    pub refresh_token_ttl_secs: i64,
    #[serde(default = "d_auth_code_ttl")]
    pub auth_code_ttl_secs: i64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            issuer_url: d_issuer_url(),
            signing_secret: d_signing_secret(),
            access_token_ttl_secs: d_access_token_ttl(),
            refresh_token_ttl_secs: d_refresh_token_ttl(),
            auth_code_ttl_secs: d_auth_code_ttl(),
        }
    }
}

fn d_issuer_url() -> String {
    "http://127.0.0.1:3210".into()
}
fn d_signing_secret() -> String {
    "dev-insecure-signing-secret-change-me".into()
}
fn d_access_token_ttl() -> i64 {
    3_600
}
fn d_refresh_token_ttl() -> i64 {
    2_592_000
}
fn d_auth_code_ttl() -> i64 {
    600
}
