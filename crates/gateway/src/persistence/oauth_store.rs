//! Typed access to OAuth client registrations, authorization codes, and
//! access/refresh token pairs (§4.1/§4.6). Only hashes of codes and tokens
//! are ever persisted; the plaintext value is handed to the client once and
//! never stored.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use fleet_domain::model::{AccessToken, AuthorizationCode, OAuthClient};
use fleet_domain::{Error, Result};

use super::journal::Journal;

pub struct OAuthClientStore {
    by_id: RwLock<HashMap<String, OAuthClient>>,
    journal: Journal,
}

impl OAuthClientStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let journal = Journal::open(data_dir, "oauth_clients")?;
        let mut by_id = HashMap::new();
        journal.replay::<OAuthClient>(|c| {
            by_id.insert(c.client_id.clone(), c);
        })?;
        Ok(Self {
            by_id: RwLock::new(by_id),
            journal,
        })
    }

    pub fn create(&self, client: OAuthClient) -> Result<OAuthClient> {
        self.journal.append(&client)?;
        self.by_id.write().insert(client.client_id.clone(), client.clone());
        Ok(client)
    }

    pub fn find(&self, client_id: &str) -> Option<OAuthClient> {
        self.by_id.read().get(client_id).cloned()
    }
}

/// Authorization codes, keyed by the SHA-256 hash of the opaque code value.
pub struct OAuthCodeStore {
    by_hash: RwLock<HashMap<String, AuthorizationCode>>,
    journal: Journal,
}

impl OAuthCodeStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let journal = Journal::open(data_dir, "oauth_codes")?;
        let mut by_hash = HashMap::new();
        journal.replay::<AuthorizationCode>(|c| {
            by_hash.insert(c.code_hash.clone(), c);
        })?;
        Ok(Self {
            by_hash: RwLock::new(by_hash),
            journal,
        })
    }

    pub fn create(&self, code: AuthorizationCode) -> Result<AuthorizationCode> {
        self.journal.append(&code)?;
        self.by_hash.write().insert(code.code_hash.clone(), code.clone());
        Ok(code)
    }

    pub fn find(&self, code_hash: &str) -> Option<AuthorizationCode> {
        self.by_hash.read().get(code_hash).cloned()
    }

    /// Drop expired codes from the in-memory index. The journal itself is
    /// append-only and untouched; this only bounds memory growth.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.by_hash.write();
        let before = guard.len();
        guard.retain(|_, code| code.expires_at > now);
        before - guard.len()
    }

    /// Mark a code used (single-use enforcement — §4.6's replay rejection).
    /// Fails with [`Error::InvalidGrant`] if the code is unknown or already
    /// consumed/expired, rather than silently no-op'ing.
    pub fn consume(&self, code_hash: &str, now: DateTime<Utc>) -> Result<AuthorizationCode> {
        let mut guard = self.by_hash.write();
        let mut code = guard
            .get(code_hash)
            .cloned()
            .ok_or_else(|| Error::InvalidGrant("unknown authorization code".into()))?;
        if !code.is_usable(now) {
            return Err(Error::InvalidGrant("authorization code already used or expired".into()));
        }
        code.used_at = Some(now);
        self.journal.append(&code)?;
        guard.insert(code_hash.to_string(), code.clone());
        Ok(code)
    }
}

/// Access/refresh token pairs, indexed by both hashes so revocation and
/// bearer-token lookup are both O(1).
pub struct OAuthTokenStore {
    by_access_hash: RwLock<HashMap<String, AccessToken>>,
    by_refresh_hash: RwLock<HashMap<String, String>>,
    journal: Journal,
}

impl OAuthTokenStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let journal = Journal::open(data_dir, "oauth_tokens")?;
        let mut by_access_hash = HashMap::new();
        let mut by_refresh_hash = HashMap::new();
        journal.replay::<AccessToken>(|t| {
            if let Some(refresh) = &t.refresh_token_hash {
                by_refresh_hash.insert(refresh.clone(), t.access_token_hash.clone());
            }
            by_access_hash.insert(t.access_token_hash.clone(), t);
        })?;
        Ok(Self {
            by_access_hash: RwLock::new(by_access_hash),
            by_refresh_hash: RwLock::new(by_refresh_hash),
            journal,
        })
    }

    pub fn create(&self, token: AccessToken) -> Result<AccessToken> {
        self.journal.append(&token)?;
        if let Some(refresh) = &token.refresh_token_hash {
            self.by_refresh_hash
                .write()
                .insert(refresh.clone(), token.access_token_hash.clone());
        }
        self.by_access_hash
            .write()
            .insert(token.access_token_hash.clone(), token.clone());
        Ok(token)
    }

    pub fn find_by_access_hash(&self, hash: &str) -> Option<AccessToken> {
        self.by_access_hash.read().get(hash).cloned()
    }

    pub fn find_by_refresh_hash(&self, hash: &str) -> Option<AccessToken> {
        let access_hash = self.by_refresh_hash.read().get(hash).cloned()?;
        self.by_access_hash.read().get(&access_hash).cloned()
    }

    /// Replace a token pair's hashes in place when a refresh grant rotates
    /// them (§4.6: "refresh tokens rotate on use"), preserving `issued_at`
    /// semantics by writing a new row and dropping the old index entries.
    pub fn rotate_refresh(&self, old_access_hash: &str, new_token: AccessToken) -> Result<AccessToken> {
        let mut access_guard = self.by_access_hash.write();
        let mut refresh_guard = self.by_refresh_hash.write();

        let old = access_guard
            .remove(old_access_hash)
            .ok_or_else(|| Error::InvalidGrant("unknown access token".into()))?;
        if let Some(old_refresh) = &old.refresh_token_hash {
            refresh_guard.remove(old_refresh);
        }

        self.journal.append(&new_token)?;
        if let Some(new_refresh) = &new_token.refresh_token_hash {
            refresh_guard.insert(new_refresh.clone(), new_token.access_token_hash.clone());
        }
        access_guard.insert(new_token.access_token_hash.clone(), new_token.clone());
        Ok(new_token)
    }

    /// Revoke a token pair (§4.6 `/oauth/revoke`). Idempotent: revoking an
    /// already-revoked or unknown token is not an error.
    pub fn revoke(&self, access_hash: &str) -> Result<()> {
        let mut guard = self.by_access_hash.write();
        if let Some(mut token) = guard.get(access_hash).cloned() {
            token.revoked_at = Some(Utc::now());
            self.journal.append(&token)?;
            guard.insert(access_hash.to_string(), token);
        }
        Ok(())
    }

    /// Revoke every still-valid token minted from `code_hash` (directly, or
    /// via a refresh rotation that carried the lineage forward). Used when
    /// an authorization code is replayed (§4.6): the first-issued token pair
    /// must not survive a detected replay of the code that minted it.
    pub fn revoke_by_code_hash(&self, code_hash: &str, now: DateTime<Utc>) -> usize {
        let mut guard = self.by_access_hash.write();
        let matching: Vec<String> = guard
            .values()
            .filter(|t| t.issued_from_code_hash.as_deref() == Some(code_hash) && t.revoked_at.is_none())
            .map(|t| t.access_token_hash.clone())
            .collect();
        let count = matching.len();
        for access_hash in matching {
            if let Some(mut token) = guard.get(&access_hash).cloned() {
                token.revoked_at = Some(now);
                self.journal.append(&token).ok();
                guard.insert(access_hash, token);
            }
        }
        count
    }

    /// Drop tokens whose refresh lifetime (or, for refresh-less tokens,
    /// access lifetime) has fully elapsed from the in-memory index.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut access_guard = self.by_access_hash.write();
        let before = access_guard.len();
        access_guard.retain(|_, token| token.refresh_expires_at.unwrap_or(token.access_expires_at) > now);

        let mut refresh_guard = self.by_refresh_hash.write();
        refresh_guard.retain(|_, access_hash| access_guard.contains_key(access_hash));

        before - access_guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_domain::model::TokenEndpointAuth;
    use uuid::Uuid;

    fn client_store() -> (OAuthClientStore, std::path::PathBuf) {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fleet-gateway-oauthclient-test-{}", Uuid::new_v4()));
        (OAuthClientStore::open(&dir).unwrap(), dir)
    }

    #[test]
    fn client_create_and_find() {
        let (store, dir) = client_store();
        let client = OAuthClient {
            client_id: "abc".into(),
            client_secret_hash: None,
            client_name: "test".into(),
            redirect_uris: vec!["http://localhost/cb".into()],
            token_endpoint_auth: TokenEndpointAuth::None,
            grant_types: vec!["authorization_code".into()],
            response_types: vec!["code".into()],
            created_at: Utc::now(),
        };
        store.create(client.clone()).unwrap();
        assert!(store.find("abc").is_some());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn code_consume_is_single_use() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fleet-gateway-oauthcode-test-{}", Uuid::new_v4()));
        let store = OAuthCodeStore::open(&dir).unwrap();
        let now = Utc::now();
        let code = AuthorizationCode {
            code_hash: "h1".into(),
            client_id: "c1".into(),
            user_id: "u1".into(),
            redirect_uri: "http://localhost/cb".into(),
            scope: Default::default(),
            resource: "http://issuer/mcp/e1".into(),
            code_challenge: Some("chal".into()),
            state: None,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(600),
            used_at: None,
        };
        store.create(code).unwrap();
        store.consume("h1", now).unwrap();
        let err = store.consume("h1", now).unwrap_err();
        assert!(matches!(err, Error::InvalidGrant(_)));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn revoke_by_code_hash_revokes_only_matching_tokens() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fleet-gateway-oauthtoken-revokecode-test-{}", Uuid::new_v4()));
        let store = OAuthTokenStore::open(&dir).unwrap();
        let now = Utc::now();
        let from_code = AccessToken {
            access_token_hash: "a1".into(),
            refresh_token_hash: Some("r1".into()),
            scope: Default::default(),
            audience: "http://issuer/mcp/e1".into(),
            client_id: "c1".into(),
            user_id: "u1".into(),
            connection_id: "conn1".into(),
            issued_at: now,
            access_expires_at: now + chrono::Duration::seconds(3600),
            refresh_expires_at: Some(now + chrono::Duration::days(30)),
            revoked_at: None,
            issued_from_code_hash: Some("code-h1".into()),
        };
        let unrelated = AccessToken {
            access_token_hash: "a2".into(),
            refresh_token_hash: Some("r2".into()),
            issued_from_code_hash: Some("code-h2".into()),
            ..from_code.clone()
        };
        store.create(from_code).unwrap();
        store.create(unrelated).unwrap();

        let revoked = store.revoke_by_code_hash("code-h1", now);
        assert_eq!(revoked, 1);
        assert!(store.find_by_access_hash("a1").unwrap().revoked_at.is_some());
        assert!(store.find_by_access_hash("a2").unwrap().revoked_at.is_none());

        // Idempotent: a second replay revokes nothing new.
        assert_eq!(store.revoke_by_code_hash("code-h1", now), 0);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn token_rotate_refresh_replaces_index() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fleet-gateway-oauthtoken-test-{}", Uuid::new_v4()));
        let store = OAuthTokenStore::open(&dir).unwrap();
        let now = Utc::now();
        let token = AccessToken {
            access_token_hash: "a1".into(),
            refresh_token_hash: Some("r1".into()),
            scope: Default::default(),
            audience: "http://issuer/mcp/e1".into(),
            client_id: "c1".into(),
            user_id: "u1".into(),
            connection_id: "conn1".into(),
            issued_at: now,
            access_expires_at: now + chrono::Duration::seconds(3600),
            refresh_expires_at: Some(now + chrono::Duration::days(30)),
            revoked_at: None,
            issued_from_code_hash: None,
        };
        store.create(token.clone()).unwrap();
        assert!(store.find_by_refresh_hash("r1").is_some());

        let rotated = AccessToken {
            access_token_hash: "a2".into(),
            refresh_token_hash: Some("r2".into()),
            ..token
        };
        store.rotate_refresh("a1", rotated).unwrap();
        assert!(store.find_by_access_hash("a1").is_none());
        assert!(store.find_by_refresh_hash("r1").is_none());
        assert!(store.find_by_access_hash("a2").is_some());
        assert!(store.find_by_refresh_hash("r2").is_some());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn code_evict_expired_drops_only_past_entries() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fleet-gateway-oauthcode-evict-test-{}", Uuid::new_v4()));
        let store = OAuthCodeStore::open(&dir).unwrap();
        let now = Utc::now();
        store
            .create(AuthorizationCode {
                code_hash: "expired".into(),
                client_id: "c1".into(),
                user_id: "u1".into(),
                redirect_uri: "http://localhost/cb".into(),
                scope: Default::default(),
                resource: "http://issuer/mcp/e1".into(),
                code_challenge: None,
                state: None,
                created_at: now - chrono::Duration::seconds(700),
                expires_at: now - chrono::Duration::seconds(100),
                used_at: None,
            })
            .unwrap();
        store
            .create(AuthorizationCode {
                code_hash: "live".into(),
                client_id: "c1".into(),
                user_id: "u1".into(),
                redirect_uri: "http://localhost/cb".into(),
                scope: Default::default(),
                resource: "http://issuer/mcp/e1".into(),
                code_challenge: None,
                state: None,
                created_at: now,
                expires_at: now + chrono::Duration::seconds(600),
                used_at: None,
            })
            .unwrap();
        let evicted = store.evict_expired(now);
        assert_eq!(evicted, 1);
        assert!(store.find("expired").is_none());
        assert!(store.find("live").is_some());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn token_evict_expired_drops_both_indices() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fleet-gateway-oauthtoken-evict-test-{}", Uuid::new_v4()));
        let store = OAuthTokenStore::open(&dir).unwrap();
        let now = Utc::now();
        store
            .create(AccessToken {
                access_token_hash: "a1".into(),
                refresh_token_hash: Some("r1".into()),
                scope: Default::default(),
                audience: "http://issuer/mcp/e1".into(),
                client_id: "c1".into(),
                user_id: "u1".into(),
                connection_id: "conn1".into(),
                issued_at: now - chrono::Duration::days(31),
                access_expires_at: now - chrono::Duration::days(30),
                refresh_expires_at: Some(now - chrono::Duration::days(1)),
                revoked_at: None,
                issued_from_code_hash: None,
            })
            .unwrap();
        let evicted = store.evict_expired(now);
        assert_eq!(evicted, 1);
        assert!(store.find_by_access_hash("a1").is_none());
        assert!(store.find_by_refresh_hash("r1").is_none());
        std::fs::remove_dir_all(dir).ok();
    }
}
