//! C8's audit half: a bounded, fire-and-forget channel feeding the durable
//! [`crate::persistence::AuditStore`] (§4.8). Security events (auth
//! failures, license transitions, fingerprint changes) block the caller
//! until queued; non-security events are dropped under backpressure rather
//! than blocking a request path.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use fleet_domain::model::{AuditEvent, AuditSeverity};

use crate::persistence::AuditStore;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<AuditEvent>,
}

impl AuditLog {
    /// Spawns the background writer task and returns the handle callers
    /// use to emit events. The task runs until every `AuditLog` clone (and
    /// thus every sender) is dropped.
    pub fn spawn(store: Arc<AuditStore>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = store.append(&event) {
                    tracing::error!(error = %err, "failed to persist audit event");
                }
            }
        });
        Self { tx }
    }

    pub async fn security(&self, kind: &str, detail: serde_json::Value) {
        self.emit(AuditSeverity::Security, kind, detail).await;
    }

    pub fn info(&self, kind: &str, detail: serde_json::Value) {
        let event = AuditEvent {
            id: Uuid::new_v4().to_string(),
            severity: AuditSeverity::Info,
            kind: kind.to_string(),
            detail,
            created_at: chrono::Utc::now(),
        };
        // Non-security events never block a request path; under
        // backpressure the newest event is dropped rather than queued.
        if self.tx.try_send(event).is_err() {
            tracing::warn!(kind, "audit channel full, dropping non-security event");
        }
    }

    async fn emit(&self, severity: AuditSeverity, kind: &str, detail: serde_json::Value) {
        let event = AuditEvent {
            id: Uuid::new_v4().to_string(),
            severity,
            kind: kind.to_string(),
            detail,
            created_at: chrono::Utc::now(),
        };
        if let Err(err) = self.tx.send(event).await {
            tracing::error!(error = %err, "audit channel closed while emitting security event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn security_events_persist() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fleet-gateway-auditlog-test-{}", Uuid::new_v4()));
        let store = Arc::new(AuditStore::open(&dir).unwrap());
        let log = AuditLog::spawn(store);
        log.security("oauth_token_issued", serde_json::json!({"clientId": "c1"})).await;
        // Give the background task a chance to drain.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        std::fs::remove_dir_all(dir).ok();
    }
}
