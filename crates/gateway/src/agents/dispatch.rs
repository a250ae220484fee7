//! Command dispatch & correlation for C4/C7: sends a `request` frame to an
//! agent's mailbox and correlates the eventual `response` frame back to the
//! waiting caller via a oneshot channel, keyed by a server-generated
//! `requestId` (§4.4, §4.7's state machine).
//!
//! Bounded-pending limits give backpressure a concrete surface: a full
//! per-agent or global pending table returns [`fleet_domain::Error::AgentBusy`]
//! (JSON-RPC `-32001`) rather than queuing unboundedly.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use fleet_domain::{Error, Result};
use fleet_protocol::ServerFrame;

use super::registry::AgentRegistry;

struct PendingRequest {
    agent_id: String,
    reply: oneshot::Sender<AgentResponse>,
}

/// What the agent eventually sent back for a dispatched command, or what
/// the dispatcher synthesized when the agent disconnected mid-flight.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

const MAX_PENDING_PER_AGENT: usize = 50;
const MAX_PENDING_GLOBAL: usize = 1000;

/// Dispatches `request` frames to agents and correlates their `response`
/// frames. One instance is shared across all connections on this process.
pub struct Dispatcher {
    registry: std::sync::Arc<AgentRegistry>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    command_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: std::sync::Arc<AgentRegistry>, command_timeout: Duration) -> Self {
        Self {
            registry,
            pending: Mutex::new(HashMap::new()),
            command_timeout,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Dispatch `tool_name` to `agent_id`, returning the agent's response
    /// or a timeout (§4.4: "mid-task commands are not abandoned agent-side
    /// ... on timeout the handler records that the result is lost, not
    /// that execution was cancelled").
    pub async fn dispatch(&self, agent_id: &str, tool_name: &str, arguments: Value) -> Result<AgentResponse> {
        let sink = self
            .registry
            .lookup(agent_id)
            .ok_or(Error::AgentOffline)?;

        {
            let pending = self.pending.lock();
            if pending.len() >= MAX_PENDING_GLOBAL {
                return Err(Error::AgentBusy);
            }
            let per_agent = pending.values().filter(|p| p.agent_id == agent_id).count();
            if per_agent >= MAX_PENDING_PER_AGENT {
                return Err(Error::AgentBusy);
            }
        }

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            request_id.clone(),
            PendingRequest {
                agent_id: agent_id.to_string(),
                reply: tx,
            },
        );

        let frame = ServerFrame::Request {
            request_id: request_id.clone(),
            tool_name: tool_name.to_string(),
            arguments,
        };
        if sink.try_send(frame).is_err() {
            self.pending.lock().remove(&request_id);
            return Err(Error::AgentBusy);
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::GatewayTimeout),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(Error::GatewayTimeout)
            }
        }
    }

    /// Complete a pending request when the agent's `response` frame arrives.
    /// Unknown `request_id` (late or duplicate) is ignored.
    pub fn complete(&self, request_id: &str, success: bool, result: Option<Value>, error: Option<String>) {
        if let Some(pending) = self.pending.lock().remove(request_id) {
            let _ = pending.reply.send(AgentResponse { success, result, error });
        }
    }

    /// Resolve every request outstanding for `agent_id` with an
    /// agent-disconnected error. Called on socket teardown so waiters
    /// don't block for the full command timeout after the connection is
    /// already gone.
    pub fn fail_pending_for_agent(&self, agent_id: &str) -> usize {
        let mut pending = self.pending.lock();
        let ids: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.agent_id == agent_id)
            .map(|(id, _)| id.clone())
            .collect();
        let count = ids.len();
        for id in ids {
            if let Some(p) = pending.remove(&id) {
                let _ = p.reply.send(AgentResponse {
                    success: false,
                    result: None,
                    error: Some("agent disconnected".to_string()),
                });
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn dispatch_to_offline_agent_is_agent_offline() {
        let registry = Arc::new(AgentRegistry::new());
        let dispatcher = Dispatcher::new(registry, Duration::from_millis(50));
        let err = dispatcher
            .dispatch("missing", "screenshot", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AgentOffline));
    }

    #[tokio::test]
    async fn dispatch_times_out_when_agent_never_responds() {
        let registry = Arc::new(AgentRegistry::new());
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        registry.register("a1", "u1", "box1", vec![], tx);
        let dispatcher = Dispatcher::new(registry, Duration::from_millis(20));
        let result = dispatcher.dispatch("a1", "screenshot", serde_json::json!({})).await;
        assert!(matches!(result, Err(Error::GatewayTimeout)));
        assert_eq!(dispatcher.pending_count(), 0);
        rx.close();
    }

    #[tokio::test]
    async fn complete_resolves_waiting_dispatch() {
        let registry = Arc::new(AgentRegistry::new());
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        registry.register("a1", "u1", "box1", vec![], tx);
        let dispatcher = std::sync::Arc::new(Dispatcher::new(registry, Duration::from_secs(5)));

        let d2 = dispatcher.clone();
        let handle = tokio::spawn(async move { d2.dispatch("a1", "screenshot", serde_json::json!({})).await });

        let frame = rx.recv().await.expect("request frame sent");
        let request_id = match frame {
            ServerFrame::Request { request_id, .. } => request_id,
            _ => panic!("expected Request frame"),
        };
        dispatcher.complete(&request_id, true, Some(serde_json::json!({"ok": true})), None);

        let response = handle.await.unwrap().unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn fail_pending_for_agent_resolves_with_disconnect_error() {
        let registry = Arc::new(AgentRegistry::new());
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        registry.register("a1", "u1", "box1", vec![], tx);
        let dispatcher = std::sync::Arc::new(Dispatcher::new(registry, Duration::from_secs(5)));

        let d2 = dispatcher.clone();
        let handle = tokio::spawn(async move { d2.dispatch("a1", "screenshot", serde_json::json!({})).await });
        let _frame = rx.recv().await.expect("request frame sent");

        assert_eq!(dispatcher.fail_pending_for_agent("a1"), 1);
        let response = handle.await.unwrap().unwrap();
        assert!(!response.success);
    }
}
