//! C3 Agent Registry (§4.3): the in-process authoritative map of live
//! agent connections. Registry contents are **not** authoritative for
//! persistence — on restart the registry is empty and agents repopulate it
//! as they reconnect; the `Agent` row in C1 survives regardless.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;

use fleet_protocol::{AgentTool, ServerFrame};

/// Opaque "command sender" capability C4 hands to C3 on register (§4.3,
/// §9's "arena" note: nothing outside the WebSocket task holds a direct
/// reference to the Agent row, only this sink).
pub type AgentSink = mpsc::Sender<ServerFrame>;

/// A snapshot of one connected agent's advertised tools, used to build the
/// merged `tools/list` response for an MCP session (§4.7).
#[derive(Debug, Clone)]
pub struct AgentToolset {
    pub agent_id: String,
    pub hostname: String,
    pub tools: Vec<AgentTool>,
}

struct ConnectedAgent {
    owner_user_id: String,
    hostname: String,
    tools: Vec<AgentTool>,
    sink: AgentSink,
}

/// In-memory authoritative map of live agent connections, keyed by
/// `agentId`. A second owner index keeps `listByOwner` O(1) amortized
/// rather than a full scan over every connected agent.
pub struct AgentRegistry {
    agents: parking_lot::RwLock<HashMap<String, ConnectedAgent>>,
    by_owner: parking_lot::RwLock<HashMap<String, HashSet<String>>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: parking_lot::RwLock::new(HashMap::new()),
            by_owner: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// `register(agentId, sink)` (§4.3). Replaces any previous sink for the
    /// same `agentId` — a reconnect silently supersedes a stale connection
    /// rather than being rejected, since the old socket is presumably dead.
    pub fn register(
        &self,
        agent_id: &str,
        owner_user_id: &str,
        hostname: &str,
        tools: Vec<AgentTool>,
        sink: AgentSink,
    ) {
        self.agents.write().insert(
            agent_id.to_string(),
            ConnectedAgent {
                owner_user_id: owner_user_id.to_string(),
                hostname: hostname.to_string(),
                tools,
                sink,
            },
        );
        self.by_owner
            .write()
            .entry(owner_user_id.to_string())
            .or_default()
            .insert(agent_id.to_string());
    }

    /// `lookup(agentId) -> sink?` (§4.3).
    pub fn lookup(&self, agent_id: &str) -> Option<AgentSink> {
        self.agents.read().get(agent_id).map(|c| c.sink.clone())
    }

    /// Every tool currently advertised by agents owned by `owner_user_id`,
    /// for the relay's `tools/list` (§4.7). Collision on bare tool name is
    /// resolved by the caller via `{hostname}__{toolName}` namespacing.
    pub fn toolsets_for_owner(&self, owner_user_id: &str) -> Vec<AgentToolset> {
        let agents = self.agents.read();
        self.list_by_owner(owner_user_id)
            .into_iter()
            .filter_map(|id| {
                agents.get(&id).map(|c| AgentToolset {
                    agent_id: id,
                    hostname: c.hostname.clone(),
                    tools: c.tools.clone(),
                })
            })
            .collect()
    }

    /// Which connected agent (if any), owned by `owner_user_id`, advertises
    /// a tool named `tool_name`. Used to resolve an MCP `tools/call` back to
    /// the agent that should execute it.
    pub fn find_agent_for_tool(&self, owner_user_id: &str, tool_name: &str) -> Option<String> {
        let agents = self.agents.read();
        self.list_by_owner(owner_user_id).into_iter().find(|id| {
            agents
                .get(id)
                .map(|c| c.tools.iter().any(|t| t.name == tool_name))
                .unwrap_or(false)
        })
    }

    /// `unregister(agentId)` (§4.3). Never touches the Agent row — callers
    /// are responsible for marking `isOnline=false` in C1 separately.
    pub fn unregister(&self, agent_id: &str) {
        if let Some(conn) = self.agents.write().remove(agent_id) {
            if let Some(set) = self.by_owner.write().get_mut(&conn.owner_user_id) {
                set.remove(agent_id);
            }
        }
    }

    /// `listByOwner(userId) -> [agentId]` (§4.3).
    pub fn list_by_owner(&self, owner_user_id: &str) -> Vec<String> {
        self.by_owner
            .read()
            .get(owner_user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, agent_id: &str) -> bool {
        self.agents.read().contains_key(agent_id)
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// `broadcastWake(userId)` (§4.5): best-effort delivery of a
    /// `state_change` frame to every currently-connected agent owned by
    /// `userId`. Delivery is not guaranteed — the authoritative wake
    /// mechanism is `targetState` on the next `heartbeat_ack` — so a full
    /// mailbox here is silently skipped rather than surfaced as an error.
    pub async fn broadcast_wake(&self, owner_user_id: &str) {
        let sinks: Vec<AgentSink> = {
            let agents = self.agents.read();
            self.list_by_owner(owner_user_id)
                .iter()
                .filter_map(|id| agents.get(id).map(|c| c.sink.clone()))
                .collect()
        };
        for sink in sinks {
            let _ = sink.try_send(ServerFrame::StateChange {
                target_state: "ACTIVE".to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (AgentSink, mpsc::Receiver<ServerFrame>) {
        mpsc::channel(8)
    }

    #[test]
    fn register_then_lookup() {
        let registry = AgentRegistry::new();
        let (tx, _rx) = sink();
        registry.register("a1", "u1", "box1", vec![], tx);
        assert!(registry.lookup("a1").is_some());
        assert!(registry.is_online("a1"));
    }

    #[test]
    fn unregister_removes_from_owner_index() {
        let registry = AgentRegistry::new();
        let (tx, _rx) = sink();
        registry.register("a1", "u1", "box1", vec![], tx);
        registry.unregister("a1");
        assert!(registry.lookup("a1").is_none());
        assert!(registry.list_by_owner("u1").is_empty());
    }

    #[test]
    fn list_by_owner_returns_all_agents_for_owner() {
        let registry = AgentRegistry::new();
        let (tx1, _rx1) = sink();
        let (tx2, _rx2) = sink();
        registry.register("a1", "u1", "box1", vec![], tx1);
        registry.register("a2", "u1", "box2", vec![], tx2);
        let mut ids = registry.list_by_owner("u1");
        ids.sort();
        assert_eq!(ids, vec!["a1".to_string(), "a2".to_string()]);
    }

    #[test]
    fn reconnect_replaces_previous_sink() {
        let registry = AgentRegistry::new();
        let (tx1, _rx1) = sink();
        let (tx2, _rx2) = sink();
        registry.register("a1", "u1", "box1", vec![], tx1);
        registry.register("a1", "u1", "box1", vec![], tx2);
        assert_eq!(registry.list_by_owner("u1").len(), 1);
    }

    #[tokio::test]
    async fn broadcast_wake_sends_state_change_to_every_agent() {
        let registry = AgentRegistry::new();
        let (tx, mut rx) = sink();
        registry.register("a1", "u1", "box1", vec![], tx);
        registry.broadcast_wake("u1").await;
        let frame = rx.try_recv().expect("frame sent");
        matches!(frame, ServerFrame::StateChange { .. });
    }

    #[test]
    fn find_agent_for_tool_matches_by_advertised_name() {
        let registry = AgentRegistry::new();
        let (tx, _rx) = sink();
        let tool = AgentTool {
            name: "take_screenshot".into(),
            description: String::new(),
            input_schema: serde_json::json!({}),
        };
        registry.register("a1", "u1", "box1", vec![tool], tx);
        assert_eq!(
            registry.find_agent_for_tool("u1", "take_screenshot"),
            Some("a1".to_string())
        );
        assert_eq!(registry.find_agent_for_tool("u1", "unknown_tool"), None);
    }

    #[test]
    fn toolsets_for_owner_lists_every_connected_agent() {
        let registry = AgentRegistry::new();
        let (tx, _rx) = sink();
        registry.register("a1", "u1", "box1", vec![], tx);
        let toolsets = registry.toolsets_for_owner("u1");
        assert_eq!(toolsets.len(), 1);
        assert_eq!(toolsets[0].hostname, "box1");
    }
}
