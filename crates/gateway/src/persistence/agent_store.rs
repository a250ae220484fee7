//! Typed access to `Agent` rows and their append-only audit trail (§4.1).
//!
//! All state transitions go through [`AgentStore::transition_state`], which
//! enforces the expected `from` state (CAS) and surfaces
//! [`fleet_domain::Error::StaleState`] on mismatch rather than silently
//! overwriting a concurrent writer. Uniqueness on `(customerId, machineId)`
//! and `licenseUuid` is enforced in [`AgentStore::find_or_create`] /
//! [`AgentStore::assign_license`].

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use fleet_domain::model::{Agent, AgentState, FingerprintChange, FingerprintChangeType, MachineFacts};
use fleet_domain::{Error, Result};

use super::journal::Journal;

struct Indices {
    by_id: HashMap<String, Agent>,
    /// `(customerId, machineId) -> agentId`
    by_customer_machine: HashMap<(String, String), String>,
    /// `licenseUuid -> agentId`
    by_license: HashMap<String, String>,
}

pub struct AgentStore {
    inner: RwLock<Indices>,
    agents_journal: Journal,
    fingerprint_journal: Journal,
}

impl AgentStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let agents_journal = Journal::open(data_dir, "agents")?;
        let fingerprint_journal = Journal::open(data_dir, "fingerprint_changes")?;

        let mut by_id = HashMap::new();
        let mut by_customer_machine = HashMap::new();
        let mut by_license = HashMap::new();
        agents_journal.replay::<Agent>(|agent| {
            by_customer_machine.insert(
                (agent.customer_id.clone(), agent.machine_id.clone()),
                agent.id.clone(),
            );
            if let Some(lic) = &agent.license_uuid {
                by_license.insert(lic.clone(), agent.id.clone());
            }
            by_id.insert(agent.id.clone(), agent);
        })?;

        Ok(Self {
            inner: RwLock::new(Indices {
                by_id,
                by_customer_machine,
                by_license,
            }),
            agents_journal,
            fingerprint_journal,
        })
    }

    pub fn get(&self, agent_id: &str) -> Option<Agent> {
        self.inner.read().by_id.get(agent_id).cloned()
    }

    pub fn find_by_customer_machine(&self, customer_id: &str, machine_id: &str) -> Option<Agent> {
        let inner = self.inner.read();
        let id = inner
            .by_customer_machine
            .get(&(customer_id.to_string(), machine_id.to_string()))?;
        inner.by_id.get(id).cloned()
    }

    pub fn find_by_license(&self, license_uuid: &str) -> Option<Agent> {
        let inner = self.inner.read();
        let id = inner.by_license.get(license_uuid)?;
        inner.by_id.get(id).cloned()
    }

    /// List every agent owned by `owner_user_id`.
    pub fn list_by_owner(&self, owner_user_id: &str) -> Vec<Agent> {
        self.inner
            .read()
            .by_id
            .values()
            .filter(|a| a.owner_user_id == owner_user_id)
            .cloned()
            .collect()
    }

    /// `findOrCreateAgent(customerId, machineId, facts)` (§4.1). Returns
    /// the existing row (unmodified beyond live facts) when one already
    /// exists for `(customerId, machineId)`, or creates a fresh PENDING row.
    pub fn find_or_create(
        &self,
        owner_user_id: &str,
        customer_id: &str,
        machine_id: &str,
    ) -> Result<(Agent, bool)> {
        let mut inner = self.inner.write();
        if let Some(id) = inner
            .by_customer_machine
            .get(&(customer_id.to_string(), machine_id.to_string()))
            .cloned()
        {
            let agent = inner.by_id.get(&id).cloned().expect("index/row mismatch");
            return Ok((agent, false));
        }

        let agent = Agent::new(
            Uuid::new_v4().to_string(),
            owner_user_id.to_string(),
            customer_id.to_string(),
            machine_id.to_string(),
        );
        self.agents_journal.append(&agent)?;
        inner
            .by_customer_machine
            .insert((customer_id.to_string(), machine_id.to_string()), agent.id.clone());
        inner.by_id.insert(agent.id.clone(), agent.clone());
        Ok((agent, true))
    }

    /// Mark an already-persisted row `isDuplicate=true` (§4.2, the
    /// "presented licenseUuid already owned by a different row" case). By
    /// the time classification runs, `find_or_create` has already created
    /// the row for this `(customerId, machineId)` pair if it was new, so
    /// the duplicate is flagged in place rather than inserted again.
    pub fn mark_duplicate(&self, agent_id: &str) -> Result<Agent> {
        self.mutate(agent_id, |agent| agent.is_duplicate = true)
    }

    /// `assignLicense(agentId) -> licenseUuid` (§4.1/§4.2). Only valid from
    /// PENDING; transitions to ACTIVE atomically with the license
    /// assignment to keep the invariant `state=ACTIVE ⇒ licenseUuid set`
    /// from ever being observable as broken.
    pub fn assign_license(&self, agent_id: &str) -> Result<String> {
        let mut inner = self.inner.write();
        let agent = inner
            .by_id
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;
        if agent.state != AgentState::Pending {
            return Err(Error::StaleState {
                entity: "Agent",
                id: agent_id.to_string(),
                expected: "PENDING".into(),
                found: agent.state.to_string(),
            });
        }

        let license_uuid = Uuid::new_v4().to_string();
        let mut updated = agent;
        updated.license_uuid = Some(license_uuid.clone());
        updated.state = AgentState::Active;
        updated.activated_at = Some(Utc::now());
        self.agents_journal.append(&updated)?;
        inner.by_license.insert(license_uuid.clone(), agent_id.to_string());
        inner.by_id.insert(agent_id.to_string(), updated);
        Ok(license_uuid)
    }

    /// `transitionState(agentId, from, to)` (§4.1) — CAS on `state`.
    pub fn transition_state(&self, agent_id: &str, from: AgentState, to: AgentState) -> Result<Agent> {
        let mut inner = self.inner.write();
        let agent = inner
            .by_id
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;
        if agent.state != from {
            return Err(Error::StaleState {
                entity: "Agent",
                id: agent_id.to_string(),
                expected: from.to_string(),
                found: agent.state.to_string(),
            });
        }
        let mut updated = agent;
        updated.state = to;
        let now = Utc::now();
        match to {
            AgentState::Blocked => updated.blocked_at = Some(now),
            AgentState::Expired => updated.deactivated_at = Some(now),
            _ => {}
        }
        self.agents_journal.append(&updated)?;
        inner.by_id.insert(agent_id.to_string(), updated.clone());
        Ok(updated)
    }

    /// `recordHeartbeat(agentId, liveFacts)` (§4.1) — last-write-wins on
    /// mutable status fields (§5's "Shared resources" note).
    pub fn record_heartbeat(
        &self,
        agent_id: &str,
        is_screen_locked: bool,
        current_task: Option<String>,
    ) -> Result<Agent> {
        self.mutate(agent_id, |agent| {
            agent.last_seen_at = Utc::now();
            agent.is_screen_locked = is_screen_locked;
            agent.current_task = current_task;
        })
    }

    pub fn mark_online(&self, agent_id: &str, online: bool) -> Result<Agent> {
        self.mutate(agent_id, |agent| {
            agent.is_online = online;
            agent.last_seen_at = Utc::now();
        })
    }

    pub fn set_power_state(&self, agent_id: &str, power_state: fleet_domain::model::PowerState) -> Result<Agent> {
        self.mutate(agent_id, |agent| agent.power_state = power_state)
    }

    /// Set the stored fingerprint + raw facts (post-classification in C2).
    pub fn set_fingerprint(&self, agent_id: &str, fingerprint: String, facts: MachineFacts) -> Result<Agent> {
        self.mutate(agent_id, |agent| {
            agent.fingerprint = Some(fingerprint.clone());
            agent.fingerprint_raw = Some(facts.clone());
            agent.ip_address = Some(facts.local_ip_address.clone());
        })
    }

    pub fn increment_pending_commands(&self, agent_id: &str) -> Result<Agent> {
        self.mutate(agent_id, |agent| {
            agent.pending_commands = agent.pending_commands.saturating_add(1);
        })
    }

    pub fn drain_pending_commands(&self, agent_id: &str) -> Result<Agent> {
        self.mutate(agent_id, |agent| agent.pending_commands = 0)
    }

    fn mutate(&self, agent_id: &str, f: impl FnOnce(&mut Agent)) -> Result<Agent> {
        let mut inner = self.inner.write();
        let mut agent = inner
            .by_id
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;
        f(&mut agent);
        self.agents_journal.append(&agent)?;
        inner.by_id.insert(agent_id.to_string(), agent.clone());
        Ok(agent)
    }

    pub fn append_fingerprint_change(
        &self,
        agent_id: &str,
        change_type: FingerprintChangeType,
        previous_fingerprint: Option<String>,
        new_fingerprint: Option<String>,
        detail: String,
    ) -> Result<FingerprintChange> {
        let change = FingerprintChange {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            change_type,
            previous_fingerprint,
            new_fingerprint,
            detail,
            created_at: Utc::now(),
        };
        self.fingerprint_journal.append(&change)?;
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_domain::model::PowerState;

    fn store() -> (AgentStore, std::path::PathBuf) {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fleet-gateway-agentstore-test-{}", Uuid::new_v4()));
        (AgentStore::open(&dir).unwrap(), dir)
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let (store, dir) = store();
        let (a1, created1) = store.find_or_create("u1", "cust-A", "m1").unwrap();
        assert!(created1);
        let (a2, created2) = store.find_or_create("u1", "cust-A", "m1").unwrap();
        assert!(!created2);
        assert_eq!(a1.id, a2.id);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn assign_license_requires_pending() {
        let (store, dir) = store();
        let (agent, _) = store.find_or_create("u1", "cust-A", "m1").unwrap();
        let license = store.assign_license(&agent.id).unwrap();
        assert!(!license.is_empty());
        let agent = store.get(&agent.id).unwrap();
        assert_eq!(agent.state, AgentState::Active);
        assert_eq!(agent.license_uuid.as_deref(), Some(license.as_str()));

        // Second assignment fails: no longer PENDING.
        let err = store.assign_license(&agent.id).unwrap_err();
        assert!(matches!(err, Error::StaleState { .. }));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn transition_state_is_cas() {
        let (store, dir) = store();
        let (agent, _) = store.find_or_create("u1", "cust-A", "m1").unwrap();
        store
            .transition_state(&agent.id, AgentState::Pending, AgentState::Blocked)
            .unwrap();
        let err = store
            .transition_state(&agent.id, AgentState::Pending, AgentState::Active)
            .unwrap_err();
        assert!(matches!(err, Error::StaleState { .. }));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn set_power_state_persists() {
        let (store, dir) = store();
        let (agent, _) = store.find_or_create("u1", "cust-A", "m1").unwrap();
        store.set_power_state(&agent.id, PowerState::Sleep).unwrap();
        assert_eq!(store.get(&agent.id).unwrap().power_state, PowerState::Sleep);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn duplicate_license_from_different_machine_is_tracked_separately() {
        let (store, dir) = store();
        let (agent, _) = store.find_or_create("u1", "cust-A", "m1").unwrap();
        let license = store.assign_license(&agent.id).unwrap();

        // The clone's (customerId, machineId) is never-before-seen, so
        // find_or_create makes a fresh PENDING row for it before
        // classification can mark it a duplicate.
        let (dup, created) = store.find_or_create("u1", "cust-A", "m2").unwrap();
        assert!(created);
        let dup = store.mark_duplicate(&dup.id).unwrap();
        assert!(dup.is_duplicate);
        assert_eq!(dup.state, AgentState::Pending);

        // Original untouched.
        let original = store.get(&agent.id).unwrap();
        assert_eq!(original.state, AgentState::Active);
        assert_eq!(original.license_uuid.as_deref(), Some(license.as_str()));
        std::fs::remove_dir_all(dir).ok();
    }
}
