//! Typed access to tenant-facing [`McpConnection`] rows (§4.1/§4.6).

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use fleet_domain::model::{ConnectionStatus, McpConnection};
use fleet_domain::{Error, Result};

use super::journal::Journal;

pub struct McpConnectionStore {
    by_id: RwLock<HashMap<String, McpConnection>>,
    by_endpoint: RwLock<HashMap<String, String>>,
    journal: Journal,
}

impl McpConnectionStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let journal = Journal::open(data_dir, "mcp_connections")?;
        let mut by_id = HashMap::new();
        let mut by_endpoint = HashMap::new();
        journal.replay::<McpConnection>(|conn| {
            by_endpoint.insert(conn.endpoint_uuid.clone(), conn.id.clone());
            by_id.insert(conn.id.clone(), conn);
        })?;
        Ok(Self {
            by_id: RwLock::new(by_id),
            by_endpoint: RwLock::new(by_endpoint),
            journal,
        })
    }

    pub fn create(&self, user_id: &str, name: &str) -> Result<McpConnection> {
        let conn = McpConnection::new(
            Uuid::new_v4().to_string(),
            user_id.to_string(),
            Uuid::new_v4().to_string(),
            name.to_string(),
        );
        self.journal.append(&conn)?;
        self.by_endpoint
            .write()
            .insert(conn.endpoint_uuid.clone(), conn.id.clone());
        self.by_id.write().insert(conn.id.clone(), conn.clone());
        Ok(conn)
    }

    pub fn get(&self, id: &str) -> Option<McpConnection> {
        self.by_id.read().get(id).cloned()
    }

    pub fn find_by_endpoint(&self, endpoint_uuid: &str) -> Option<McpConnection> {
        let id = self.by_endpoint.read().get(endpoint_uuid).cloned()?;
        self.by_id.read().get(&id).cloned()
    }

    pub fn list_by_user(&self, user_id: &str) -> Vec<McpConnection> {
        self.by_id
            .read()
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn set_status(&self, id: &str, status: ConnectionStatus) -> Result<McpConnection> {
        self.mutate(id, |c| c.status = status)
    }

    pub fn record_request(&self, id: &str) -> Result<McpConnection> {
        self.mutate(id, |c| {
            c.request_count = c.request_count.saturating_add(1);
            c.last_used_at = Some(Utc::now());
        })
    }

    fn mutate(&self, id: &str, f: impl FnOnce(&mut McpConnection)) -> Result<McpConnection> {
        let mut guard = self.by_id.write();
        let mut conn = guard
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("mcp connection {id}")))?;
        f(&mut conn);
        self.journal.append(&conn)?;
        guard.insert(id.to_string(), conn.clone());
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (McpConnectionStore, std::path::PathBuf) {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fleet-gateway-mcpstore-test-{}", Uuid::new_v4()));
        (McpConnectionStore::open(&dir).unwrap(), dir)
    }

    #[test]
    fn create_and_find_by_endpoint() {
        let (store, dir) = store();
        let conn = store.create("u1", "my laptop").unwrap();
        let found = store.find_by_endpoint(&conn.endpoint_uuid).unwrap();
        assert_eq!(found.id, conn.id);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn set_status_persists() {
        let (store, dir) = store();
        let conn = store.create("u1", "my laptop").unwrap();
        store.set_status(&conn.id, ConnectionStatus::Paused).unwrap();
        assert_eq!(store.get(&conn.id).unwrap().status, ConnectionStatus::Paused);
        std::fs::remove_dir_all(dir).ok();
    }
}
