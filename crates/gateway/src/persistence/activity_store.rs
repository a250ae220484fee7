//! Per-user activity histograms backing quiet-hour detection (§4.1/§4.5).

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;

use fleet_domain::model::{CustomerActivityPattern, ScheduleMode};
use fleet_domain::Result;

use super::journal::Journal;

pub struct ActivityStore {
    by_user: RwLock<HashMap<String, CustomerActivityPattern>>,
    journal: Journal,
}

impl ActivityStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let journal = Journal::open(data_dir, "activity")?;
        let mut by_user = HashMap::new();
        journal.replay::<CustomerActivityPattern>(|p| {
            by_user.insert(p.user_id.clone(), p);
        })?;
        Ok(Self {
            by_user: RwLock::new(by_user),
            journal,
        })
    }

    pub fn get(&self, user_id: &str) -> Option<CustomerActivityPattern> {
        self.by_user.read().get(user_id).cloned()
    }

    pub fn get_or_default(&self, user_id: &str, timezone: &str) -> CustomerActivityPattern {
        self.by_user
            .read()
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| CustomerActivityPattern::new(user_id.to_string(), timezone.to_string()))
    }

    /// `recordActivity(userId, hourBucket)` (§4.1) — bumps the bucket and
    /// persists the whole (small, 24-entry) histogram back to the journal.
    pub fn record_activity(&self, user_id: &str, timezone: &str, local_hour: u8) -> Result<CustomerActivityPattern> {
        let mut guard = self.by_user.write();
        let pattern = guard
            .entry(user_id.to_string())
            .or_insert_with(|| CustomerActivityPattern::new(user_id.to_string(), timezone.to_string()));
        pattern.record_activity(local_hour);
        self.journal.append(&*pattern)?;
        Ok(pattern.clone())
    }

    pub fn set_schedule_mode(
        &self,
        user_id: &str,
        timezone: &str,
        mode: ScheduleMode,
        custom_quiet_window: Option<(u8, u8)>,
    ) -> Result<CustomerActivityPattern> {
        let mut guard = self.by_user.write();
        let pattern = guard
            .entry(user_id.to_string())
            .or_insert_with(|| CustomerActivityPattern::new(user_id.to_string(), timezone.to_string()));
        pattern.schedule_mode = mode;
        pattern.custom_quiet_window = custom_quiet_window;
        self.journal.append(&*pattern)?;
        Ok(pattern.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn store() -> (ActivityStore, std::path::PathBuf) {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fleet-gateway-activitystore-test-{}", Uuid::new_v4()));
        (ActivityStore::open(&dir).unwrap(), dir)
    }

    #[test]
    fn record_activity_accumulates() {
        let (store, dir) = store();
        store.record_activity("u1", "UTC", 10).unwrap();
        store.record_activity("u1", "UTC", 10).unwrap();
        let pattern = store.get("u1").unwrap();
        assert_eq!(pattern.hourly_activity[10], 2);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn set_schedule_mode_persists_custom_window() {
        let (store, dir) = store();
        store
            .set_schedule_mode("u1", "UTC", ScheduleMode::Custom, Some((23, 7)))
            .unwrap();
        let pattern = store.get("u1").unwrap();
        assert_eq!(pattern.schedule_mode, ScheduleMode::Custom);
        assert_eq!(pattern.custom_quiet_window, Some((23, 7)));
        std::fs::remove_dir_all(dir).ok();
    }
}
