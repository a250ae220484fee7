//! C5 Power-State & Activity Engine (§4.5): computes the next heartbeat
//! interval and target power state, and tracks owner activity for
//! quiet-hour detection.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;

use fleet_domain::config::HeartbeatConfig;
use fleet_domain::model::{CustomerActivityPattern, PowerState, ScheduleMode};

const ACTIVE_IDLE_EXIT_SECS: i64 = 5 * 60;
const PASSIVE_IDLE_EXIT_SECS: i64 = 30 * 60;

/// What the next `heartbeat_ack` should carry (§6.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerDecision {
    pub power_state: PowerState,
    pub heartbeat_interval_ms: u64,
    pub wake_at: Option<DateTime<Utc>>,
}

/// Tracks the last time each agent saw owner-level activity (a dispatched
/// command, an AI client connecting, a portal login). This is deliberately
/// kept out of the `Agent` row: it is a volatile signal, not persisted
/// state, and is naturally reconstructed as agents reconnect and commands
/// resume flowing (§5 "in-memory state ... is ephemeral").
pub struct PowerEngine {
    config: HeartbeatConfig,
    last_activity: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl PowerEngine {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_activity: RwLock::new(HashMap::new()),
        }
    }

    pub fn touch_activity(&self, agent_id: &str, at: DateTime<Utc>) {
        self.last_activity.write().insert(agent_id.to_string(), at);
    }

    pub fn forget(&self, agent_id: &str) {
        self.last_activity.write().remove(agent_id);
    }

    /// `offline_after_ms` ladder entry for the agent's *current* power
    /// state, used by the WebSocket handler to size the idle-read timeout
    /// (§5: "idle timeout of 3×heartbeatInterval").
    pub fn interval_for(&self, power_state: PowerState) -> u64 {
        match power_state {
            PowerState::Active => self.config.active_ms,
            PowerState::Passive => self.config.passive_ms,
            PowerState::Sleep => self.config.sleep_ms,
        }
    }

    /// Decide the next power state and heartbeat interval for an agent
    /// (§4.5's table). `ai_connected` is true when at least one AI client
    /// currently holds an open session against this agent's owner.
    pub fn decide(
        &self,
        agent_id: &str,
        pending_commands: u32,
        ai_connected: bool,
        pattern: &CustomerActivityPattern,
        now: DateTime<Utc>,
    ) -> PowerDecision {
        if pattern.schedule_mode == ScheduleMode::AlwaysActive {
            return self.active_decision();
        }

        if pending_commands > 0 || ai_connected {
            self.touch_activity(agent_id, now);
            return self.active_decision();
        }

        let idle_secs = self
            .last_activity
            .read()
            .get(agent_id)
            .map(|t| (now - *t).num_seconds())
            .unwrap_or(i64::MAX);

        if idle_secs <= ACTIVE_IDLE_EXIT_SECS {
            return self.active_decision();
        }

        let local_hour = local_hour(&pattern.timezone, now);
        let in_quiet_hour = local_hour.is_some_and(|h| pattern.is_quiet_hour(h));

        if in_quiet_hour || idle_secs > PASSIVE_IDLE_EXIT_SECS {
            let wake_at = local_hour
                .and_then(|_| pattern.detect_quiet_hours())
                .and_then(|(_, end)| next_occurrence_of_hour(&pattern.timezone, now, end));
            return PowerDecision {
                power_state: PowerState::Sleep,
                heartbeat_interval_ms: self.config.sleep_ms,
                wake_at,
            };
        }

        PowerDecision {
            power_state: PowerState::Passive,
            heartbeat_interval_ms: self.config.passive_ms,
            wake_at: None,
        }
    }

    fn active_decision(&self) -> PowerDecision {
        PowerDecision {
            power_state: PowerState::Active,
            heartbeat_interval_ms: self.config.active_ms,
            wake_at: None,
        }
    }
}

fn local_hour(timezone: &str, now: DateTime<Utc>) -> Option<u8> {
    use chrono::TimeZone;
    let tz = Tz::from_str(timezone).ok()?;
    Some(tz.from_utc_datetime(&now.naive_utc()).format("%H").to_string().parse().ok()?)
}

/// The next UTC instant at which `local_hour` occurs, at or after `now`.
fn next_occurrence_of_hour(timezone: &str, now: DateTime<Utc>, local_hour_target: u8) -> Option<DateTime<Utc>> {
    use chrono::{Duration, TimeZone};
    let tz = Tz::from_str(timezone).ok()?;
    let local_now = tz.from_utc_datetime(&now.naive_utc());
    let mut candidate = local_now
        .date_naive()
        .and_hms_opt(local_hour_target as u32, 0, 0)?;
    let mut candidate_tz = tz.from_local_datetime(&candidate).single()?;
    if candidate_tz <= local_now {
        candidate += Duration::days(1);
        candidate_tz = tz.from_local_datetime(&candidate).single()?;
    }
    Some(candidate_tz.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HeartbeatConfig {
        HeartbeatConfig {
            active_ms: 7000,
            passive_ms: 45000,
            sleep_ms: 450000,
            command_timeout_ms: 30000,
            wake_timeout_ms: 10000,
        }
    }

    fn pattern() -> CustomerActivityPattern {
        CustomerActivityPattern::new("u1".into(), "UTC".into())
    }

    #[test]
    fn always_active_pins_active_regardless_of_idle() {
        let engine = PowerEngine::new(config());
        let now = Utc::now();
        let mut pat = pattern();
        pat.schedule_mode = ScheduleMode::AlwaysActive;
        let decision = engine.decide("a1", 0, false, &pat, now);
        assert_eq!(decision.power_state, PowerState::Active);
    }

    #[test]
    fn pending_commands_forces_active() {
        let engine = PowerEngine::new(config());
        let decision = engine.decide("a1", 3, false, &pattern(), Utc::now());
        assert_eq!(decision.power_state, PowerState::Active);
    }

    #[test]
    fn never_active_before_defaults_to_sleep_when_idle_forever() {
        let engine = PowerEngine::new(config());
        let decision = engine.decide("a1", 0, false, &pattern(), Utc::now());
        assert_eq!(decision.power_state, PowerState::Sleep);
    }

    #[test]
    fn recent_activity_keeps_agent_active() {
        let engine = PowerEngine::new(config());
        let now = Utc::now();
        engine.touch_activity("a1", now);
        let decision = engine.decide("a1", 0, false, &pattern(), now + chrono::Duration::seconds(60));
        assert_eq!(decision.power_state, PowerState::Active);
    }

    #[test]
    fn moderate_idle_goes_passive() {
        let engine = PowerEngine::new(config());
        let now = Utc::now();
        engine.touch_activity("a1", now);
        let decision = engine.decide("a1", 0, false, &pattern(), now + chrono::Duration::minutes(10));
        assert_eq!(decision.power_state, PowerState::Passive);
    }
}
