use serde::{Deserialize, Serialize};

/// Per-user schedule override (§4.5). `Custom` pins to the explicitly
/// configured window; `AlwaysActive` pins to `PowerState::Active`
/// regardless of observed activity; `AutoDetect` relies on the hourly
/// histogram; `SleepOvernight` is a canned 23:00-07:00 local window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleMode {
    AlwaysActive,
    AutoDetect,
    Custom,
    SleepOvernight,
}

impl Default for ScheduleMode {
    fn default() -> Self {
        ScheduleMode::AutoDetect
    }
}

/// Per-user 24-bucket hourly activity histogram plus the detected quiet
/// window (§3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerActivityPattern {
    pub user_id: String,
    pub hourly_activity: [u64; 24],
    pub schedule_mode: ScheduleMode,
    pub timezone: String,
    /// Explicit quiet-hour window for `ScheduleMode::Custom`, as
    /// `[start_hour, end_hour)` in local time.
    pub custom_quiet_window: Option<(u8, u8)>,
}

impl CustomerActivityPattern {
    pub fn new(user_id: String, timezone: String) -> Self {
        Self {
            user_id,
            hourly_activity: [0; 24],
            schedule_mode: ScheduleMode::AutoDetect,
            timezone,
            custom_quiet_window: None,
        }
    }

    pub fn record_activity(&mut self, local_hour: u8) {
        let idx = (local_hour % 24) as usize;
        self.hourly_activity[idx] = self.hourly_activity[idx].saturating_add(1);
    }

    /// The maximal contiguous hour window where every hour's count is
    /// below 5% of the daily maximum (§4.5, §GLOSSARY). Returns
    /// `[start, end)` in local-hour terms, wrapping past midnight.
    /// Returns `None` when there is no activity at all (nothing to
    /// compare against) or the quiet window would be the full day.
    pub fn detect_quiet_hours(&self) -> Option<(u8, u8)> {
        if self.schedule_mode == ScheduleMode::Custom {
            return self.custom_quiet_window;
        }

        let peak = *self.hourly_activity.iter().max().unwrap_or(&0);
        if peak == 0 {
            return None;
        }
        let threshold = (peak as f64 * 0.05).ceil() as u64;
        let quiet: Vec<bool> = self
            .hourly_activity
            .iter()
            .map(|&c| c <= threshold)
            .collect();

        if quiet.iter().all(|&q| q) {
            return None;
        }

        // Find the longest contiguous run of `true`, allowing wraparound
        // past midnight by scanning a doubled ring and capping length at 24.
        let doubled: Vec<bool> = quiet.iter().chain(quiet.iter()).copied().collect();
        let (mut best_start, mut best_len) = (0usize, 0usize);
        let (mut cur_start, mut cur_len) = (0usize, 0usize);
        for (i, &q) in doubled.iter().enumerate() {
            if q {
                if cur_len == 0 {
                    cur_start = i;
                }
                cur_len += 1;
                if cur_len > 24 {
                    cur_len = 24;
                }
                if cur_len > best_len {
                    best_len = cur_len;
                    best_start = cur_start;
                }
            } else {
                cur_len = 0;
            }
        }

        if best_len == 0 {
            return None;
        }
        let start = (best_start % 24) as u8;
        let end = ((best_start + best_len) % 24) as u8;
        Some((start, end))
    }

    /// Whether `local_hour` falls inside the currently-detected quiet window.
    pub fn is_quiet_hour(&self, local_hour: u8) -> bool {
        match self.schedule_mode {
            ScheduleMode::AlwaysActive => false,
            ScheduleMode::Custom => self
                .custom_quiet_window
                .is_some_and(|(s, e)| hour_in_window(local_hour, s, e)),
            ScheduleMode::AutoDetect | ScheduleMode::SleepOvernight => self
                .detect_quiet_hours()
                .is_some_and(|(s, e)| hour_in_window(local_hour, s, e)),
        }
    }
}

fn hour_in_window(hour: u8, start: u8, end: u8) -> bool {
    if start == end {
        return false;
    }
    if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_activity_means_no_quiet_window() {
        let pat = CustomerActivityPattern::new("u1".into(), "UTC".into());
        assert_eq!(pat.detect_quiet_hours(), None);
    }

    #[test]
    fn detects_simple_overnight_window() {
        let mut pat = CustomerActivityPattern::new("u1".into(), "UTC".into());
        for h in 8..20 {
            for _ in 0..100 {
                pat.record_activity(h);
            }
        }
        let (start, end) = pat.detect_quiet_hours().expect("quiet window");
        // Hours 20..8 (wrapping) should all be below 5% of the 100 peak.
        assert!(hour_in_window(22, start, end));
        assert!(!hour_in_window(12, start, end));
    }

    #[test]
    fn custom_mode_uses_explicit_window() {
        let mut pat = CustomerActivityPattern::new("u1".into(), "UTC".into());
        pat.schedule_mode = ScheduleMode::Custom;
        pat.custom_quiet_window = Some((23, 7));
        assert!(pat.is_quiet_hour(2));
        assert!(!pat.is_quiet_hour(12));
    }

    #[test]
    fn always_active_never_quiet() {
        let mut pat = CustomerActivityPattern::new("u1".into(), "UTC".into());
        pat.schedule_mode = ScheduleMode::AlwaysActive;
        for h in 0..24 {
            assert!(!pat.is_quiet_hour(h));
        }
    }
}
