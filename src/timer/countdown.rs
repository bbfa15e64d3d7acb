use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeLevel {
    Normal,
    Warning,
    Critical,
    Expired,
}

/// Presentation thresholds, in seconds remaining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub warning_secs: u64,
    pub critical_secs: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_secs: 120,
            critical_secs: 30,
        }
    }
}

impl Thresholds {
    pub fn level(&self, remaining_secs: u64) -> TimeLevel {
        if remaining_secs == 0 {
            TimeLevel::Expired
        } else if remaining_secs < self.critical_secs {
            TimeLevel::Critical
        } else if remaining_secs < self.warning_secs {
            TimeLevel::Warning
        } else {
            TimeLevel::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub remaining_secs: u64,
    pub level: TimeLevel,
    /// True on the single observation that trips the expiry latch.
    pub expired_now: bool,
}

/// Remaining time against a server-issued deadline.
///
/// Every observation recomputes from the wall clock, so suspended or
/// throttled ticking never accumulates skew. The expiry latch trips once
/// per deadline.
#[derive(Debug, Clone)]
pub struct CountdownTimer {
    expires_at: DateTime<Utc>,
    thresholds: Thresholds,
    fired: bool,
}

impl CountdownTimer {
    pub fn new(expires_at: DateTime<Utc>, thresholds: Thresholds) -> Self {
        Self {
            expires_at,
            thresholds,
            fired: false,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Point the timer at a new deadline. Re-arming with the same deadline
    /// keeps the latch; a different one resets it. Returns whether it changed.
    pub fn set_deadline(&mut self, expires_at: DateTime<Utc>) -> bool {
        if expires_at == self.expires_at {
            return false;
        }
        self.expires_at = expires_at;
        self.fired = false;
        true
    }

    /// Whole seconds left, rounded up and clamped at zero.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.expires_at - now).num_milliseconds();
        if millis <= 0 {
            0
        } else {
            ((millis + 999) / 1000) as u64
        }
    }

    pub fn observe(&mut self, now: DateTime<Utc>) -> Tick {
        let remaining_secs = self.remaining_secs(now);
        let expired_now = remaining_secs == 0 && !self.fired;
        if expired_now {
            self.fired = true;
        }
        Tick {
            remaining_secs,
            level: self.thresholds.level(remaining_secs),
            expired_now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn deadline_in_the_past_fires_on_first_observation() {
        let mut timer = CountdownTimer::new(at(-1), Thresholds::default());
        let tick = timer.observe(at(0));
        assert!(tick.expired_now);
        assert_eq!(tick.remaining_secs, 0);
        assert_eq!(tick.level, TimeLevel::Expired);
    }

    #[test]
    fn fires_exactly_once_across_many_observations() {
        let mut timer = CountdownTimer::new(at(3), Thresholds::default());
        let fired = (0..20)
            .map(|s| timer.observe(at(s)))
            .filter(|t| t.expired_now)
            .count();
        assert_eq!(fired, 1);
        assert!(timer.has_fired());
    }

    #[test]
    fn same_deadline_keeps_latch_new_deadline_resets_it() {
        let mut timer = CountdownTimer::new(at(0), Thresholds::default());
        assert!(timer.observe(at(1)).expired_now);

        assert!(!timer.set_deadline(at(0)));
        assert!(!timer.observe(at(2)).expired_now);

        assert!(timer.set_deadline(at(10)));
        assert!(!timer.has_fired());
        assert_eq!(timer.observe(at(2)).remaining_secs, 8);
        assert!(timer.observe(at(10)).expired_now);
    }

    #[test]
    fn remaining_rounds_up_partial_seconds() {
        let timer = CountdownTimer::new(at(10), Thresholds::default());
        assert_eq!(timer.remaining_secs(at(9) + Duration::milliseconds(100)), 1);
        assert_eq!(timer.remaining_secs(at(20)), 0);
    }

    #[test]
    fn thresholds_map_to_levels() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.level(600), TimeLevel::Normal);
        assert_eq!(thresholds.level(119), TimeLevel::Warning);
        assert_eq!(thresholds.level(29), TimeLevel::Critical);
        assert_eq!(thresholds.level(0), TimeLevel::Expired);
    }
}
