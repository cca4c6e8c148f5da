use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Mutex;

/// Source of "now" for every timestamp the engine writes.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current time truncated to whole seconds.
    fn now_to_the_second(&self) -> DateTime<Utc> {
        self.now().trunc_subsecs(0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = t;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Timelike};

    #[test]
    fn truncates_to_whole_seconds() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 7).unwrap() + Duration::milliseconds(850);
        let clock = ManualClock::new(t);
        let stamped = clock.now_to_the_second();
        assert_eq!(stamped.nanosecond(), 0);
        assert_eq!(stamped.second(), 7);
    }

    #[test]
    fn manual_clock_advances() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(t);
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), t + Duration::hours(2));
    }
}
