//! Wall-clock abstraction
//!
//! Date-stamped number formats read the current date on every render.
//! Going through [`Clock`] lets tests pin the date, e.g. on either side of
//! a year boundary.

use chrono::{DateTime, Local};
use parking_lot::RwLock;

/// Source of the current local date and time
pub trait Clock: Send + Sync {
    /// Current local time
    fn now(&self) -> DateTime<Local>;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that returns a settable fixed time
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Local>>,
}

impl FixedClock {
    /// Create a clock frozen at `now`
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Move the clock to `now`
    pub fn set(&self, now: DateTime<Local>) {
        *self.now.write() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    #[test]
    fn test_fixed_clock_returns_set_time() {
        let start = Local.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now().year(), 2024);

        clock.set(Local.with_ymd_and_hms(2025, 1, 1, 0, 0, 1).unwrap());
        assert_eq!(clock.now().year(), 2025);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
