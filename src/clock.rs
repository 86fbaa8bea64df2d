//! Clock abstractions used for retry deadlines and the delayed-retry queue.
//!
//! All scheduling works on absolute [`Instant`] deadlines. A relative delay becomes a deadline
//! through [`Clock::deadline_after`], and [`Clock::time_until`] turns it back into a wait.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Far-future horizon used when `now + delay` would overflow `Instant` (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Clock abstraction so deadlines can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;

    /// Absolute deadline `delay` from now; saturates instead of overflowing.
    fn deadline_after(&self, delay: Duration) -> Instant {
        let now = self.now();
        now.checked_add(delay)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now)
    }

    /// Remaining time until `deadline`, zero once it has passed.
    fn time_until(&self, deadline: Instant) -> Duration {
        deadline.saturating_duration_since(self.now())
    }

    /// True once `now >= deadline`.
    fn is_due(&self, deadline: Instant) -> bool {
        self.now() >= deadline
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Monotonic clock backed by `Instant::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic deadline tests.
///
/// Starts at the real `Instant::now()` of construction and only moves when
/// [`ManualClock::advance`] is called.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now: Mutex::new(Instant::now()) }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        if let Some(next) = now.checked_add(by) {
            *now = next;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_round_trips_through_time_until() {
        let clock = ManualClock::new();
        let deadline = clock.deadline_after(Duration::from_millis(250));
        assert_eq!(clock.time_until(deadline), Duration::from_millis(250));
        clock.advance(Duration::from_millis(100));
        assert_eq!(clock.time_until(deadline), Duration::from_millis(150));
    }

    #[test]
    fn time_until_saturates_at_zero() {
        let clock = ManualClock::new();
        let deadline = clock.deadline_after(Duration::from_millis(10));
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.time_until(deadline), Duration::ZERO);
        assert!(clock.is_due(deadline));
    }

    #[test]
    fn is_due_is_inclusive() {
        let clock = ManualClock::new();
        let deadline = clock.deadline_after(Duration::from_millis(5));
        assert!(!clock.is_due(deadline));
        clock.advance(Duration::from_millis(5));
        assert!(clock.is_due(deadline));
    }

    #[test]
    fn huge_delay_does_not_overflow() {
        let clock = MonotonicClock;
        let deadline = clock.deadline_after(Duration::MAX);
        assert!(deadline > clock.now());
    }

    #[test]
    fn monotonic_clock_moves_forward() {
        let clock = MonotonicClock;
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now() > a);
    }
}
