//! Monotonic deadlines behind an injectable clock source.
//!
//! Sessions hold an `Arc<dyn Clock>` and stamp every deadline from it, so
//! tests can substitute a [`FakeClock`] and drive time by hand. Monotonic
//! time is expressed as a [`Duration`] since the clock's own epoch; it never
//! goes backwards and has no relation to wall-clock time.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of monotonic time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic time elapsed since this clock's epoch.
    fn now(&self) -> Duration;
}

/// Production clock anchored to [`Instant`] at construction.
#[derive(Debug)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Shared handle, the form sessions hold.
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Deterministic test clock advanced by hand.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: Mutex<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: Duration) {
        *self.now.lock() = to;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

/// A point in monotonic time with a distinct unset state.
///
/// An unset deadline never compares as passed, which lets "no timeout" be
/// carried in the same value as a live deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline(Option<Duration>);

impl Deadline {
    pub const UNSET: Deadline = Deadline(None);

    /// Deadline at an absolute monotonic time.
    pub fn at(when: Duration) -> Self {
        Deadline(Some(when))
    }

    /// Deadline `delay` from the clock's current time.
    pub fn after(clock: &dyn Clock, delay: Duration) -> Self {
        Deadline(Some(clock.now() + delay))
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    pub fn unset(&mut self) {
        self.0 = None;
    }

    pub fn set(&mut self, when: Duration) {
        self.0 = Some(when);
    }

    /// `base + delay`, exact to the resolution of [`Duration`].
    pub fn set_delay(&mut self, base: Duration, delay: Duration) {
        self.0 = Some(base + delay);
    }

    /// Whole seconds from the deadline to `now`; negative while the deadline
    /// lies in the future. `None` when unset.
    pub fn elapsed_secs(&self, now: Duration) -> Option<i64> {
        let when = self.0?;
        let diff = now.as_micros() as i128 - when.as_micros() as i128;
        Some(diff.div_euclid(1_000_000) as i64)
    }

    /// False when unset; otherwise true iff the deadline is strictly before
    /// `now`.
    pub fn has_passed(&self, now: Duration) -> bool {
        matches!(self.0, Some(when) if when < now)
    }

    /// Adopt `candidate` iff it is set and earlier than (or replacing an
    /// unset) `self` — the minimum wake deadline across pending timers.
    pub fn reduce_to(&mut self, candidate: Deadline) {
        if let Some(when) = candidate.0 {
            if self.0.map_or(true, |cur| when < cur) {
                self.0 = Some(when);
            }
        }
    }

    /// Time left until the deadline, zero once passed; `None` when unset.
    pub fn remaining(&self, now: Duration) -> Option<Duration> {
        self.0.map(|when| when.saturating_sub(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    #[test]
    fn unset_never_passes() {
        let d = Deadline::UNSET;
        assert!(!d.is_set());
        assert!(!d.has_passed(Duration::ZERO));
        assert!(!d.has_passed(Duration::from_secs(u32::MAX as u64)));
        assert_eq!(d.remaining(SEC), None);
        assert_eq!(d.elapsed_secs(SEC), None);
    }

    #[test]
    fn passes_only_strictly_after() {
        let d = Deadline::at(5 * SEC);
        assert!(!d.has_passed(4 * SEC));
        assert!(!d.has_passed(5 * SEC));
        assert!(d.has_passed(5 * SEC + Duration::from_micros(1)));
    }

    #[test]
    fn elapsed_is_floored_and_signed() {
        let d = Deadline::at(10 * SEC);
        assert_eq!(d.elapsed_secs(12 * SEC), Some(2));
        assert_eq!(d.elapsed_secs(10 * SEC), Some(0));
        // half a second short of the deadline floors to -1
        assert_eq!(d.elapsed_secs(9 * SEC + Duration::from_millis(500)), Some(-1));
        assert_eq!(d.elapsed_secs(7 * SEC), Some(-3));
    }

    #[test]
    fn set_delay_is_exact() {
        let mut d = Deadline::UNSET;
        d.set_delay(SEC, Duration::from_micros(1_500_000));
        assert_eq!(d, Deadline::at(Duration::from_micros(2_500_000)));
    }

    #[test]
    fn reduce_to_takes_minimum() {
        let mut timeout = Deadline::UNSET;
        timeout.reduce_to(Deadline::UNSET);
        assert!(!timeout.is_set());

        timeout.reduce_to(Deadline::at(8 * SEC));
        assert_eq!(timeout, Deadline::at(8 * SEC));

        timeout.reduce_to(Deadline::at(3 * SEC));
        assert_eq!(timeout, Deadline::at(3 * SEC));

        // a later candidate does not replace an earlier timeout
        timeout.reduce_to(Deadline::at(6 * SEC));
        assert_eq!(timeout, Deadline::at(3 * SEC));
    }

    #[test]
    fn fake_clock_drives_deadlines() {
        let clock = FakeClock::new();
        let d = Deadline::after(&clock, 2 * SEC);
        assert!(!d.has_passed(clock.now()));

        clock.advance(3 * SEC);
        assert!(d.has_passed(clock.now()));
        assert_eq!(d.elapsed_secs(clock.now()), Some(1));
        assert_eq!(d.remaining(clock.now()), Some(Duration::ZERO));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
