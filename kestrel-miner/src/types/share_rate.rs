//! Share rate type for expressing share submission limits.

use std::time::Duration;

/// Share submission rate (shares per unit time).
///
/// Stored as the interval between shares, which keeps the rate strictly
/// positive by construction. Used to cap the average submission rate while
/// leaving room for natural bursts from luck variance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShareRate(Duration);

impl ShareRate {
    /// Rate targeting one share per `interval` on average.
    ///
    /// # Panics
    /// Panics if `interval` is zero.
    pub const fn from_interval(interval: Duration) -> Self {
        assert!(!interval.is_zero(), "interval must be non-zero");
        Self(interval)
    }

    /// Rate of N shares per second.
    ///
    /// # Panics
    /// Panics if `shares` is not positive.
    pub fn per_second(shares: f64) -> Self {
        assert!(shares > 0.0, "share rate must be positive");
        Self(Duration::from_secs_f64(1.0 / shares))
    }

    /// The average interval between shares.
    pub fn as_interval(&self) -> Duration {
        self.0
    }

    pub fn as_per_second(&self) -> f64 {
        1.0 / self.0.as_secs_f64()
    }
}

impl std::fmt::Display for ShareRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1} shares/sec", self.as_per_second())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_and_rate_are_inverses() {
        let rate = ShareRate::per_second(10.0);
        assert_eq!(rate.as_interval(), Duration::from_millis(100));

        let rate = ShareRate::from_interval(Duration::from_secs(5));
        assert!((rate.as_per_second() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn display_shows_per_second() {
        assert_eq!(ShareRate::per_second(10.0).to_string(), "10.0 shares/sec");
    }
}
