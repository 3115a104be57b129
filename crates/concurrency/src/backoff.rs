//! Backoff between re-runs of a conflicting counter commit
//!
//! A counter increment loses its commit when another writer committed a
//! read entry first. The executor then re-runs the whole increment. These
//! settings bound how often that happens and how long it pauses in between,
//! the same way `LockSettings` bounds waiting for the counter lock.

use std::time::Duration;

/// Re-runs after the first attempt
pub const DEFAULT_COMMIT_RETRIES: usize = 3;
/// Pause after the first lost commit
pub const DEFAULT_COMMIT_BASE_DELAY: Duration = Duration::from_millis(10);
/// Longest single pause
pub const DEFAULT_COMMIT_MAX_DELAY: Duration = Duration::from_millis(100);

/// How a lost counter commit is re-run
///
/// The pause doubles with every lost commit, starting at `base_delay` and
/// never exceeding `max_delay`. Once `retries` re-runs have also lost, the
/// increment fails with `StorageConflict`.
///
/// ```
/// use docnum_concurrency::CommitBackoff;
/// use std::time::Duration;
///
/// let backoff = CommitBackoff::default()
///     .with_retries(5)
///     .with_delays(Duration::from_millis(2), Duration::from_millis(50));
/// assert_eq!(backoff.attempts(), 6);
/// assert_eq!(backoff.delay_after(2), Duration::from_millis(8));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitBackoff {
    /// Re-runs after the first attempt; 0 fails on the first lost commit
    pub retries: usize,
    /// Pause after the first lost commit
    pub base_delay: Duration,
    /// Cap on any single pause
    pub max_delay: Duration,
}

impl Default for CommitBackoff {
    fn default() -> Self {
        Self {
            retries: DEFAULT_COMMIT_RETRIES,
            base_delay: DEFAULT_COMMIT_BASE_DELAY,
            max_delay: DEFAULT_COMMIT_MAX_DELAY,
        }
    }
}

impl CommitBackoff {
    /// Set the number of re-runs
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Set the first pause and the pause cap
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Commit attempts in total, the first one included
    pub fn attempts(&self) -> usize {
        self.retries.saturating_add(1)
    }

    /// Pause after the `lost`-th lost commit, counting from zero
    pub fn delay_after(&self, lost: usize) -> Duration {
        let factor = 1u32.checked_shl(lost.min(31) as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Upper bound on time spent pausing before giving up
    pub fn max_backoff(&self) -> Duration {
        (0..self.retries)
            .map(|lost| self.delay_after(lost))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let backoff = CommitBackoff::default();
        assert_eq!(backoff.attempts(), 4);
        assert_eq!(backoff.delay_after(0), Duration::from_millis(10));
        assert_eq!(backoff.max_backoff(), Duration::from_millis(70));
    }

    #[test]
    fn test_no_retries_means_single_attempt() {
        let backoff = CommitBackoff::default().with_retries(0);
        assert_eq!(backoff.attempts(), 1);
        assert_eq!(backoff.max_backoff(), Duration::ZERO);
    }

    #[test]
    fn test_pause_doubles_until_cap() {
        let backoff = CommitBackoff::default()
            .with_delays(Duration::from_millis(10), Duration::from_millis(100));
        assert_eq!(backoff.delay_after(1), Duration::from_millis(20));
        assert_eq!(backoff.delay_after(3), Duration::from_millis(80));
        assert_eq!(backoff.delay_after(4), Duration::from_millis(100));
        assert_eq!(backoff.delay_after(500), Duration::from_millis(100));
    }

    proptest::proptest! {
        #[test]
        fn prop_pause_is_capped_and_monotonic(
            base in 0u64..1_000,
            cap in 0u64..10_000,
            lost in 0usize..200,
        ) {
            let backoff = CommitBackoff::default()
                .with_delays(Duration::from_millis(base), Duration::from_millis(cap));
            let pause = backoff.delay_after(lost);
            proptest::prop_assert!(pause <= Duration::from_millis(cap));
            proptest::prop_assert!(backoff.delay_after(lost + 1) >= pause);
        }
    }
}
