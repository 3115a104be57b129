//! Counter lock discipline
//!
//! Every increment runs inside a cluster lock named after the counter's
//! storage name. The lock is released by a guard, so a failing or panicking
//! body never leaves it held until TTL expiry.

use std::time::Duration;

use docnum_core::{CounterKey, LockService, LockToken, NumberingResult};
use tracing::{trace, warn};

/// Lock timing for counter increments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSettings {
    /// How long a holder may keep the lock before others may take it over
    pub ttl: Duration,
    /// Acquisition attempts before giving up with `LockTimeout`
    pub retry_count: u32,
    /// Pause between acquisition attempts
    pub retry_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(30_000),
            retry_count: 100,
            retry_interval: Duration::from_millis(100),
        }
    }
}

impl LockSettings {
    /// Set the lock time-to-live
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set acquisition polling
    pub fn with_polling(mut self, retry_count: u32, retry_interval: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_interval = retry_interval;
        self
    }

    /// Upper bound on time spent waiting for the lock
    pub fn max_wait(&self) -> Duration {
        self.retry_interval
            .saturating_mul(self.retry_count.saturating_sub(1))
    }
}

/// Name of the lock guarding `key`
pub fn lock_name(key: &CounterKey) -> String {
    format!("docnum.counter.{}.lock", key.storage_name())
}

struct CounterLockGuard<'a> {
    service: &'a dyn LockService,
    name: String,
    token: LockToken,
}

impl Drop for CounterLockGuard<'_> {
    fn drop(&mut self) {
        match self.service.release(&self.token, &self.name) {
            Ok(()) => trace!(lock = %self.name, "counter lock released"),
            Err(e) => warn!(lock = %self.name, error = %e, "failed to release counter lock"),
        }
    }
}

/// Run `work` while holding the lock for `key`
///
/// # Errors
///
/// Returns `LockTimeout` without running `work` if the lock stays held
/// through every attempt; otherwise returns whatever `work` returns.
pub fn with_counter_lock<T, F>(
    service: &dyn LockService,
    settings: &LockSettings,
    key: &CounterKey,
    work: F,
) -> NumberingResult<T>
where
    F: FnOnce() -> NumberingResult<T>,
{
    let name = lock_name(key);
    let token = service.acquire(&name, settings.ttl, settings.retry_count, settings.retry_interval)?;
    trace!(lock = %name, "counter lock acquired");
    let _guard = CounterLockGuard {
        service,
        name,
        token,
    };
    work()
}
