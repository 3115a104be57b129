//! In-process named lock service with time-to-live
//!
//! Reference implementation of [`LockService`] for a single process. Each
//! lock name maps to at most one holder. A holder that outlives its TTL no
//! longer blocks anyone: the next acquirer takes the lock over and the old
//! token can no longer release it.
//!
//! Acquisition polls: up to `retry_count` attempts separated by
//! `retry_interval`. There is no wait queue and no fairness guarantee.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use docnum_core::{LockService, LockToken, NumberingError, NumberingResult};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct Held {
    token: LockToken,
    expires_at: Instant,
}

impl Held {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Named locks held in process memory
#[derive(Debug, Default)]
pub struct InMemoryLockService {
    locks: DashMap<String, Held>,
}

impl InMemoryLockService {
    /// Create an empty lock service
    pub fn new() -> Self {
        Self::default()
    }

    /// Single non-blocking acquisition attempt
    pub fn try_acquire(&self, name: &str, ttl: Duration) -> Option<LockToken> {
        let now = Instant::now();
        let fresh = Held {
            token: LockToken::generate(),
            expires_at: now + ttl,
        };
        let token = fresh.token.clone();

        match self.locks.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Some(token)
            }
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired(now) {
                    debug!(lock = name, "taking over expired lock");
                    slot.insert(fresh);
                    Some(token)
                } else {
                    None
                }
            }
        }
    }

    /// Whether `name` is currently held by an unexpired holder
    pub fn is_locked(&self, name: &str) -> bool {
        let now = Instant::now();
        self.locks
            .get(name)
            .map(|held| !held.is_expired(now))
            .unwrap_or(false)
    }

    /// Number of lock entries, expired ones included
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock entries exist
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl LockService for InMemoryLockService {
    fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        retry_count: u32,
        retry_interval: Duration,
    ) -> NumberingResult<LockToken> {
        let attempts = retry_count.max(1);
        for attempt in 1..=attempts {
            if let Some(token) = self.try_acquire(name, ttl) {
                trace!(lock = name, attempt, "lock acquired");
                return Ok(token);
            }
            if attempt < attempts {
                std::thread::sleep(retry_interval);
            }
        }
        debug!(lock = name, attempts, "lock acquisition timed out");
        Err(NumberingError::LockTimeout {
            name: name.to_string(),
            attempts,
        })
    }

    fn release(&self, token: &LockToken, name: &str) -> NumberingResult<()> {
        match self.locks.remove_if(name, |_, held| held.token == *token) {
            Some(_) => {
                trace!(lock = name, "lock released");
                Ok(())
            }
            None => Err(NumberingError::not_found(format!(
                "lock {} is not held by token {}",
                name,
                token.as_str()
            ))),
        }
    }
}
