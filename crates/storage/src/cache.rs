//! Self-healing cache of counter locations
//!
//! Maps a storage name to the record backing it. A hit is never trusted
//! blindly: the caller supplies an existence check that runs on every
//! access, and a handle whose record vanished is evicted and resolved
//! again. Entries inserted by a transaction that later rolls back heal the
//! same way.

use dashmap::DashMap;
use docnum_core::{NumberingResult, RecordId};
use tracing::debug;

/// Storage name to record location map
#[derive(Debug, Default)]
pub struct CounterCache {
    entries: DashMap<String, RecordId>,
}

impl CounterCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached location, unverified
    pub fn get(&self, name: &str) -> Option<RecordId> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    /// Remember a location
    pub fn insert(&self, name: impl Into<String>, location: RecordId) {
        self.entries.insert(name.into(), location);
    }

    /// Forget a location; true if one was cached
    pub fn evict(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Number of cached locations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Verified location of `name`, resolving it on a miss
    ///
    /// `exists` checks a cached handle and `resolve` looks the location up
    /// (or creates it). Both receive `ctx`, typically the open transaction.
    ///
    /// # Errors
    ///
    /// Propagates errors from `exists` and `resolve`.
    pub fn resolve_with<C, E, R>(
        &self,
        name: &str,
        ctx: &mut C,
        exists: E,
        resolve: R,
    ) -> NumberingResult<RecordId>
    where
        C: ?Sized,
        E: FnOnce(&mut C, &RecordId) -> NumberingResult<bool>,
        R: FnOnce(&mut C) -> NumberingResult<RecordId>,
    {
        if let Some(cached) = self.get(name) {
            if exists(ctx, &cached)? {
                return Ok(cached);
            }
            debug!(counter = name, location = %cached, "evicting stale counter location");
            self.evict(name);
        }

        let location = resolve(ctx)?;
        self.insert(name, location.clone());
        Ok(location)
    }
}
