//! Attribute-backed counters (experimental)
//!
//! Each counter is one flat attribute in the [`ATTRIBUTE_NAMESPACE`]
//! namespace, keyed by the counter's storage name. Simple and cheap, but
//! attributes are not visible in the record tree, so counters stored this
//! way cannot be inspected or repaired with ordinary record tooling.

use std::sync::Arc;

use docnum_core::{
    as_system, in_transaction, CounterKey, LockService, NumberingError, NumberingResult,
    PropertyValue, RecordStore, SystemIdentity, TransactionExecutor, TxnOptions,
};
use tracing::debug;

use crate::locking::{with_counter_lock, LockSettings};
use crate::store::{CounterBackend, CounterStore};

/// Namespace holding every counter attribute
pub const ATTRIBUTE_NAMESPACE: &str = "docnum.counters";

/// Counter store over flat namespaced attributes
pub struct AttributeCounterStore {
    locks: Arc<dyn LockService>,
    executor: Arc<dyn TransactionExecutor>,
    identity: Arc<dyn SystemIdentity>,
    lock_settings: LockSettings,
}

impl AttributeCounterStore {
    /// Create a store with default lock settings
    pub fn new(
        locks: Arc<dyn LockService>,
        executor: Arc<dyn TransactionExecutor>,
        identity: Arc<dyn SystemIdentity>,
    ) -> Self {
        Self {
            locks,
            executor,
            identity,
            lock_settings: LockSettings::default(),
        }
    }

    /// Replace the lock settings
    pub fn with_lock_settings(mut self, settings: LockSettings) -> Self {
        self.lock_settings = settings;
        self
    }

    /// Lock settings in use
    pub fn lock_settings(&self) -> &LockSettings {
        &self.lock_settings
    }

    fn bump(&self, store: &mut dyn RecordStore, initial_value: i64, name: &str) -> NumberingResult<i64> {
        if !store.attribute_exists(ATTRIBUTE_NAMESPACE, name)? {
            debug!(counter = name, initial_value, "creating counter attribute");
            as_system(self.identity.as_ref(), || {
                store.create_attribute(ATTRIBUTE_NAMESPACE, name, PropertyValue::Int(initial_value))
            })?;
        }

        let current = match store.attribute(ATTRIBUTE_NAMESPACE, name)? {
            Some(PropertyValue::Int(value)) => value,
            Some(other) => {
                return Err(NumberingError::storage(format!(
                    "counter attribute {} holds a non-integer value {:?}",
                    name, other
                )))
            }
            None => {
                return Err(NumberingError::storage(format!(
                    "counter attribute {} vanished during increment",
                    name
                )))
            }
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| NumberingError::storage(format!("counter {} overflowed", name)))?;
        store.set_attribute(ATTRIBUTE_NAMESPACE, name, PropertyValue::Int(next))?;
        Ok(next)
    }
}

impl CounterStore for AttributeCounterStore {
    fn increment(&self, initial_value: i64, key: &CounterKey) -> NumberingResult<i64> {
        let name = key.storage_name();
        let next = with_counter_lock(self.locks.as_ref(), &self.lock_settings, key, || {
            in_transaction(self.executor.as_ref(), TxnOptions::requires_new(), |store| {
                self.bump(store, initial_value, &name)
            })
        })?;
        debug!(counter = %key, value = next, backend = "attribute", "counter incremented");
        Ok(next)
    }

    fn backend(&self) -> CounterBackend {
        CounterBackend::Attribute
    }
}
