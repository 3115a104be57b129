//! Record-backed counters
//!
//! Each counter is a hidden child record of type [`COUNTER_TYPE`], named by
//! the counter's storage name, inside a [`CONTAINER_NAME`] container that
//! is created on first use beneath a well-known parent record. The current
//! value is the [`COUNTER_VALUE_PROPERTY`] integer property.
//!
//! The container and counter locations are cached. Every increment
//! verifies the cached location inside its transaction, so a counter
//! removed out of band is simply created again from `initial_value`.
//!
//! The whole read-modify-write runs as the system identity: the well-known
//! parent is normally writable only by the system, and numbering must not
//! depend on the permissions of whoever triggered it.

use std::sync::Arc;

use docnum_core::{
    as_system, in_transaction, CounterKey, LockService, NewRecord, NumberingError,
    NumberingResult, PropertyValue, RecordId, RecordStore, SystemIdentity, TransactionExecutor,
    TxnOptions,
};
use tracing::debug;

use crate::cache::CounterCache;
use crate::locking::{with_counter_lock, LockSettings};
use crate::store::{CounterBackend, CounterStore};

/// Name of the container holding all counter records
pub const CONTAINER_NAME: &str = "Numbering";
/// Type of the container record
pub const CONTAINER_TYPE: &str = "cm:folder";
/// Type of a counter record
pub const COUNTER_TYPE: &str = "docnum:counter";
/// Integer property holding a counter's current value
pub const COUNTER_VALUE_PROPERTY: &str = "docnum:counterValue";
/// Trait that hides counter records from ordinary browsing
pub const HIDDEN_TRAIT: &str = "sys:hidden";

/// Counter store over hidden child records
pub struct NodeCounterStore {
    locks: Arc<dyn LockService>,
    executor: Arc<dyn TransactionExecutor>,
    identity: Arc<dyn SystemIdentity>,
    parent: RecordId,
    lock_settings: LockSettings,
    containers: CounterCache,
    counters: CounterCache,
}

impl NodeCounterStore {
    /// Create a store whose container lives beneath `parent`
    pub fn new(
        locks: Arc<dyn LockService>,
        executor: Arc<dyn TransactionExecutor>,
        identity: Arc<dyn SystemIdentity>,
        parent: RecordId,
    ) -> Self {
        Self {
            locks,
            executor,
            identity,
            parent,
            lock_settings: LockSettings::default(),
            containers: CounterCache::new(),
            counters: CounterCache::new(),
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

    /// Record the numbering container is created beneath
    pub fn parent(&self) -> &RecordId {
        &self.parent
    }

    /// Location cache for counter records
    pub fn cache(&self) -> &CounterCache {
        &self.counters
    }

    fn container(&self, store: &mut dyn RecordStore) -> NumberingResult<RecordId> {
        let parent = &self.parent;
        self.containers.resolve_with(
            CONTAINER_NAME,
            store,
            |store, id| store.exists(id),
            |store| match store.find_child(parent, CONTAINER_NAME)? {
                Some(existing) => Ok(existing),
                None => {
                    debug!(parent = %parent, "creating numbering container");
                    store.create_child(parent, NewRecord::new(CONTAINER_NAME, CONTAINER_TYPE))
                }
            },
        )
    }

    fn counter(
        &self,
        store: &mut dyn RecordStore,
        name: &str,
        initial_value: i64,
    ) -> NumberingResult<RecordId> {
        let container = self.container(store)?;
        self.counters.resolve_with(
            name,
            store,
            |store, id| store.exists(id),
            |store| match store.find_child(&container, name)? {
                Some(existing) => Ok(existing),
                None => {
                    debug!(counter = name, initial_value, "creating counter record");
                    let record = NewRecord::new(name, COUNTER_TYPE)
                        .with_trait(HIDDEN_TRAIT)
                        .with_property(COUNTER_VALUE_PROPERTY, initial_value);
                    store.create_child(&container, record)
                }
            },
        )
    }

    fn bump(&self, store: &mut dyn RecordStore, initial_value: i64, name: &str) -> NumberingResult<i64> {
        let counter = self.counter(store, name, initial_value)?;
        let current = match store.property(&counter, COUNTER_VALUE_PROPERTY)? {
            Some(PropertyValue::Int(value)) => value,
            Some(other) => {
                return Err(NumberingError::storage(format!(
                    "counter {} holds a non-integer value {:?}",
                    name, other
                )))
            }
            None => {
                return Err(NumberingError::storage(format!(
                    "counter {} has no {} property",
                    name, COUNTER_VALUE_PROPERTY
                )))
            }
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| NumberingError::storage(format!("counter {} overflowed", name)))?;
        store.set_property(&counter, COUNTER_VALUE_PROPERTY, PropertyValue::Int(next))?;
        Ok(next)
    }
}

impl CounterStore for NodeCounterStore {
    fn increment(&self, initial_value: i64, key: &CounterKey) -> NumberingResult<i64> {
        let name = key.storage_name();
        let next = with_counter_lock(self.locks.as_ref(), &self.lock_settings, key, || {
            as_system(self.identity.as_ref(), || {
                in_transaction(self.executor.as_ref(), TxnOptions::requires_new(), |store| {
                    self.bump(store, initial_value, &name)
                })
            })
        })?;
        debug!(counter = %key, value = next, backend = "node", "counter incremented");
        Ok(next)
    }

    fn backend(&self) -> CounterBackend {
        CounterBackend::Node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docnum_concurrency::{InMemoryLockService, MemoryRepository, RetryingExecutor, ThreadIdentity};

    static_assertions::assert_impl_all!(NodeCounterStore: Send, Sync);

    fn store() -> (NodeCounterStore, Arc<MemoryRepository>, RecordId) {
        let repo = Arc::new(MemoryRepository::default());
        let dictionary = repo.create_root("Data Dictionary", "cm:folder");
        repo.protect(&dictionary);
        let store = NodeCounterStore::new(
            Arc::new(InMemoryLockService::new()),
            Arc::new(RetryingExecutor::new(Arc::clone(&repo))),
            Arc::new(ThreadIdentity::new()),
            dictionary.clone(),
        );
        (store, repo, dictionary)
    }

    fn counter_record(repo: &MemoryRepository, dictionary: &RecordId, name: &str) -> Option<RecordId> {
        let container = repo
            .children_of(dictionary)
            .into_iter()
            .find(|c| c.name == CONTAINER_NAME)?;
        repo.children_of(&container.id)
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| c.id)
    }

    #[test]
    fn test_creates_container_and_hidden_counter() {
        let (store, repo, dictionary) = store();
        let key = CounterKey::new("invoices").unwrap();
        assert_eq!(store.increment(1, &key).unwrap(), 2);

        let counter = counter_record(&repo, &dictionary, "invoices").unwrap();
        assert_eq!(repo.property(&counter, COUNTER_VALUE_PROPERTY), Some(PropertyValue::Int(2)));
        let description = docnum_core::RecordHost::describe(repo.as_ref(), &counter).unwrap();
        assert_eq!(description.type_name, COUNTER_TYPE);
        assert!(description.has_trait(HIDDEN_TRAIT));
    }

    #[test]
    fn test_ordinary_user_can_increment() {
        let (store, _repo, _dictionary) = store();
        ThreadIdentity::set_current("alice");
        let key = CounterKey::new("c").unwrap();
        assert_eq!(store.increment(0, &key).unwrap(), 1);
        assert_eq!(ThreadIdentity::current_user().as_deref(), Some("alice"));
        ThreadIdentity::clear();
    }

    #[test]
    fn test_option_series_share_one_container() {
        let (store, repo, dictionary) = store();
        store.increment(0, &CounterKey::new("c").unwrap()).unwrap();
        store.increment(0, &CounterKey::with_option("c", "2024").unwrap()).unwrap();

        let container = repo.children_of(&dictionary).remove(0);
        assert_eq!(container.name, CONTAINER_NAME);
        let names: Vec<_> = repo.children_of(&container.id).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["c".to_string(), "c/2024".to_string()]);
    }

    #[test]
    fn test_removed_counter_restarts_from_initial() {
        let (store, repo, dictionary) = store();
        let key = CounterKey::new("c").unwrap();
        store.increment(5, &key).unwrap();
        store.increment(5, &key).unwrap();
        assert_eq!(store.cache().len(), 1);

        let counter = counter_record(&repo, &dictionary, "c").unwrap();
        repo.delete(&counter).unwrap();
        assert_eq!(store.increment(5, &key).unwrap(), 6);
    }

    #[test]
    fn test_removed_container_is_recreated() {
        let (store, repo, dictionary) = store();
        let key = CounterKey::new("c").unwrap();
        store.increment(0, &key).unwrap();

        let container = repo.children_of(&dictionary).remove(0);
        repo.delete(&container.id).unwrap();
        assert_eq!(store.increment(0, &key).unwrap(), 1);
        assert_eq!(repo.children_of(&dictionary).len(), 1);
    }

    #[test]
    fn test_missing_value_is_a_storage_error() {
        let (store, repo, dictionary) = store();
        let key = CounterKey::new("c").unwrap();
        store.increment(0, &key).unwrap();

        let counter = counter_record(&repo, &dictionary, "c").unwrap();
        repo.set_property(&counter, COUNTER_VALUE_PROPERTY, PropertyValue::from("x"))
            .unwrap();
        let err = store.increment(0, &key).unwrap_err();
        assert!(matches!(err, NumberingError::Storage(_)));
    }
}
