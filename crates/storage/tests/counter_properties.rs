//! Property suite shared by every counter backend
//!
//! Each test runs once per backend against the in-memory repository:
//!
//! 1. **Contiguity** - Concurrent increments return exactly `{s+1..s+N}`,
//!    even when every lock acquisition takes over an expired holder
//! 2. **Creation race** - Concurrent first-time callers create one counter
//! 3. **Staleness** - A counter removed out of band restarts from scratch
//! 4. **Failures** - Lock timeout, retry exhaustion and lock release
//! 5. **Series** - Option values are independent counters
//!
//! ```bash
//! cargo test -p docnum-storage --test counter_properties
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use docnum_concurrency::{
    CommitBackoff, InMemoryLockService, MemoryRepository, RetryingExecutor, ThreadIdentity,
};
use docnum_core::{
    CounterKey, LockService, NumberingError, NumberingResult, PropertyValue, RecordId,
    RecordStore, TransactionExecutor, TxnOptions, TxnWork,
};
use docnum_storage::{
    lock_name, AttributeCounterStore, CounterBackend, CounterStore, LockSettings,
    NodeCounterStore, ATTRIBUTE_NAMESPACE, CONTAINER_NAME, COUNTER_VALUE_PROPERTY,
};
use parking_lot::Mutex;
use rand::seq::SliceRandom;

// ============================================================================
// Test Helpers
// ============================================================================

type Hook = Box<dyn Fn() + Send + Sync>;

/// Executor that can run a hook after the work, before the commit
struct InterferingExecutor {
    inner: RetryingExecutor,
    hook: Mutex<Option<Hook>>,
}

impl TransactionExecutor for InterferingExecutor {
    fn run_retrying(&self, options: TxnOptions, work: &mut TxnWork<'_>) -> NumberingResult<()> {
        self.inner.run_retrying(options, &mut |store: &mut dyn RecordStore| {
            work(store)?;
            if let Some(hook) = self.hook.lock().as_ref() {
                hook();
            }
            Ok(())
        })
    }
}

struct Fixture {
    backend: CounterBackend,
    repo: Arc<MemoryRepository>,
    locks: Arc<InMemoryLockService>,
    executor: Arc<InterferingExecutor>,
    dictionary: RecordId,
    store: Box<dyn CounterStore>,
}

impl Fixture {
    fn new(backend: CounterBackend) -> Self {
        Self::with_parts(
            backend,
            LockSettings::default().with_polling(20_000, Duration::from_micros(200)),
            CommitBackoff::default()
                .with_retries(2)
                .with_delays(Duration::ZERO, Duration::ZERO),
        )
    }

    fn with_parts(backend: CounterBackend, settings: LockSettings, backoff: CommitBackoff) -> Self {
        let repo = Arc::new(MemoryRepository::default());
        let dictionary = repo.create_root("Data Dictionary", "cm:folder");
        repo.protect(&dictionary);

        let locks = Arc::new(InMemoryLockService::new());
        let executor = Arc::new(InterferingExecutor {
            inner: RetryingExecutor::with_backoff(Arc::clone(&repo), backoff),
            hook: Mutex::new(None),
        });
        let identity = Arc::new(ThreadIdentity::new());

        let store: Box<dyn CounterStore> = match backend {
            CounterBackend::Attribute => Box::new(
                AttributeCounterStore::new(locks.clone(), executor.clone(), identity)
                    .with_lock_settings(settings),
            ),
            CounterBackend::Node => Box::new(
                NodeCounterStore::new(locks.clone(), executor.clone(), identity, dictionary.clone())
                    .with_lock_settings(settings),
            ),
        };

        Self {
            backend,
            repo,
            locks,
            executor,
            dictionary,
            store,
        }
    }

    fn container(&self) -> Option<RecordId> {
        self.repo
            .children_of(&self.dictionary)
            .into_iter()
            .find(|c| c.name == CONTAINER_NAME)
            .map(|c| c.id)
    }

    fn counter_record(&self, key: &CounterKey) -> Option<RecordId> {
        let container = self.container()?;
        self.repo
            .children_of(&container)
            .into_iter()
            .find(|c| c.name == key.storage_name())
            .map(|c| c.id)
    }

    /// Number of stored counters
    fn counter_count(&self, keys: &[CounterKey]) -> usize {
        keys.iter().filter(|key| self.stored_value(key).is_some()).count()
    }

    fn stored_value(&self, key: &CounterKey) -> Option<i64> {
        let value = match self.backend {
            CounterBackend::Attribute => self.repo.attribute(ATTRIBUTE_NAMESPACE, &key.storage_name()),
            CounterBackend::Node => self
                .counter_record(key)
                .and_then(|id| self.repo.property(&id, COUNTER_VALUE_PROPERTY)),
        };
        value.and_then(|v| v.as_int())
    }

    /// Remove the counter behind the store's back
    fn remove_counter(&self, key: &CounterKey) {
        match self.backend {
            CounterBackend::Attribute => {
                assert!(self.repo.remove_attribute(ATTRIBUTE_NAMESPACE, &key.storage_name()));
            }
            CounterBackend::Node => {
                let id = self.counter_record(key).unwrap();
                self.repo.delete(&id).unwrap();
            }
        }
    }

    /// Overwrite the counter before every commit, forcing conflicts
    fn tamper_before_commit(&self, key: &CounterKey) {
        let repo = Arc::clone(&self.repo);
        let hook: Hook = match self.backend {
            CounterBackend::Attribute => {
                let name = key.storage_name();
                Box::new(move || {
                    repo.autocommit(|txn| {
                        txn.set_attribute(ATTRIBUTE_NAMESPACE, &name, PropertyValue::Int(1_000))
                    })
                    .unwrap();
                })
            }
            CounterBackend::Node => {
                let id = self.counter_record(key).unwrap();
                Box::new(move || {
                    repo.set_property(&id, COUNTER_VALUE_PROPERTY, PropertyValue::Int(1_000))
                        .unwrap();
                })
            }
        };
        *self.executor.hook.lock() = Some(hook);
    }

    fn stop_tampering(&self) {
        *self.executor.hook.lock() = None;
    }
}

fn backends() -> Vec<Fixture> {
    vec![
        Fixture::new(CounterBackend::Attribute),
        Fixture::new(CounterBackend::Node),
    ]
}

fn key(id: &str) -> CounterKey {
    CounterKey::new(id).unwrap()
}

fn hammer(fx: &Fixture, key: &CounterKey, seed: i64, threads: usize, per_thread: usize) -> Vec<i64> {
    let barrier = Barrier::new(threads);
    let seen = Mutex::new(Vec::new());
    thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| {
                barrier.wait();
                for _ in 0..per_thread {
                    let value = fx.store.increment(seed, key).unwrap();
                    seen.lock().push(value);
                }
            });
        }
    });
    let mut values = seen.into_inner();
    values.sort_unstable();
    values
}

// ============================================================================
// SECTION 1: Contiguity
// ============================================================================

mod contiguity {
    use super::*;

    #[test]
    fn test_sequential_increments_from_seed() {
        for fx in backends() {
            let k = key("seq");
            let values: Vec<i64> = (0..5).map(|_| fx.store.increment(41, &k).unwrap()).collect();
            assert_eq!(values, vec![42, 43, 44, 45, 46], "{}", fx.backend);
        }
    }

    #[test]
    fn test_concurrent_increments_are_contiguous() {
        for fx in backends() {
            let k = key("shared");
            let values = hammer(&fx, &k, 0, 8, 25);
            let expected: Vec<i64> = (1..=200).collect();
            assert_eq!(values, expected, "{}", fx.backend);
            assert_eq!(fx.stored_value(&k), Some(200), "{}", fx.backend);
        }
    }

    #[test]
    fn test_expired_lock_takeover_keeps_values_unique() {
        for backend in [CounterBackend::Attribute, CounterBackend::Node] {
            // Every acquirer finds the lock already expired and takes it over
            let fx = Fixture::with_parts(
                backend,
                LockSettings::default().with_ttl(Duration::ZERO),
                CommitBackoff::default()
                    .with_retries(10_000)
                    .with_delays(Duration::ZERO, Duration::from_millis(1)),
            );
            let k = key("expired");
            let values = hammer(&fx, &k, 0, 8, 25);
            let expected: Vec<i64> = (1..=200).collect();
            assert_eq!(values, expected, "{}", fx.backend);
            assert_eq!(fx.stored_value(&k), Some(200), "{}", fx.backend);
            assert_eq!(fx.counter_count(&[k.clone()]), 1, "{}", fx.backend);
        }
    }

    #[test]
    fn test_interleaved_keys_stay_contiguous_per_key() {
        for fx in backends() {
            let keys: Vec<CounterKey> = ["a", "b", "c"].iter().map(|id| key(id)).collect();
            let results = Mutex::new(BTreeMap::<String, Vec<i64>>::new());

            thread::scope(|scope| {
                for _ in 0..4 {
                    scope.spawn(|| {
                        let mut plan: Vec<&CounterKey> =
                            keys.iter().flat_map(|k| std::iter::repeat(k).take(10)).collect();
                        plan.shuffle(&mut rand::thread_rng());
                        for k in plan {
                            let value = fx.store.increment(0, k).unwrap();
                            results.lock().entry(k.storage_name()).or_default().push(value);
                        }
                    });
                }
            });

            for (name, mut values) in results.into_inner() {
                values.sort_unstable();
                assert_eq!(values, (1..=40).collect::<Vec<i64>>(), "{} {}", fx.backend, name);
            }
        }
    }
}

// ============================================================================
// SECTION 2: Creation Race
// ============================================================================

mod creation_race {
    use super::*;

    #[test]
    fn test_first_time_callers_create_exactly_one_counter() {
        for fx in backends() {
            let k = key("fresh");
            let values = hammer(&fx, &k, 100, 12, 1);
            assert_eq!(values, (101..=112).collect::<Vec<i64>>(), "{}", fx.backend);
            assert_eq!(fx.counter_count(&[k.clone()]), 1);

            if fx.backend == CounterBackend::Node {
                let container = fx.container().unwrap();
                assert_eq!(fx.repo.children_of(&container).len(), 1);
                assert_eq!(fx.repo.children_of(&fx.dictionary).len(), 1);
            }
        }
    }

    #[test]
    fn test_first_value_is_initial_plus_one() {
        for fx in backends() {
            assert_eq!(fx.store.increment(0, &key("zero")).unwrap(), 1, "{}", fx.backend);
            assert_eq!(fx.store.increment(-10, &key("neg")).unwrap(), -9, "{}", fx.backend);
        }
    }
}

// ============================================================================
// SECTION 3: Staleness
// ============================================================================

mod staleness {
    use super::*;

    #[test]
    fn test_removed_counter_restarts_from_scratch() {
        for fx in backends() {
            let k = key("stale");
            for _ in 0..3 {
                fx.store.increment(10, &k).unwrap();
            }
            fx.remove_counter(&k);
            assert_eq!(fx.stored_value(&k), None);

            assert_eq!(fx.store.increment(10, &k).unwrap(), 11, "{}", fx.backend);
            assert_eq!(fx.store.increment(10, &k).unwrap(), 12, "{}", fx.backend);
        }
    }
}

// ============================================================================
// SECTION 4: Failures
// ============================================================================

mod failures {
    use super::*;

    #[test]
    fn test_lock_timeout_leaves_counter_untouched() {
        for fx in backends() {
            let k = key("blocked");
            fx.store.increment(0, &k).unwrap();

            let held = fx
                .locks
                .acquire(&lock_name(&k), Duration::from_secs(30), 1, Duration::ZERO)
                .unwrap();

            // A store with short polling against the same lock table
            let identity = Arc::new(ThreadIdentity::new());
            let settings = LockSettings::default().with_polling(3, Duration::from_millis(1));
            let impatient: Box<dyn CounterStore> = match fx.backend {
                CounterBackend::Attribute => Box::new(
                    AttributeCounterStore::new(fx.locks.clone(), fx.executor.clone(), identity)
                        .with_lock_settings(settings),
                ),
                CounterBackend::Node => Box::new(
                    NodeCounterStore::new(
                        fx.locks.clone(),
                        fx.executor.clone(),
                        identity,
                        fx.dictionary.clone(),
                    )
                    .with_lock_settings(settings),
                ),
            };

            let err = impatient.increment(0, &k).unwrap_err();
            assert!(
                matches!(err, NumberingError::LockTimeout { attempts: 3, .. }),
                "{}: {:?}",
                fx.backend,
                err
            );
            assert!(err.is_retryable());
            assert_eq!(fx.stored_value(&k), Some(1));

            fx.locks.release(&held, &lock_name(&k)).unwrap();
            assert_eq!(impatient.increment(0, &k).unwrap(), 2);
        }
    }

    #[test]
    fn test_retry_exhaustion_is_storage_conflict() {
        for fx in backends() {
            let k = key("contended");
            fx.store.increment(0, &k).unwrap();

            fx.tamper_before_commit(&k);
            let err = fx.store.increment(0, &k).unwrap_err();
            assert!(
                matches!(err, NumberingError::StorageConflict { attempts: 3, .. }),
                "{}: {:?}",
                fx.backend,
                err
            );
            assert!(!err.is_retryable());
            fx.stop_tampering();
        }
    }

    #[test]
    fn test_lock_released_after_failed_increment() {
        for fx in backends() {
            let k = key("released");
            fx.store.increment(0, &k).unwrap();

            fx.tamper_before_commit(&k);
            assert!(fx.store.increment(0, &k).is_err());
            fx.stop_tampering();

            assert!(!fx.locks.is_locked(&lock_name(&k)), "{}", fx.backend);
            assert_eq!(fx.store.increment(0, &k).unwrap(), 1_001, "{}", fx.backend);
        }
    }
}

// ============================================================================
// SECTION 5: Series
// ============================================================================

mod series {
    use super::*;

    #[test]
    fn test_option_values_are_independent() {
        for fx in backends() {
            let plain = key("invoice");
            let y2024 = CounterKey::with_option("invoice", "2024").unwrap();
            let y2025 = CounterKey::with_option("invoice", "2025").unwrap();

            assert_eq!(fx.store.increment(0, &plain).unwrap(), 1);
            assert_eq!(fx.store.increment(0, &plain).unwrap(), 2);
            assert_eq!(fx.store.increment(0, &y2024).unwrap(), 1);
            assert_eq!(fx.store.increment(0, &y2025).unwrap(), 1);
            assert_eq!(fx.store.increment(0, &y2024).unwrap(), 2);
            assert_eq!(fx.store.increment(0, &plain).unwrap(), 3, "{}", fx.backend);
            assert_eq!(fx.counter_count(&[plain, y2024, y2025]), 3);
        }
    }

    #[test]
    fn test_empty_option_is_the_plain_series() {
        for fx in backends() {
            let plain = key("x");
            let empty = CounterKey::with_option("x", "").unwrap();
            fx.store.increment(0, &plain).unwrap();
            assert_eq!(fx.store.increment(0, &empty).unwrap(), 2, "{}", fx.backend);
        }
    }
}

// ============================================================================
// SECTION 6: Model
// ============================================================================

proptest::proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(24))]

    #[test]
    fn prop_sequential_increments_match_model(
        ops in proptest::collection::vec((0usize..4, -5i64..5), 1..40),
    ) {
        let ids = [("p", None), ("q", None), ("r", Some("s")), ("t", None)];
        for fx in backends() {
            let mut model: BTreeMap<String, i64> = BTreeMap::new();
            for (index, initial) in &ops {
                let k = match ids[*index] {
                    (id, Some(option)) => CounterKey::with_option(id, option).unwrap(),
                    (id, None) => key(id),
                };
                let expected = model.entry(k.storage_name()).or_insert(*initial);
                *expected += 1;
                proptest::prop_assert_eq!(fx.store.increment(*initial, &k).unwrap(), *expected);
            }
            for (name, value) in &model {
                let k = match name.split_once('/') {
                    Some((id, option)) => CounterKey::with_option(id, option).unwrap(),
                    None => key(name),
                };
                proptest::prop_assert_eq!(fx.stored_value(&k), Some(*value));
            }
        }
    }
}
