//! Counter storage layer for docnum
//!
//! This crate implements durable, race-free counters with:
//! - CounterStore: Increment contract shared by every backend
//! - Lock discipline: One named cluster lock per counter, released by guard
//! - CounterCache: Self-healing location cache verified on every access
//! - AttributeCounterStore: Flat namespaced attributes (experimental)
//! - NodeCounterStore: Hidden child records under a numbering container
//!
//! # Increment Protocol
//!
//! 1. Acquire `docnum.counter.<storage name>.lock` (TTL, bounded polling)
//! 2. Run read-modify-write in a fresh transaction, retried on conflict
//! 3. Release the lock, whatever the outcome

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute;
pub mod cache;
pub mod locking;
pub mod node;
pub mod store;

pub use attribute::{AttributeCounterStore, ATTRIBUTE_NAMESPACE};
pub use cache::CounterCache;
pub use locking::{lock_name, with_counter_lock, LockSettings};
pub use node::{
    NodeCounterStore, CONTAINER_NAME, CONTAINER_TYPE, COUNTER_TYPE, COUNTER_VALUE_PROPERTY,
    HIDDEN_TRAIT,
};
pub use store::{CounterBackend, CounterStore};
