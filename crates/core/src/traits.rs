//! Collaborator traits the numbering engine consumes from its host
//!
//! The engine never talks to a concrete repository. Everything it needs is
//! expressed here so that a clustered production host and the in-process
//! reference implementations are interchangeable:
//!
//! - [`LockService`]: cluster-wide named locks with a time-to-live
//! - [`TransactionExecutor`]: runs work in a transaction, retrying on conflict
//! - [`RecordStore`]: the transactional record/attribute view handed to that work
//! - [`TypeHierarchyResolver`]: subtype test over the host's type dictionary
//! - [`SystemIdentity`]: scoped elevation to the system identity
//!
//! The change trigger additionally talks to the host through [`RecordHost`],
//! [`BehaviourFilter`] and [`CopyCallback`].

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::error::{NumberingError, NumberingResult};
use crate::types::{
    ChildRef, LockToken, NewRecord, PropertyValue, RecordDescription, RecordId, TxnOptions,
};

/// Name of the privileged identity used for shared infrastructure
pub const SYSTEM_USER: &str = "System";

/// Cluster-scoped advisory lock service
///
/// Thread safety: All methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync).
pub trait LockService: Send + Sync {
    /// Acquire the lock `name` for at most `ttl`
    ///
    /// Makes up to `retry_count` attempts spaced `retry_interval` apart. A
    /// lock whose holder exceeded its TTL counts as free.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` when every attempt found the lock held.
    fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        retry_count: u32,
        retry_interval: Duration,
    ) -> NumberingResult<LockToken>;

    /// Release a lock previously acquired with `token`
    ///
    /// # Errors
    ///
    /// Returns an error if the token no longer owns the lock (for example
    /// because it expired and was taken over).
    fn release(&self, token: &LockToken, name: &str) -> NumberingResult<()>;
}

/// Transactional view of the host repository
///
/// Handed to transaction work by a [`TransactionExecutor`]. Reads are
/// recorded for conflict detection and writes become visible to others only
/// when the surrounding transaction commits.
pub trait RecordStore {
    /// Whether the record exists
    fn exists(&mut self, id: &RecordId) -> NumberingResult<bool>;

    /// Type name of the record
    fn type_of(&mut self, id: &RecordId) -> NumberingResult<String>;

    /// Traits applied to the record
    fn traits_of(&mut self, id: &RecordId) -> NumberingResult<BTreeSet<String>>;

    /// Read a property; `None` if unset
    fn property(&mut self, id: &RecordId, name: &str) -> NumberingResult<Option<PropertyValue>>;

    /// Write a property
    fn set_property(&mut self, id: &RecordId, name: &str, value: PropertyValue) -> NumberingResult<()>;

    /// Direct children of a container
    fn children(&mut self, parent: &RecordId) -> NumberingResult<Vec<ChildRef>>;

    /// Create a child record under `parent`
    ///
    /// # Errors
    ///
    /// Fails if a sibling with the same name already exists or the acting
    /// identity may not write to `parent`.
    fn create_child(&mut self, parent: &RecordId, record: NewRecord) -> NumberingResult<RecordId>;

    /// Find a direct child by name
    fn find_child(&mut self, parent: &RecordId, name: &str) -> NumberingResult<Option<RecordId>> {
        Ok(self
            .children(parent)?
            .into_iter()
            .find(|child| child.name == name)
            .map(|child| child.id))
    }

    /// Whether the flat attribute `namespace/key` exists
    fn attribute_exists(&mut self, namespace: &str, key: &str) -> NumberingResult<bool>;

    /// Read a flat attribute; `None` if absent
    fn attribute(&mut self, namespace: &str, key: &str) -> NumberingResult<Option<PropertyValue>>;

    /// Overwrite an existing flat attribute
    fn set_attribute(&mut self, namespace: &str, key: &str, value: PropertyValue) -> NumberingResult<()>;

    /// Create a flat attribute
    ///
    /// # Errors
    ///
    /// Fails if the attribute already exists.
    fn create_attribute(&mut self, namespace: &str, key: &str, value: PropertyValue) -> NumberingResult<()>;
}

/// Work executed inside a transaction
pub type TxnWork<'a> = dyn FnMut(&mut dyn RecordStore) -> NumberingResult<()> + 'a;

/// Executes work in a transaction, retrying the whole work on conflict
///
/// Implementations retry only on optimistic conflicts
/// ([`NumberingError::is_conflict`]), up to an internal bound, after which
/// they fail with `StorageConflict`. Any other error aborts the transaction
/// and is returned unchanged.
pub trait TransactionExecutor: Send + Sync {
    /// Run `work` until it commits, fails, or retries are exhausted
    fn run_retrying(&self, options: TxnOptions, work: &mut TxnWork<'_>) -> NumberingResult<()>;
}

/// Run `work` in a retrying transaction and return its value
///
/// Typed convenience over [`TransactionExecutor::run_retrying`]. Only the
/// value produced by the attempt that committed is returned.
pub fn in_transaction<T, F>(
    executor: &dyn TransactionExecutor,
    options: TxnOptions,
    mut work: F,
) -> NumberingResult<T>
where
    F: FnMut(&mut dyn RecordStore) -> NumberingResult<T>,
{
    let mut output = None;
    executor.run_retrying(options, &mut |store: &mut dyn RecordStore| {
        output = Some(work(store)?);
        Ok(())
    })?;
    output.ok_or_else(|| NumberingError::storage("transaction committed without producing a value"))
}

/// Subtype test over the host's type dictionary
pub trait TypeHierarchyResolver: Send + Sync {
    /// Whether `candidate` is a transitive subtype of `ancestor`
    fn is_subtype(&self, candidate: &str, ancestor: &str) -> bool;
}

/// Scoped elevation to the system identity
pub trait SystemIdentity: Send + Sync {
    /// The identity the current caller acts as, if any
    fn current(&self) -> Option<String>;

    /// Run `work` as [`SYSTEM_USER`]
    ///
    /// The caller's identity is restored on every exit path, including
    /// errors and panics inside `work`.
    fn run_as_system(&self, work: &mut dyn FnMut() -> NumberingResult<()>) -> NumberingResult<()>;
}

/// Run `work` as the system identity and return its value
pub fn as_system<T, F>(identity: &dyn SystemIdentity, mut work: F) -> NumberingResult<T>
where
    F: FnMut() -> NumberingResult<T>,
{
    let mut output = None;
    identity.run_as_system(&mut || {
        output = Some(work()?);
        Ok(())
    })?;
    output.ok_or_else(|| NumberingError::storage("elevated work completed without producing a value"))
}

/// Host repository operations used by the change trigger
///
/// Unlike [`RecordStore`] these run in the caller's own (host-managed)
/// transaction.
pub trait RecordHost: Send + Sync {
    /// Describe a record; a missing record yields `exists == false`
    fn describe(&self, id: &RecordId) -> NumberingResult<RecordDescription>;

    /// Check that the record is not locked by another actor
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another actor holds a lock on the record.
    fn check_for_lock(&self, id: &RecordId) -> NumberingResult<()>;

    /// Read a property rendered as text; `None` if unset
    fn text_property(&self, id: &RecordId, name: &str) -> NumberingResult<Option<String>>;

    /// Write a text property
    fn set_text_property(&self, id: &RecordId, name: &str, value: &str) -> NumberingResult<()>;
}

/// Per-record switch for the host's change notifications
pub trait BehaviourFilter: Send + Sync {
    /// Whether notifications fire for changes to `id`
    fn is_enabled(&self, id: &RecordId) -> bool;

    /// Suppress notifications for `id`
    fn disable(&self, id: &RecordId);

    /// Re-enable notifications for `id`
    fn enable(&self, id: &RecordId);
}

/// Hook consulted when the host duplicates a record
pub trait CopyCallback: Send + Sync {
    /// Filter the properties copied for `class` (the record type or one of
    /// its traits)
    fn copy_properties(
        &self,
        class: &str,
        properties: BTreeMap<String, PropertyValue>,
    ) -> BTreeMap<String, PropertyValue>;
}
