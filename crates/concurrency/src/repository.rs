//! In-memory record repository with optimistic transactions
//!
//! This is the reference host store the counter backends run against. It
//! holds a tree of typed records with properties and traits, plus a flat
//! namespace of attributes, and exposes them transactionally through
//! [`RepoTransaction`], which implements [`RecordStore`].
//!
//! ## Concurrency
//!
//! Transactions are optimistic:
//! - every entry read records the version it was read at (0 = absent)
//! - writes are buffered in the transaction and invisible to others
//! - commit takes the state write lock, validates the whole read set
//!   (first-committer-wins) and applies all buffered writes with one new
//!   commit version
//!
//! Creating a child modifies its parent, so two transactions that both
//! listed a container and both add to it conflict: only one commits, the
//! other is retried by the executor and then sees the new child.

use dashmap::{DashMap, DashSet};
use docnum_core::{
    BehaviourFilter, ChildRef, CopyCallback, NewRecord, NumberingError, NumberingResult,
    PropertyValue, RecordDescription, RecordHost, RecordId, RecordStore,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use crate::identity::ThreadIdentity;

/// Default storage partition for new repositories
pub const DEFAULT_PARTITION: &str = "workspace://SpacesStore";

const AUTOCOMMIT_ATTEMPTS: usize = 16;

// ============================================================================
// Stored state
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EntryKey {
    Record(RecordId),
    Attribute(String, String),
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKey::Record(id) => write!(f, "record {}", id),
            EntryKey::Attribute(namespace, key) => write!(f, "attribute {}/{}", namespace, key),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    name: String,
    parent: Option<RecordId>,
    type_name: String,
    traits: BTreeSet<String>,
    properties: BTreeMap<String, PropertyValue>,
    children: BTreeMap<String, RecordId>,
    version: u64,
}

#[derive(Debug, Clone)]
struct StoredAttribute {
    value: PropertyValue,
    version: u64,
}

#[derive(Debug, Default)]
struct RepoState {
    records: HashMap<RecordId, StoredRecord>,
    attributes: HashMap<(String, String), StoredAttribute>,
}

impl RepoState {
    fn version_of(&self, key: &EntryKey) -> u64 {
        match key {
            EntryKey::Record(id) => self.records.get(id).map(|r| r.version).unwrap_or(0),
            EntryKey::Attribute(namespace, key) => self
                .attributes
                .get(&(namespace.clone(), key.clone()))
                .map(|a| a.version)
                .unwrap_or(0),
        }
    }
}

/// A change notification the host would have delivered to listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    /// Changed record
    pub record: RecordId,
    /// Changed property
    pub property: String,
}

/// Commit statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepositoryStats {
    /// Transactions that committed writes
    pub commits: u64,
    /// Transactions rejected at validation
    pub conflicts: u64,
}

// ============================================================================
// Repository
// ============================================================================

/// Tree of records plus flat attributes, shared by all transactions
#[derive(Debug)]
pub struct MemoryRepository {
    partition: String,
    state: RwLock<RepoState>,
    version: AtomicU64,
    next_txn_id: AtomicU64,
    protected: RwLock<HashSet<RecordId>>,
    record_locks: DashMap<RecordId, String>,
    suppressed: DashSet<RecordId>,
    notifications: Mutex<Vec<ChangeNotification>>,
    commits: AtomicU64,
    conflicts: AtomicU64,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITION)
    }
}

impl MemoryRepository {
    /// Create an empty repository whose records live in `partition`
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            state: RwLock::new(RepoState::default()),
            version: AtomicU64::new(0),
            next_txn_id: AtomicU64::new(1),
            protected: RwLock::new(HashSet::new()),
            record_locks: DashMap::new(),
            suppressed: DashSet::new(),
            notifications: Mutex::new(Vec::new()),
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    /// Storage partition of this repository's records
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Highest commit version so far
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Commit statistics
    pub fn stats(&self) -> RepositoryStats {
        RepositoryStats {
            commits: self.commits.load(Ordering::SeqCst),
            conflicts: self.conflicts.load(Ordering::SeqCst),
        }
    }

    /// Begin a transaction
    pub fn begin(&self, read_only: bool) -> RepoTransaction<'_> {
        RepoTransaction {
            repo: self,
            txn_id: self.next_txn_id.fetch_add(1, Ordering::SeqCst),
            read_only,
            read_set: HashMap::new(),
            staged_records: HashMap::new(),
            staged_attributes: HashMap::new(),
        }
    }

    /// Run `f` in its own transaction, re-running it on conflict
    pub fn autocommit<T, F>(&self, mut f: F) -> NumberingResult<T>
    where
        F: FnMut(&mut RepoTransaction<'_>) -> NumberingResult<T>,
    {
        let mut last_error = None;
        for _ in 0..AUTOCOMMIT_ATTEMPTS {
            let mut txn = self.begin(false);
            let value = match f(&mut txn) {
                Ok(value) => value,
                Err(e) if e.is_conflict() => {
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            match txn.commit() {
                Ok(_) => return Ok(value),
                Err(e) if e.is_conflict() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(NumberingError::StorageConflict {
            attempts: AUTOCOMMIT_ATTEMPTS,
            message: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    // ------------------------------------------------------------------------
    // Administrative operations (each runs as its own transaction)
    // ------------------------------------------------------------------------

    /// Create a top-level record
    pub fn create_root(&self, name: impl Into<String>, type_name: impl Into<String>) -> RecordId {
        let id = RecordId::generate(&self.partition);
        let record = StoredRecord {
            name: name.into(),
            parent: None,
            type_name: type_name.into(),
            traits: BTreeSet::new(),
            properties: BTreeMap::new(),
            children: BTreeMap::new(),
            version: self.version.fetch_add(1, Ordering::SeqCst) + 1,
        };
        self.state.write().records.insert(id.clone(), record);
        id
    }

    /// Create a record under `parent`
    pub fn create_record(&self, parent: &RecordId, record: NewRecord) -> NumberingResult<RecordId> {
        self.autocommit(|txn| txn.create_child(parent, record.clone()))
    }

    /// Only the system identity may create children of `container`
    pub fn protect(&self, container: &RecordId) {
        self.protected.write().insert(container.clone());
    }

    fn is_protected(&self, container: &RecordId) -> bool {
        self.protected.read().contains(container)
    }

    /// Whether the record exists
    pub fn exists(&self, id: &RecordId) -> bool {
        self.state.read().records.contains_key(id)
    }

    /// Name of the record under its parent
    pub fn name_of(&self, id: &RecordId) -> Option<String> {
        self.state.read().records.get(id).map(|r| r.name.clone())
    }

    /// Committed property value
    pub fn property(&self, id: &RecordId, name: &str) -> Option<PropertyValue> {
        self.state
            .read()
            .records
            .get(id)
            .and_then(|r| r.properties.get(name).cloned())
    }

    /// Write a property without raising change notifications
    pub fn set_property(&self, id: &RecordId, name: &str, value: PropertyValue) -> NumberingResult<()> {
        self.autocommit(|txn| txn.set_property(id, name, value.clone()))
    }

    /// Apply a trait to a record
    pub fn add_trait(&self, id: &RecordId, trait_name: &str) -> NumberingResult<()> {
        self.autocommit(|txn| {
            txn.record_mut(id)?.traits.insert(trait_name.to_string());
            Ok(())
        })
    }

    /// Remove a trait from a record
    pub fn remove_trait(&self, id: &RecordId, trait_name: &str) -> NumberingResult<()> {
        self.autocommit(|txn| {
            txn.record_mut(id)?.traits.remove(trait_name);
            Ok(())
        })
    }

    /// Committed children of a container
    pub fn children_of(&self, parent: &RecordId) -> Vec<ChildRef> {
        self.state
            .read()
            .records
            .get(parent)
            .map(|r| {
                r.children
                    .iter()
                    .map(|(name, id)| ChildRef {
                        name: name.clone(),
                        id: id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Delete a record and everything below it
    pub fn delete(&self, id: &RecordId) -> NumberingResult<()> {
        let mut state = self.state.write();
        let record = state
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| NumberingError::not_found(format!("record {}", id)))?;

        let mut pending = vec![id.clone()];
        let mut removed = 0usize;
        while let Some(next) = pending.pop() {
            if let Some(gone) = state.records.remove(&next) {
                pending.extend(gone.children.into_values());
                self.record_locks.remove(&next);
                removed += 1;
            }
        }

        if let Some(parent_id) = &record.parent {
            let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(parent) = state.records.get_mut(parent_id) {
                parent.children.remove(&record.name);
                parent.version = version;
            }
        }
        debug!(record = %id, removed, "deleted record subtree");
        Ok(())
    }

    /// Remove a flat attribute
    pub fn remove_attribute(&self, namespace: &str, key: &str) -> bool {
        self.state
            .write()
            .attributes
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some()
    }

    /// Committed flat attribute value
    pub fn attribute(&self, namespace: &str, key: &str) -> Option<PropertyValue> {
        self.state
            .read()
            .attributes
            .get(&(namespace.to_string(), key.to_string()))
            .map(|a| a.value.clone())
    }

    /// Lock a record on behalf of `owner`
    pub fn lock_record(&self, id: &RecordId, owner: impl Into<String>) {
        self.record_locks.insert(id.clone(), owner.into());
    }

    /// Remove any lock on a record
    pub fn unlock_record(&self, id: &RecordId) {
        self.record_locks.remove(id);
    }

    /// Duplicate `source` as `name` under `parent`
    ///
    /// Every callback sees the properties once per class of the source (its
    /// type, then each trait) and may drop properties from the copy.
    /// Children are not copied.
    pub fn copy_record(
        &self,
        source: &RecordId,
        parent: &RecordId,
        name: &str,
        callbacks: &[&dyn CopyCallback],
    ) -> NumberingResult<RecordId> {
        let original = self
            .state
            .read()
            .records
            .get(source)
            .cloned()
            .ok_or_else(|| NumberingError::not_found(format!("record {}", source)))?;

        let mut properties = original.properties.clone();
        let classes = std::iter::once(&original.type_name).chain(original.traits.iter());
        for class in classes {
            for callback in callbacks {
                properties = callback.copy_properties(class, properties);
            }
        }

        let copy = NewRecord {
            name: name.to_string(),
            type_name: original.type_name.clone(),
            traits: original.traits.iter().cloned().collect(),
            properties: properties.into_iter().collect(),
        };
        self.create_record(parent, copy)
    }

    /// Notifications raised so far
    pub fn notifications(&self) -> Vec<ChangeNotification> {
        self.notifications.lock().clone()
    }

    /// Forget recorded notifications
    pub fn clear_notifications(&self) {
        self.notifications.lock().clear();
    }
}

// ============================================================================
// Host-facing operations
// ============================================================================

impl RecordHost for MemoryRepository {
    fn describe(&self, id: &RecordId) -> NumberingResult<RecordDescription> {
        let state = self.state.read();
        Ok(match state.records.get(id) {
            Some(record) => RecordDescription {
                id: id.clone(),
                exists: true,
                type_name: record.type_name.clone(),
                traits: record.traits.clone(),
            },
            None => RecordDescription::missing(id.clone()),
        })
    }

    fn check_for_lock(&self, id: &RecordId) -> NumberingResult<()> {
        if let Some(owner) = self.record_locks.get(id) {
            if ThreadIdentity::current_user().as_deref() != Some(owner.as_str()) {
                return Err(NumberingError::Locked(format!(
                    "{} is locked by {}",
                    id,
                    owner.value()
                )));
            }
        }
        Ok(())
    }

    fn text_property(&self, id: &RecordId, name: &str) -> NumberingResult<Option<String>> {
        let state = self.state.read();
        let record = state
            .records
            .get(id)
            .ok_or_else(|| NumberingError::not_found(format!("record {}", id)))?;
        Ok(record.properties.get(name).map(|value| match value {
            PropertyValue::Text(s) => s.clone(),
            PropertyValue::Int(v) => v.to_string(),
            PropertyValue::Bool(b) => b.to_string(),
        }))
    }

    fn set_text_property(&self, id: &RecordId, name: &str, value: &str) -> NumberingResult<()> {
        self.set_property(id, name, PropertyValue::Text(value.to_string()))?;
        if self.is_enabled(id) {
            self.notifications.lock().push(ChangeNotification {
                record: id.clone(),
                property: name.to_string(),
            });
        }
        Ok(())
    }
}

impl BehaviourFilter for MemoryRepository {
    fn is_enabled(&self, id: &RecordId) -> bool {
        !self.suppressed.contains(id)
    }

    fn disable(&self, id: &RecordId) {
        self.suppressed.insert(id.clone());
    }

    fn enable(&self, id: &RecordId) {
        self.suppressed.remove(id);
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// An optimistic transaction over a [`MemoryRepository`]
///
/// Dropping a transaction without committing discards its writes.
#[derive(Debug)]
pub struct RepoTransaction<'a> {
    repo: &'a MemoryRepository,
    txn_id: u64,
    read_only: bool,
    read_set: HashMap<EntryKey, u64>,
    staged_records: HashMap<RecordId, StoredRecord>,
    staged_attributes: HashMap<(String, String), PropertyValue>,
}

impl<'a> RepoTransaction<'a> {
    /// Transaction id
    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    /// Whether any write is buffered
    pub fn has_writes(&self) -> bool {
        !self.staged_records.is_empty() || !self.staged_attributes.is_empty()
    }

    /// Validate the read set and apply buffered writes
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if any entry read by this transaction changed
    /// after it was read.
    pub fn commit(self) -> NumberingResult<u64> {
        let RepoTransaction {
            repo,
            txn_id,
            read_set,
            staged_records,
            staged_attributes,
            ..
        } = self;

        if staged_records.is_empty() && staged_attributes.is_empty() {
            return Ok(repo.current_version());
        }

        let mut state = repo.state.write();
        for (key, &read_version) in &read_set {
            let current = state.version_of(key);
            if current != read_version {
                repo.conflicts.fetch_add(1, Ordering::SeqCst);
                debug!(txn_id, entry = %key, read_version, current, "commit rejected");
                return Err(NumberingError::conflict(format!(
                    "{} changed since read (v{} -> v{})",
                    key, read_version, current
                )));
            }
        }

        let commit_version = repo.version.fetch_add(1, Ordering::SeqCst) + 1;
        for (id, mut record) in staged_records {
            record.version = commit_version;
            state.records.insert(id, record);
        }
        for (key, value) in staged_attributes {
            state.attributes.insert(
                key,
                StoredAttribute {
                    value,
                    version: commit_version,
                },
            );
        }
        repo.commits.fetch_add(1, Ordering::SeqCst);
        trace!(txn_id, commit_version, "transaction committed");
        Ok(commit_version)
    }

    fn ensure_writable(&self) -> NumberingResult<()> {
        if self.read_only {
            return Err(NumberingError::invalid_input(format!(
                "transaction {} is read-only",
                self.txn_id
            )));
        }
        Ok(())
    }

    fn read_record(&mut self, id: &RecordId) -> Option<StoredRecord> {
        if let Some(record) = self.staged_records.get(id) {
            return Some(record.clone());
        }
        let found = self.repo.state.read().records.get(id).cloned();
        let version = found.as_ref().map(|r| r.version).unwrap_or(0);
        self.read_set
            .entry(EntryKey::Record(id.clone()))
            .or_insert(version);
        found
    }

    fn existing_record(&mut self, id: &RecordId) -> NumberingResult<StoredRecord> {
        self.read_record(id)
            .ok_or_else(|| NumberingError::not_found(format!("record {}", id)))
    }

    fn record_mut(&mut self, id: &RecordId) -> NumberingResult<&mut StoredRecord> {
        self.ensure_writable()?;
        if !self.staged_records.contains_key(id) {
            let record = self.existing_record(id)?;
            self.staged_records.insert(id.clone(), record);
        }
        self.staged_records
            .get_mut(id)
            .ok_or_else(|| NumberingError::not_found(format!("record {}", id)))
    }

    fn read_attribute(&mut self, namespace: &str, key: &str) -> Option<PropertyValue> {
        let slot = (namespace.to_string(), key.to_string());
        if let Some(value) = self.staged_attributes.get(&slot) {
            return Some(value.clone());
        }
        let found = self.repo.state.read().attributes.get(&slot).cloned();
        let version = found.as_ref().map(|a| a.version).unwrap_or(0);
        self.read_set
            .entry(EntryKey::Attribute(slot.0, slot.1))
            .or_insert(version);
        found.map(|a| a.value)
    }
}

impl RecordStore for RepoTransaction<'_> {
    fn exists(&mut self, id: &RecordId) -> NumberingResult<bool> {
        Ok(self.read_record(id).is_some())
    }

    fn type_of(&mut self, id: &RecordId) -> NumberingResult<String> {
        Ok(self.existing_record(id)?.type_name)
    }

    fn traits_of(&mut self, id: &RecordId) -> NumberingResult<BTreeSet<String>> {
        Ok(self.existing_record(id)?.traits)
    }

    fn property(&mut self, id: &RecordId, name: &str) -> NumberingResult<Option<PropertyValue>> {
        Ok(self.existing_record(id)?.properties.get(name).cloned())
    }

    fn set_property(&mut self, id: &RecordId, name: &str, value: PropertyValue) -> NumberingResult<()> {
        self.record_mut(id)?.properties.insert(name.to_string(), value);
        Ok(())
    }

    fn children(&mut self, parent: &RecordId) -> NumberingResult<Vec<ChildRef>> {
        let record = self.existing_record(parent)?;
        Ok(record
            .children
            .into_iter()
            .map(|(name, id)| ChildRef { name, id })
            .collect())
    }

    fn create_child(&mut self, parent: &RecordId, record: NewRecord) -> NumberingResult<RecordId> {
        self.ensure_writable()?;
        if self.repo.is_protected(parent) && !ThreadIdentity::is_system() {
            return Err(NumberingError::PermissionDenied(format!(
                "{:?} may not create children of {}",
                ThreadIdentity::current_user(),
                parent
            )));
        }

        let id = RecordId::generate(&self.repo.partition);
        let container = self.record_mut(parent)?;
        if container.children.contains_key(&record.name) {
            return Err(NumberingError::conflict(format!(
                "{} already has a child named {}",
                parent, record.name
            )));
        }
        container.children.insert(record.name.clone(), id.clone());

        let stored = StoredRecord {
            name: record.name,
            parent: Some(parent.clone()),
            type_name: record.type_name,
            traits: record.traits.into_iter().collect(),
            properties: record.properties.into_iter().collect(),
            children: BTreeMap::new(),
            version: 0,
        };
        self.read_set.insert(EntryKey::Record(id.clone()), 0);
        self.staged_records.insert(id.clone(), stored);
        Ok(id)
    }

    fn attribute_exists(&mut self, namespace: &str, key: &str) -> NumberingResult<bool> {
        Ok(self.read_attribute(namespace, key).is_some())
    }

    fn attribute(&mut self, namespace: &str, key: &str) -> NumberingResult<Option<PropertyValue>> {
        Ok(self.read_attribute(namespace, key))
    }

    fn set_attribute(&mut self, namespace: &str, key: &str, value: PropertyValue) -> NumberingResult<()> {
        self.ensure_writable()?;
        if self.read_attribute(namespace, key).is_none() {
            return Err(NumberingError::not_found(format!(
                "attribute {}/{}",
                namespace, key
            )));
        }
        self.staged_attributes
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    fn create_attribute(&mut self, namespace: &str, key: &str, value: PropertyValue) -> NumberingResult<()> {
        self.ensure_writable()?;
        if self.read_attribute(namespace, key).is_some() {
            return Err(NumberingError::conflict(format!(
                "attribute {}/{} already exists",
                namespace, key
            )));
        }
        self.staged_attributes
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }
}
