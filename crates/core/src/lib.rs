//! Core types and traits for docnum
//!
//! This crate defines the foundational types used throughout the system:
//! - CounterKey: Counter id with optional series discriminator
//! - RecordId / PropertyValue / NewRecord: Host repository vocabulary
//! - EligibilityDescriptor: Input of the eligibility policy
//! - NumberingError: Error type hierarchy
//! - Traits: Collaborators consumed from the host (locks, transactions,
//!   records, type hierarchy, system identity)
//! - Clock: Injectable wall clock

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod traits;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{IneligibleReason, NumberingError, NumberingResult};
pub use traits::{
    as_system, in_transaction, BehaviourFilter, CopyCallback, LockService, RecordHost,
    RecordStore, SystemIdentity, TransactionExecutor, TxnWork, TypeHierarchyResolver,
    SYSTEM_USER,
};
pub use types::{
    ChildRef, CounterKey, EligibilityDescriptor, LockToken, NewRecord, PropertyValue,
    RecordDescription, RecordId, TxnOptions, OPTION_SEPARATOR,
};
