//! Concurrency layer for docnum
//!
//! In-process implementations of the host collaborators the numbering
//! engine consumes:
//! - InMemoryLockService: Named locks with TTL and polling acquisition
//! - MemoryRepository / RepoTransaction: Record tree with optimistic
//!   concurrency control (read-set validation at commit)
//! - RetryingExecutor / CommitBackoff: Re-runs lost commits with backoff
//! - ThreadIdentity: Thread-bound acting identity with scoped elevation
//! - StaticTypeHierarchy: Fixed type dictionary

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod executor;
pub mod hierarchy;
pub mod identity;
pub mod lock;
pub mod repository;

pub use backoff::{
    CommitBackoff, DEFAULT_COMMIT_BASE_DELAY, DEFAULT_COMMIT_MAX_DELAY, DEFAULT_COMMIT_RETRIES,
};
pub use executor::RetryingExecutor;
pub use hierarchy::StaticTypeHierarchy;
pub use identity::{IdentityGuard, ThreadIdentity};
pub use lock::InMemoryLockService;
pub use repository::{
    ChangeNotification, MemoryRepository, RepoTransaction, RepositoryStats, DEFAULT_PARTITION,
};
