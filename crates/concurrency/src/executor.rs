//! Retrying transaction executor over [`MemoryRepository`]

use std::sync::Arc;

use docnum_core::{NumberingError, NumberingResult, TransactionExecutor, TxnOptions, TxnWork};
use tracing::{debug, warn};

use crate::repository::MemoryRepository;
use crate::backoff::CommitBackoff;

/// Runs work in fresh repository transactions, retrying on conflict
///
/// Every call runs in its own transaction, so `TxnOptions::force_new` is
/// always satisfied. When work fails with a conflict, or the commit is
/// rejected, the whole work is re-run after an exponential backoff delay.
#[derive(Debug, Clone)]
pub struct RetryingExecutor {
    repo: Arc<MemoryRepository>,
    backoff: CommitBackoff,
}

impl RetryingExecutor {
    /// Create an executor with the default commit backoff
    pub fn new(repo: Arc<MemoryRepository>) -> Self {
        Self::with_backoff(repo, CommitBackoff::default())
    }

    /// Create an executor with an explicit commit backoff
    pub fn with_backoff(repo: Arc<MemoryRepository>, backoff: CommitBackoff) -> Self {
        Self { repo, backoff }
    }

    /// The repository transactions run against
    pub fn repository(&self) -> &Arc<MemoryRepository> {
        &self.repo
    }

    /// Commit backoff in use
    pub fn backoff(&self) -> &CommitBackoff {
        &self.backoff
    }
}

impl TransactionExecutor for RetryingExecutor {
    fn run_retrying(&self, options: TxnOptions, work: &mut TxnWork<'_>) -> NumberingResult<()> {
        let mut last_error = None;

        for attempt in 0..=self.backoff.retries {
            let mut txn = self.repo.begin(options.read_only);
            let txn_id = txn.txn_id();
            let outcome = work(&mut txn).and_then(|()| txn.commit().map(|_| ()));

            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if e.is_conflict() && attempt < self.backoff.retries => {
                    debug!(txn_id, attempt, error = %e, "transaction conflict, retrying");
                    last_error = Some(e);
                    std::thread::sleep(self.backoff.delay_after(attempt));
                }
                Err(e) if e.is_conflict() => {
                    warn!(
                        txn_id,
                        attempts = self.backoff.attempts(),
                        error = %e,
                        "transaction retries exhausted"
                    );
                    return Err(NumberingError::StorageConflict {
                        attempts: self.backoff.attempts(),
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Err(NumberingError::StorageConflict {
            attempts: self.backoff.attempts(),
            message: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}
