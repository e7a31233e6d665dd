//! Store write plus cache invalidation as one unit.
//!
//! A [`UnitOfWork`] wraps an open transaction and collects the cache keys its
//! writes touch. [`UnitOfWork::commit`] commits the transaction and then
//! invalidates every collected key before returning, so the caller is only
//! answered once the cache can no longer serve the old row (or a retry has
//! been scheduled). Dropping or rolling back discards the keys with the
//! writes.

use std::sync::Arc;

use crate::IamResult;
use crate::cache::Invalidator;
use crate::storage::{AuthorityStorage, AuthorityTransaction};
use crate::types::Authority;

/// An open transaction and the cache keys to invalidate once it commits.
pub struct UnitOfWork<E: Authority> {
    tx: Box<dyn AuthorityTransaction<E>>,
    invalidator: Arc<Invalidator>,
    pending: Vec<String>,
}

impl<E: Authority> UnitOfWork<E> {
    /// Begins a transaction on `storage`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started.
    pub async fn begin(
        storage: &dyn AuthorityStorage<E>,
        invalidator: Arc<Invalidator>,
    ) -> IamResult<Self> {
        Ok(Self {
            tx: storage.begin().await?,
            invalidator,
            pending: Vec::new(),
        })
    }

    /// The open transaction.
    pub fn tx(&mut self) -> &mut dyn AuthorityTransaction<E> {
        self.tx.as_mut()
    }

    /// Queues keys for invalidation on commit.
    pub fn invalidate_on_commit(&mut self, keys: impl IntoIterator<Item = String>) {
        for key in keys {
            if !self.pending.contains(&key) {
                self.pending.push(key);
            }
        }
    }

    /// Keys queued so far.
    pub fn pending_keys(&self) -> &[String] {
        &self.pending
    }

    /// Commits, then invalidates the queued keys.
    ///
    /// # Errors
    ///
    /// Returns the commit error. Invalidation failures are retried in the
    /// background and never surface here.
    pub async fn commit(self) -> IamResult<()> {
        self.tx.commit().await?;
        if !self.pending.is_empty() {
            self.invalidator.invalidate(&self.pending).await;
        }
        Ok(())
    }

    /// Rolls back and drops the queued keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    pub async fn rollback(self) -> IamResult<()> {
        self.tx.rollback().await
    }
}
