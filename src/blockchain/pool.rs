use std::sync::{Mutex, MutexGuard, PoisonError};

use super::transaction::Transaction;

/// Admitted transactions waiting to be mined, in arrival order
///
/// Only the mining path removes entries, and it always removes the prefix it
/// snapshotted earlier. Transactions pushed in between stay queued for the
/// next block.
#[derive(Debug, Default)]
pub struct TransactionPool {
    pending: Mutex<Vec<Transaction>>,
}

impl TransactionPool {
    pub fn new() -> Self {
        TransactionPool::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Transaction>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an admitted transaction
    pub fn push(&self, transaction: Transaction) {
        self.lock().push(transaction);
    }

    /// Copies the current contents, oldest first
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.lock().clone()
    }

    /// Removes the `count` oldest transactions
    ///
    /// # Returns
    ///
    /// The removed transactions
    pub fn remove_mined(&self, count: usize) -> Vec<Transaction> {
        let mut pending = self.lock();
        let count = count.min(pending.len());
        pending.drain(..count).collect()
    }

    /// Removes a transaction by id, e.g. after it made mining abort
    ///
    /// Removes only the first entry carrying `tx_id`.
    pub fn evict(&self, tx_id: &str) -> Option<Transaction> {
        let mut pending = self.lock();
        let position = pending.iter().position(|tx| tx.tx_id == tx_id)?;
        Some(pending.remove(position))
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.lock().iter().any(|tx| tx.tx_id == tx_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
