// ============================================================================
// Transaction Manager
// ============================================================================

use super::{Change, Transaction, TransactionId, TransactionState};
use crate::core::{EngineError, Result};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Tracks open store transactions and their undo logs.
#[derive(Default)]
pub struct TransactionManager {
    transactions: RwLock<HashMap<TransactionId, Transaction>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> Result<TransactionId> {
        let id = TransactionId::new();
        self.transactions.write()?.insert(id, Transaction::new(id));
        debug!(transaction = %id, "transaction started");
        Ok(id)
    }

    pub fn record_change(&self, id: TransactionId, change: Change) -> Result<()> {
        let mut transactions = self.transactions.write()?;
        transactions
            .get_mut(&id)
            .ok_or_else(|| unknown(id))?
            .record_change(change)
    }

    pub fn commit(&self, id: TransactionId) -> Result<()> {
        let mut transactions = self.transactions.write()?;
        let mut txn = transactions.remove(&id).ok_or_else(|| unknown(id))?;
        let changes = txn.change_count();
        txn.commit()?;
        debug!(transaction = %id, changes, elapsed = ?txn.duration(), "transaction committed");
        Ok(())
    }

    /// Ends the transaction and returns its changes, newest first, for the
    /// caller to reverse.
    pub fn rollback(&self, id: TransactionId) -> Result<Vec<Change>> {
        let mut transactions = self.transactions.write()?;
        let mut txn = transactions.remove(&id).ok_or_else(|| unknown(id))?;
        let undo = txn.rollback()?;
        debug!(transaction = %id, changes = undo.len(), "transaction rolled back");
        Ok(undo)
    }

    pub fn state(&self, id: TransactionId) -> Result<Option<TransactionState>> {
        Ok(self.transactions.read()?.get(&id).map(Transaction::state))
    }

    pub fn active_count(&self) -> Result<usize> {
        Ok(self.transactions.read()?.len())
    }
}

fn unknown(id: TransactionId) -> EngineError {
    EngineError::Store(format!("transaction {} is not active", id))
}
