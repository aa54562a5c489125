// ============================================================================
// Transaction State
// ============================================================================
//
// Active ──commit──> Committed
//   │
//   └──rollback──> Aborted
//
// ============================================================================

use super::Change;
use crate::core::{EngineError, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a store transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// One store transaction and the undo log of the writes it made.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    changes: Vec<Change>,
    start_time: std::time::Instant,
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            changes: Vec::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn record_change(&mut self, change: Change) -> Result<()> {
        self.ensure_active("record change")?;
        self.changes.push(change);
        Ok(())
    }

    /// Marks the transaction committed and forgets its undo log.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active("commit")?;
        self.changes.clear();
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Marks the transaction aborted and hands back the changes to undo,
    /// newest first.
    pub fn rollback(&mut self) -> Result<Vec<Change>> {
        self.ensure_active("rollback")?;
        self.state = TransactionState::Aborted;
        let mut changes = std::mem::take(&mut self.changes);
        changes.reverse();
        Ok(changes)
    }

    fn ensure_active(&self, action: &str) -> Result<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(EngineError::Store(format!(
                "cannot {}: transaction {} is {}",
                action, self.id, self.state
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Row;

    fn insert(table: &str, row_id: u64) -> Change {
        Change::InsertRow {
            table: table.to_string(),
            row_id,
        }
    }

    #[test]
    fn test_transaction_id_generation() {
        let id1 = TransactionId::new();
        let id2 = TransactionId::new();
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_transaction_lifecycle() {
        let mut txn = Transaction::new(TransactionId::new());
        assert!(txn.state().is_active());
        assert!(!txn.state().is_terminal());

        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn.commit().is_err());
    }

    #[test]
    fn test_rollback_returns_changes_newest_first() {
        let mut txn = Transaction::new(TransactionId::new());
        txn.record_change(insert("a", 1)).unwrap();
        txn.record_change(Change::DeleteRow {
            table: "b".to_string(),
            row_id: 7,
            old_row: Row::new(),
        })
        .unwrap();

        let undo = txn.rollback().unwrap();
        let tables: Vec<&str> = undo.iter().map(Change::table_name).collect();
        assert_eq!(tables, vec!["b", "a"]);
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(txn.record_change(insert("a", 2)).is_err());
    }
}
