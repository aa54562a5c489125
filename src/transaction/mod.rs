// ============================================================================
// Transaction Management
// ============================================================================
//
// Store transactions for one outer Add/Update/Delete call.
//
// - State: Active -> Committed / Aborted
// - Change: undo log entries replayed newest-first on rollback
// - TransactionScope: defer-style commit/rollback around a cascade
//
// ============================================================================

pub mod change;
pub mod manager;
pub mod scope;
pub mod state;

pub use change::Change;
pub use manager::TransactionManager;
pub use scope::TransactionScope;
pub use state::{Transaction, TransactionId, TransactionState};
