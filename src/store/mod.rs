// ============================================================================
// Store
// ============================================================================
//
// The persistence boundary. The engine hands the store one bound request
// per operation; the store answers with a row count or a result set.
//
// ============================================================================

pub mod memory;

pub use memory::{InMemoryStore, JournalEntry};

use crate::context::SessionContext;
use crate::core::{Params, Result, Row, Value};
use crate::dispatch::{QueryKind, QueryToken};
use crate::transaction::TransactionId;

/// One bound operation against the store.
#[derive(Debug, Clone)]
pub struct StoreRequest<'a> {
    pub type_name: &'a str,
    pub table: &'a str,
    pub token: &'a QueryToken,
    pub kind: QueryKind,
    pub statement: &'a str,
    /// Filter parameters (reads, update/delete targets, insert identity)
    pub params: Params,
    /// Column values written by inserts and updates
    pub row: Option<Row>,
    /// None for reads outside a mutating call
    pub transaction: Option<TransactionId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    Affected(u64),
    Rows(Vec<Row>),
}

impl StoreOutcome {
    pub fn affected(&self) -> u64 {
        match self {
            StoreOutcome::Affected(count) => *count,
            StoreOutcome::Rows(rows) => rows.len() as u64,
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            StoreOutcome::Rows(rows) => rows,
            StoreOutcome::Affected(_) => Vec::new(),
        }
    }
}

pub trait Store: Send + Sync {
    fn execute(&self, request: &StoreRequest<'_>, session: &SessionContext) -> Result<StoreOutcome>;

    /// Next value of a named key sequence.
    fn allocate_key(&self, sequence: &str) -> Result<Value>;

    fn begin(&self) -> Result<TransactionId>;

    fn commit(&self, transaction: TransactionId) -> Result<()>;

    fn rollback(&self, transaction: TransactionId) -> Result<()>;
}
