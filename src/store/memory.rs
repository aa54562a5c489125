use super::{Store, StoreOutcome, StoreRequest};
use crate::context::SessionContext;
use crate::core::{EngineError, Params, Result, Row, Value};
use crate::dispatch::QueryKind;
use crate::transaction::{Change, TransactionId, TransactionManager};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// A request the store has seen, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub kind: QueryKind,
    pub table: String,
    pub token: String,
    pub params: Params,
}

#[derive(Default)]
struct Table {
    /// Keyed by a stable row id; iteration order is insertion order
    rows: BTreeMap<u64, Row>,
    next_row_id: u64,
    unique: Vec<Vec<String>>,
    defaults: Vec<(String, Value)>,
}

impl Table {
    fn matching_ids(&self, params: &Params) -> Vec<u64> {
        self.rows
            .iter()
            .filter(|(_, row)| matches(row, params))
            .map(|(id, _)| *id)
            .collect()
    }

    fn check_unique(&self, table: &str, row: &Row, skip: Option<u64>) -> Result<()> {
        for columns in &self.unique {
            let values: Vec<&Value> = columns
                .iter()
                .map(|c| row.get(c).unwrap_or(&Value::Null))
                .collect();
            if values.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = self.rows.iter().any(|(id, other)| {
                Some(*id) != skip
                    && columns
                        .iter()
                        .zip(&values)
                        .all(|(c, v)| other.get(c) == Some(*v))
            });
            if clash {
                return Err(EngineError::ConstraintViolation(format!(
                    "duplicate value for unique ({}) on {}",
                    columns.join(", "),
                    table
                )));
            }
        }
        Ok(())
    }

    fn insert(&mut self, table: &str, mut row: Row, identity: &Params) -> Result<u64> {
        for (column, value) in &self.defaults {
            let missing = row.get(column).is_none_or(Value::is_null);
            if missing {
                row.insert(column.clone(), value.clone());
            }
        }

        let identified = !identity.is_empty() && identity.iter().all(|(_, v)| !v.is_null());
        if identified && !self.matching_ids(identity).is_empty() {
            return Err(EngineError::ConstraintViolation(format!(
                "duplicate key {:?} on {}",
                identity, table
            )));
        }
        self.check_unique(table, &row, None)?;

        let row_id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(row_id, row);
        Ok(row_id)
    }
}

fn matches(row: &Row, params: &Params) -> bool {
    params
        .iter()
        .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
}

/// Reference store keeping tables of rows in memory.
///
/// Every query is an equality filter over its bound parameters. Writes are
/// applied immediately and undone from the transaction's change log on
/// rollback; other callers can see uncommitted rows in the meantime.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
    transactions: TransactionManager,
    sequences: Mutex<HashMap<String, i64>>,
    journal: Mutex<Vec<JournalEntry>>,
    failures: Mutex<Vec<(String, QueryKind)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, name: &str) -> Result<Arc<RwLock<Table>>> {
        if let Some(table) = self.tables.read()?.get(name) {
            return Ok(table.clone());
        }
        let mut tables = self.tables.write()?;
        Ok(tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Table::default())))
            .clone())
    }

    /// Rejects writes that would give two rows the same values in `columns`.
    pub fn add_unique(&self, table: &str, columns: &[&str]) -> Result<()> {
        let handle = self.table(table)?;
        handle
            .write()?
            .unique
            .push(columns.iter().map(|c| c.to_string()).collect());
        Ok(())
    }

    /// Server-side default: filled in on insert when the column is missing
    /// or NULL.
    pub fn set_default(&self, table: &str, column: &str, value: impl Into<Value>) -> Result<()> {
        let handle = self.table(table)?;
        let mut table = handle.write()?;
        let value = value.into();
        match table.defaults.iter_mut().find(|(c, _)| c == column) {
            Some((_, slot)) => *slot = value,
            None => table.defaults.push((column.to_string(), value)),
        }
        Ok(())
    }

    /// Writes a row outside any transaction.
    pub fn insert_row(&self, table: &str, row: Row) -> Result<()> {
        let handle = self.table(table)?;
        handle.write()?.insert(table, row, &Vec::new())?;
        Ok(())
    }

    /// Overwrites columns of every row matching `filter`, outside any
    /// transaction. Returns the number of rows changed.
    pub fn patch_rows(&self, table: &str, filter: &Params, columns: Row) -> Result<usize> {
        let handle = self.table(table)?;
        let mut table = handle.write()?;
        let ids = table.matching_ids(filter);
        for id in &ids {
            if let Some(row) = table.rows.get_mut(id) {
                row.extend(columns.clone());
            }
        }
        Ok(ids.len())
    }

    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        let handle = self.table(table)?;
        let table = handle.read()?;
        Ok(table.rows.values().cloned().collect())
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        let handle = self.table(table)?;
        let table = handle.read()?;
        Ok(table.rows.len())
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn journal(&self) -> Result<Vec<JournalEntry>> {
        Ok(self.journal.lock()?.clone())
    }

    /// Journal entries for inserts, updates and deletes only.
    pub fn writes(&self) -> Result<Vec<JournalEntry>> {
        Ok(self
            .journal
            .lock()?
            .iter()
            .filter(|entry| entry.kind.is_write())
            .cloned()
            .collect())
    }

    pub fn clear_journal(&self) -> Result<()> {
        self.journal.lock()?.clear();
        Ok(())
    }

    /// Makes the next `kind` request against `table` fail with a store error.
    pub fn fail_next(&self, table: &str, kind: QueryKind) -> Result<()> {
        self.failures.lock()?.push((table.to_string(), kind));
        Ok(())
    }

    pub fn active_transactions(&self) -> Result<usize> {
        self.transactions.active_count()
    }

    fn take_failure(&self, request: &StoreRequest<'_>) -> Result<()> {
        let mut failures = self.failures.lock()?;
        let position = failures
            .iter()
            .position(|(table, kind)| table == request.table && *kind == request.kind);
        match position {
            Some(position) => {
                failures.remove(position);
                warn!(table = request.table, kind = %request.kind, "injected store failure");
                Err(EngineError::Store(format!(
                    "injected failure: {} on {}",
                    request.kind, request.table
                )))
            }
            None => Ok(()),
        }
    }

    fn record(&self, transaction: Option<TransactionId>, change: Change) -> Result<()> {
        match transaction {
            Some(id) => self.transactions.record_change(id, change),
            None => Ok(()),
        }
    }

    fn undo(&self, change: Change) -> Result<()> {
        let handle = self.table(change.table_name())?;
        let mut table = handle.write()?;
        match change {
            Change::InsertRow { row_id, .. } => {
                table.rows.remove(&row_id);
            }
            Change::UpdateRow { row_id, old_row, .. } | Change::DeleteRow { row_id, old_row, .. } => {
                table.rows.insert(row_id, old_row);
            }
        }
        Ok(())
    }
}

impl Store for InMemoryStore {
    fn execute(&self, request: &StoreRequest<'_>, _session: &SessionContext) -> Result<StoreOutcome> {
        self.take_failure(request)?;
        self.journal.lock()?.push(JournalEntry {
            kind: request.kind,
            table: request.table.to_string(),
            token: request.token.to_string(),
            params: request.params.clone(),
        });

        let handle = self.table(request.table)?;
        match request.kind {
            QueryKind::SelectOne | QueryKind::SelectList => {
                let table = handle.read()?;
                let mut rows: Vec<Row> = table
                    .rows
                    .values()
                    .filter(|row| matches(row, &request.params))
                    .cloned()
                    .collect();
                if request.kind == QueryKind::SelectOne {
                    rows.truncate(1);
                }
                Ok(StoreOutcome::Rows(rows))
            }
            QueryKind::Insert => {
                let row = request.row.clone().ok_or_else(|| {
                    EngineError::Store(format!("insert into {} without a row", request.table))
                })?;
                let mut table = handle.write()?;
                let row_id = table.insert(request.table, row, &request.params)?;
                self.record(
                    request.transaction,
                    Change::InsertRow {
                        table: request.table.to_string(),
                        row_id,
                    },
                )?;
                Ok(StoreOutcome::Affected(1))
            }
            QueryKind::Update => {
                let columns = request.row.clone().ok_or_else(|| {
                    EngineError::Store(format!("update of {} without a row", request.table))
                })?;
                let mut table = handle.write()?;
                let ids = table.matching_ids(&request.params);
                for id in &ids {
                    let Some(old_row) = table.rows.get(id).cloned() else {
                        continue;
                    };
                    let mut new_row = old_row.clone();
                    new_row.extend(columns.clone());
                    table.check_unique(request.table, &new_row, Some(*id))?;
                    table.rows.insert(*id, new_row);
                    self.record(
                        request.transaction,
                        Change::UpdateRow {
                            table: request.table.to_string(),
                            row_id: *id,
                            old_row,
                        },
                    )?;
                }
                Ok(StoreOutcome::Affected(ids.len() as u64))
            }
            QueryKind::Delete => {
                let mut table = handle.write()?;
                let ids = table.matching_ids(&request.params);
                for id in &ids {
                    if let Some(old_row) = table.rows.remove(id) {
                        self.record(
                            request.transaction,
                            Change::DeleteRow {
                                table: request.table.to_string(),
                                row_id: *id,
                                old_row,
                            },
                        )?;
                    }
                }
                Ok(StoreOutcome::Affected(ids.len() as u64))
            }
        }
    }

    fn allocate_key(&self, sequence: &str) -> Result<Value> {
        let mut sequences = self.sequences.lock()?;
        let next = sequences.entry(sequence.to_string()).or_insert(0);
        *next += 1;
        debug!(sequence, key = *next, "allocated key");
        Ok(Value::Integer(*next))
    }

    fn begin(&self) -> Result<TransactionId> {
        self.transactions.begin()
    }

    fn commit(&self, transaction: TransactionId) -> Result<()> {
        self.transactions.commit(transaction)
    }

    fn rollback(&self, transaction: TransactionId) -> Result<()> {
        for change in self.transactions.rollback(transaction)? {
            self.undo(change)?;
        }
        Ok(())
    }
}
