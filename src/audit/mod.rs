// ============================================================================
// Audit
// ============================================================================
//
// Property-level change history for audited types. Entries of one outer
// call share a transaction id and reach the sink in a single `record`
// call, before the store transaction commits.
//
// ============================================================================

pub(crate) mod recorder;

use crate::core::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub transaction_id: String,
    pub audit_id: String,
    pub class_name: String,
    pub property_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub create_id: String,
    pub create_datetime: DateTime<Utc>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entries: &[AuditEntry]) -> Result<()>;
}

/// Discards everything.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _entries: &[AuditEntry]) -> Result<()> {
        Ok(())
    }
}

/// Keeps entries in process for inspection.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
    batches: Mutex<usize>,
    fail_next: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.entries.lock()?.clone())
    }

    pub fn entries_for(&self, class_name: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .entries
            .lock()?
            .iter()
            .filter(|entry| entry.class_name == class_name)
            .cloned()
            .collect())
    }

    /// Number of `record` calls that stored entries.
    pub fn batches(&self) -> Result<usize> {
        Ok(*self.batches.lock()?)
    }

    pub fn clear(&self) -> Result<()> {
        self.entries.lock()?.clear();
        *self.batches.lock()? = 0;
        Ok(())
    }

    /// Makes the next `record` call fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entries: &[AuditEntry]) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Audit("audit sink unavailable".to_string()));
        }
        self.entries.lock()?.extend_from_slice(entries);
        *self.batches.lock()? += 1;
        Ok(())
    }
}
