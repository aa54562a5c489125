use super::{PropertyBag, SessionContext};
use crate::audit::AuditEntry;
use crate::cache::CacheWrite;
use crate::core::{EngineError, Result};
use crate::transaction::TransactionId;
use uuid::Uuid;

/// State threaded through one outer call and all of its nested cascades.
pub(crate) struct CallContext<'a> {
    pub session: &'a SessionContext,
    pub bag: &'a mut PropertyBag,
    pub transaction: Option<TransactionId>,
    audit_transaction: Option<String>,
    pub audit_entries: Vec<AuditEntry>,
    pub cache_writes: Vec<CacheWrite>,
    depth: usize,
    max_depth: usize,
}

impl<'a> CallContext<'a> {
    pub fn new(
        session: &'a SessionContext,
        bag: &'a mut PropertyBag,
        transaction: Option<TransactionId>,
        max_depth: usize,
    ) -> Self {
        Self {
            session,
            bag,
            transaction,
            audit_transaction: None,
            audit_entries: Vec::new(),
            cache_writes: Vec::new(),
            depth: 0,
            max_depth,
        }
    }

    pub fn is_mutating(&self) -> bool {
        self.transaction.is_some()
    }

    /// Audit transaction id shared by every entry of this outer call.
    pub fn audit_transaction_id(&mut self) -> String {
        self.audit_transaction
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }

    pub fn enter(&mut self, type_name: &str) -> Result<()> {
        if self.depth >= self.max_depth {
            let message = format!(
                "cascade depth limit {} exceeded at {}",
                self.max_depth, type_name
            );
            tracing::error!("{message}");
            return Err(EngineError::Configuration(message));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}
