use super::TransactionId;
use crate::core::Result;
use crate::store::Store;
use tracing::warn;

/// A store transaction that rolls back when dropped uncommitted.
///
/// Every exit path of a mutating call goes through here: `commit` on
/// success, and either an explicit `rollback` or the drop on `?`.
pub struct TransactionScope<'a> {
    store: &'a dyn Store,
    id: TransactionId,
    finished: bool,
}

impl<'a> TransactionScope<'a> {
    pub fn begin(store: &'a dyn Store) -> Result<Self> {
        let id = store.begin()?;
        Ok(Self {
            store,
            id,
            finished: false,
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.store.commit(self.id)
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.store.rollback(self.id)
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.store.rollback(self.id) {
            warn!(transaction = %self.id, error = %e, "rollback on drop failed");
        }
    }
}
