use crate::context::{PropertyBag, SessionContext};
use crate::core::Result;
use crate::dispatch::QueryToken;
use crate::entity::{Dto, Operation};

/// What a pre-write hook decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Proceed,
    /// Commit nothing; the entity comes back in state UNSET
    Skip,
}

/// The store operation a write is about to run. Hooks may redirect it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    pub operation: Operation,
    pub token: QueryToken,
}

impl WriteTarget {
    pub fn new(operation: Operation) -> Self {
        let token = match operation {
            Operation::Add => QueryToken::Insert,
            Operation::Update => QueryToken::Update,
            Operation::Delete => QueryToken::Delete,
        };
        Self { operation, token }
    }
}

/// Per-type lifecycle callbacks. Every method defaults to a no-op.
pub trait EntityHooks: Send + Sync {
    fn pre_add_or_update(
        &self,
        _dto: &mut Dto,
        _target: &mut WriteTarget,
        _session: &SessionContext,
        _bag: &mut PropertyBag,
    ) -> Result<HookOutcome> {
        Ok(HookOutcome::Proceed)
    }

    /// Runs after the row is written and references resolved, before
    /// children are cascaded.
    fn post_write(
        &self,
        _dto: &mut Dto,
        _operation: Operation,
        _session: &SessionContext,
        _bag: &mut PropertyBag,
    ) -> Result<()> {
        Ok(())
    }

    fn pre_delete(
        &self,
        _dto: &mut Dto,
        _session: &SessionContext,
        _bag: &mut PropertyBag,
    ) -> Result<HookOutcome> {
        Ok(HookOutcome::Proceed)
    }

    fn post_delete(
        &self,
        _dto: &Dto,
        _session: &SessionContext,
        _bag: &mut PropertyBag,
    ) -> Result<()> {
        Ok(())
    }
}
