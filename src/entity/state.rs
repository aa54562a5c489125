// ============================================================================
// Entity State
// ============================================================================
//
// The state flag on a DTO names the operation the caller wants next.
//
//   NEW ──set──> NEWMODIFIED ──add──> UNSET
//   UNSET ──set──> UPDATED ──update──> UNSET
//   any ──mark_deleted──> DELETED ──delete──> DELETED
//
// ============================================================================

use crate::core::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DtoState {
    /// Created by the caller, never persisted
    New,
    /// New and mutated through setters since creation
    NewModified,
    /// Loaded, then mutated
    Updated,
    /// Marked for removal
    Deleted,
    /// Clean: loaded, or committed
    Unset,
}

impl DtoState {
    pub fn is_new(&self) -> bool {
        matches!(self, DtoState::New | DtoState::NewModified)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, DtoState::Deleted)
    }

    /// State after a tracked setter runs.
    pub(crate) fn after_mutation(self) -> Self {
        match self {
            DtoState::New => DtoState::NewModified,
            DtoState::Unset => DtoState::Updated,
            other => other,
        }
    }
}

impl fmt::Display for DtoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DtoState::New => write!(f, "NEW"),
            DtoState::NewModified => write!(f, "NEWMODIFIED"),
            DtoState::Updated => write!(f, "UPDATED"),
            DtoState::Deleted => write!(f, "DELETED"),
            DtoState::Unset => write!(f, "UNSET"),
        }
    }
}

/// A mutating lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Add,
    Update,
    Delete,
}

impl Operation {
    /// Fails unless `state` is one this operation may be applied to.
    pub fn check_state(&self, type_name: &str, state: DtoState) -> Result<()> {
        let allowed = match self {
            Operation::Add => state.is_new(),
            Operation::Update => !state.is_new() && !state.is_deleted(),
            Operation::Delete => state.is_deleted(),
        };
        if allowed {
            Ok(())
        } else {
            Err(EngineError::StateConsistency(format!(
                "cannot {} {} in state {}",
                self, type_name, state
            )))
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Add => write!(f, "ADD"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_transitions() {
        assert_eq!(DtoState::New.after_mutation(), DtoState::NewModified);
        assert_eq!(DtoState::Unset.after_mutation(), DtoState::Updated);
        assert_eq!(DtoState::Deleted.after_mutation(), DtoState::Deleted);
        assert_eq!(DtoState::Updated.after_mutation(), DtoState::Updated);
    }

    #[test]
    fn test_operation_state_matrix() {
        assert!(Operation::Add.check_state("T", DtoState::New).is_ok());
        assert!(Operation::Add.check_state("T", DtoState::NewModified).is_ok());
        assert!(Operation::Add.check_state("T", DtoState::Unset).is_err());

        assert!(Operation::Update.check_state("T", DtoState::Updated).is_ok());
        assert!(Operation::Update.check_state("T", DtoState::Unset).is_ok());
        assert!(Operation::Update.check_state("T", DtoState::New).is_err());
        assert!(Operation::Update.check_state("T", DtoState::Deleted).is_err());

        assert!(Operation::Delete.check_state("T", DtoState::Deleted).is_ok());
        assert!(Operation::Delete.check_state("T", DtoState::Updated).is_err());
    }
}
