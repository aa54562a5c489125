use crate::validation::BrokenRule;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("State consistency error: {0}")]
    StateConsistency(String),

    #[error("{type_name} not found: {detail}")]
    NotFound { type_name: String, detail: String },

    #[error("Validation failed: {}", format_broken_rules(.0))]
    Validation(Vec<BrokenRule>),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to resolve reference '{field}' on {type_name}: {source}")]
    Reference {
        type_name: String,
        field: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Cascade from {parent_type} into {child_type} failed: {source}")]
    Cascade {
        parent_type: String,
        child_type: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Audit error: {0}")]
    Audit(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

/// Flat classification of [`EngineError`] with wrappers removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StateConsistency,
    NotFound,
    Validation,
    ConstraintViolation,
    Conflict,
    Authorization,
    Authentication,
    Configuration,
    Store,
    Audit,
    Lock,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::StateConsistency => "state_consistency",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::ConstraintViolation => "constraint_violation",
            Self::Conflict => "conflict",
            Self::Authorization => "authorization",
            Self::Authentication => "authentication",
            Self::Configuration => "configuration",
            Self::Store => "store",
            Self::Audit => "audit",
            Self::Lock => "lock",
        };
        write!(f, "{label}")
    }
}

impl EngineError {
    pub fn not_found(type_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::NotFound {
            type_name: type_name.into(),
            detail: detail.into(),
        }
    }

    pub fn reference(type_name: &str, field: &str, source: EngineError) -> Self {
        Self::Reference {
            type_name: type_name.to_string(),
            field: field.to_string(),
            source: Box::new(source),
        }
    }

    pub fn cascade(parent_type: &str, child_type: &str, source: EngineError) -> Self {
        Self::Cascade {
            parent_type: parent_type.to_string(),
            child_type: child_type.to_string(),
            source: Box::new(source),
        }
    }

    /// The original failure, with reference and cascade wrappers peeled off.
    pub fn root(&self) -> &EngineError {
        match self {
            Self::Reference { source, .. } | Self::Cascade { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::StateConsistency(_) => ErrorKind::StateConsistency,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Store(_) => ErrorKind::Store,
            Self::Audit(_) => ErrorKind::Audit,
            Self::LockError(_) => ErrorKind::Lock,
            Self::Reference { .. } | Self::Cascade { .. } => unreachable!("root() strips wrappers"),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Broken rules carried by a validation failure, if any.
    pub fn broken_rules(&self) -> &[BrokenRule] {
        match self.root() {
            Self::Validation(rules) => rules,
            _ => &[],
        }
    }
}

fn format_broken_rules(rules: &[BrokenRule]) -> String {
    rules
        .iter()
        .map(|rule| rule.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl<T> From<std::sync::PoisonError<T>> for EngineError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_unwraps_nested_wrappers() {
        let err = EngineError::cascade(
            "Order",
            "OrderLine",
            EngineError::reference("OrderLine", "product_id", EngineError::not_found("Product", "key 7")),
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.is_not_found());
        assert!(matches!(err.root(), EngineError::NotFound { type_name, .. } if type_name == "Product"));
    }

    #[test]
    fn validation_message_lists_rules() {
        let err = EngineError::Validation(vec![
            BrokenRule::new("required", Some("name"), "name is required"),
            BrokenRule::new("max_length", Some("code"), "code is too long"),
        ]);
        let message = err.to_string();
        assert!(message.contains("name is required"));
        assert!(message.contains("code is too long"));
        assert_eq!(err.broken_rules().len(), 2);
    }
}
