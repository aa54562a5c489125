use super::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A flat store row: column name to value.
pub type Row = BTreeMap<String, Value>;

/// Bound query parameters, in binding order.
pub type Params = Vec<(String, Value)>;

/// Identity of a persisted entity: its type plus primary key.
///
/// This is what the ancestor stack and cache slots key on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityIdentity {
    pub type_name: String,
    pub key: Value,
}

impl EntityIdentity {
    pub fn new(type_name: impl Into<String>, key: impl Into<Value>) -> Self {
        Self {
            type_name: type_name.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for EntityIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.key)
    }
}
