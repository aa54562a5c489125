use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque operation identifier selecting a registered query for a type.
///
/// The standard tokens are filled in by default entity mapping; everything
/// else is a `Named` token registered explicitly or through a child
/// relationship. Tokens convert from and serialize to their string form, so
/// the standard names (`"insert"`, `"find_all"`, ...) are reserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QueryToken {
    FindByPrimaryKey,
    FindAll,
    Insert,
    Update,
    Delete,
    Named(String),
}

impl QueryToken {
    pub fn named(name: impl Into<String>) -> Self {
        QueryToken::Named(name.into())
    }

    pub fn is_standard(&self) -> bool {
        !matches!(self, QueryToken::Named(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            QueryToken::FindByPrimaryKey => "find_by_primary_key",
            QueryToken::FindAll => "find_all",
            QueryToken::Insert => "insert",
            QueryToken::Update => "update",
            QueryToken::Delete => "delete",
            QueryToken::Named(name) => name,
        }
    }
}

impl fmt::Display for QueryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for QueryToken {
    fn from(name: &str) -> Self {
        match name {
            "find_by_primary_key" => QueryToken::FindByPrimaryKey,
            "find_all" => QueryToken::FindAll,
            "insert" => QueryToken::Insert,
            "update" => QueryToken::Update,
            "delete" => QueryToken::Delete,
            other => QueryToken::Named(other.to_string()),
        }
    }
}

impl From<String> for QueryToken {
    fn from(name: String) -> Self {
        match name.as_str() {
            "find_by_primary_key" | "find_all" | "insert" | "update" | "delete" => {
                QueryToken::from(name.as_str())
            }
            _ => QueryToken::Named(name),
        }
    }
}

impl From<QueryToken> for String {
    fn from(token: QueryToken) -> Self {
        match token {
            QueryToken::Named(name) => name,
            standard => standard.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_names_parse_to_standard_tokens() {
        assert_eq!(QueryToken::from("insert"), QueryToken::Insert);
        assert_eq!(QueryToken::from("lines".to_string()), QueryToken::named("lines"));
        assert!(QueryToken::FindAll.is_standard());
        assert!(!QueryToken::named("lines").is_standard());
    }

    #[test]
    fn tokens_serialize_as_strings() {
        let json = serde_json::to_string(&QueryToken::named("lines")).unwrap();
        assert_eq!(json, "\"lines\"");
        let back: QueryToken = serde_json::from_str("\"find_by_primary_key\"").unwrap();
        assert_eq!(back, QueryToken::FindByPrimaryKey);
    }
}
