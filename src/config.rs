use crate::core::{EngineError, Result};

/// Engine-wide settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Re-read the stored row before applying an update sent by a
    /// stateless client
    pub refresh_stateless_updates: bool,

    /// Nesting limit for cascades and hydration
    pub max_cascade_depth: usize,

    /// Row limit for list queries, lifted per call by the `SKIP_LIMIT` flag
    pub max_query_rows: Option<usize>,

    /// Audit `create_id` for anonymous sessions
    pub system_user: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            refresh_stateless_updates: true,
            max_cascade_depth: 64,
            max_query_rows: None,
            system_user: "system".to_string(),
        }
    }

    pub fn refresh_stateless_updates(mut self, enabled: bool) -> Self {
        self.refresh_stateless_updates = enabled;
        self
    }

    pub fn max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    pub fn max_query_rows(mut self, rows: usize) -> Self {
        self.max_query_rows = Some(rows);
        self
    }

    pub fn system_user(mut self, user: &str) -> Self {
        self.system_user = user.to_string();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_cascade_depth == 0 {
            return Err(EngineError::Configuration(
                "max_cascade_depth must be > 0".to_string(),
            ));
        }
        if self.max_query_rows == Some(0) {
            return Err(EngineError::Configuration(
                "max_query_rows must be > 0".to_string(),
            ));
        }
        if self.system_user.is_empty() {
            return Err(EngineError::Configuration(
                "system_user cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
