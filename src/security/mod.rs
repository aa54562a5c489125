use crate::context::SessionContext;
use crate::core::{EngineError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Operation a caller asks to perform on an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Add,
    Update,
    Delete,
    /// Implies every other permission on every type
    Admin,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Read => write!(f, "READ"),
            Permission::Add => write!(f, "ADD"),
            Permission::Update => write!(f, "UPDATE"),
            Permission::Delete => write!(f, "DELETE"),
            Permission::Admin => write!(f, "ADMIN"),
        }
    }
}

impl From<crate::entity::Operation> for Permission {
    fn from(operation: crate::entity::Operation) -> Self {
        match operation {
            crate::entity::Operation::Add => Permission::Add,
            crate::entity::Operation::Update => Permission::Update,
            crate::entity::Operation::Delete => Permission::Delete,
        }
    }
}

pub trait SecurityChecker: Send + Sync {
    fn check_authority(
        &self,
        permission: Permission,
        type_name: &str,
        session: &SessionContext,
    ) -> Result<()>;
}

/// Grants everything to everyone, including anonymous sessions.
pub struct AllowAll;

impl SecurityChecker for AllowAll {
    fn check_authority(&self, _: Permission, _: &str, _: &SessionContext) -> Result<()> {
        Ok(())
    }
}

/// A permission, either on every type or on one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Grant {
    pub permission: Permission,
    pub type_name: Option<String>,
}

impl Grant {
    pub fn any_type(permission: Permission) -> Self {
        Self {
            permission,
            type_name: None,
        }
    }

    pub fn on(permission: Permission, type_name: impl Into<String>) -> Self {
        Self {
            permission,
            type_name: Some(type_name.into()),
        }
    }

    fn covers(&self, permission: Permission, type_name: &str) -> bool {
        let type_matches = self.type_name.as_deref().is_none_or(|t| t == type_name);
        type_matches && (self.permission == permission || self.permission == Permission::Admin)
    }
}

/// Per-user grant table. Anonymous sessions fail authentication.
#[derive(Default)]
pub struct PermissionChecker {
    grants: RwLock<HashMap<String, Vec<Grant>>>,
}

impl PermissionChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admin(self, user: &str) -> Result<Self> {
        self.grant(user, Grant::any_type(Permission::Admin))?;
        Ok(self)
    }

    /// Adds a grant if the user doesn't already hold it.
    pub fn grant(&self, user: &str, grant: Grant) -> Result<bool> {
        let mut grants = self.grants.write()?;
        let held = grants.entry(user.to_string()).or_default();
        if held.contains(&grant) {
            Ok(false)
        } else {
            held.push(grant);
            Ok(true)
        }
    }

    pub fn revoke(&self, user: &str, grant: &Grant) -> Result<bool> {
        let mut grants = self.grants.write()?;
        let Some(held) = grants.get_mut(user) else {
            return Ok(false);
        };
        let len_before = held.len();
        held.retain(|g| g != grant);
        Ok(len_before != held.len())
    }

    pub fn is_admin(&self, user: &str) -> Result<bool> {
        Ok(self
            .grants
            .read()?
            .get(user)
            .is_some_and(|held| held.iter().any(|g| g.permission == Permission::Admin && g.type_name.is_none())))
    }
}

impl SecurityChecker for PermissionChecker {
    fn check_authority(
        &self,
        permission: Permission,
        type_name: &str,
        session: &SessionContext,
    ) -> Result<()> {
        let user = session.user().ok_or_else(|| {
            EngineError::Authentication(format!(
                "anonymous session cannot {} {}",
                permission, type_name
            ))
        })?;

        let grants = self.grants.read()?;
        let allowed = grants
            .get(user)
            .is_some_and(|held| held.iter().any(|g| g.covers(permission, type_name)));
        if allowed {
            Ok(())
        } else {
            Err(EngineError::Authorization(format!(
                "user '{}' lacks {} on {}",
                user, permission, type_name
            )))
        }
    }
}
