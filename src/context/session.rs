/// How the caller tracks DTO state between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientKind {
    /// The caller keeps loaded DTOs and mutates them through tracked setters
    #[default]
    Stateful,
    /// The caller sends whole DTOs without change tracking (web forms, RPC)
    Stateless,
}

/// Caller identity for one request.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    user: Option<String>,
    client: ClientKind,
}

impl SessionContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            client: ClientKind::Stateful,
        }
    }

    pub fn stateless(mut self) -> Self {
        self.client = ClientKind::Stateless;
        self
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn client(&self) -> ClientKind {
        self.client
    }

    pub fn is_stateless(&self) -> bool {
        self.client == ClientKind::Stateless
    }
}
