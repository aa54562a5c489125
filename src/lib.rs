// ============================================================================
// RustDTO Library
// ============================================================================
//
// Entity lifecycle engine: cascading add/update/delete over registered
// parent-child graphs, cache-aside reads with dependency invalidation,
// reference resolution with cycle detection and property-level audit.
//
// ============================================================================

pub mod audit;
pub mod cache;
mod cascade;
pub mod config;
pub mod context;
pub mod controller;
pub mod core;
pub mod dispatch;
pub mod engine;
pub mod entity;
pub mod hooks;
pub mod registry;
mod resolver;
pub mod security;
pub mod store;
pub mod transaction;
pub mod validation;

// Re-export main types for convenience
pub use audit::{AuditEntry, AuditSink, MemoryAuditSink, NullAuditSink};
pub use cache::{CacheLayer, CacheStats};
pub use config::EngineConfig;
pub use context::{BagValue, PropertyBag, SessionContext, FORCE_REFRESH, RETRIEVE_CHILDREN, SKIP_LIMIT};
pub use controller::EntityController;
pub use core::{EngineError, EntityIdentity, ErrorKind, Result, Row, Value};
pub use dispatch::{QueryDefinition, QueryKind, QueryToken};
pub use engine::{Engine, EngineBuilder};
pub use entity::{Dto, DtoState, Operation, PropertyChange};
pub use hooks::{EntityHooks, HookOutcome, WriteTarget};
pub use registry::{
    CacheMode, ChildRelationship, KeyGeneration, Permissions, ReferenceField, TypeConfig,
    TypeRegistry,
};
pub use security::{AllowAll, Grant, Permission, PermissionChecker, SecurityChecker};
pub use store::{InMemoryStore, Store, StoreOutcome, StoreRequest};
pub use validation::{BrokenRule, NoopValidator, Rule, RuleGroup, RuleSetValidator, Validator};
