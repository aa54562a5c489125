// ============================================================================
// Engine
// ============================================================================
//
// Owns the shared collaborators (registry, dispatch table, cache) and the
// injected services (store, security, validation, audit). Controllers are
// cheap handles onto it.
//
// ============================================================================

use crate::audit::{AuditSink, NullAuditSink};
use crate::cache::{CacheLayer, CacheStats};
use crate::config::EngineConfig;
use crate::context::{CallContext, SessionContext};
use crate::controller::EntityController;
use crate::core::{EngineError, Params, Result, Row};
use crate::dispatch::{DispatchTable, QueryDefinition, QueryToken};
use crate::entity::{Dto, Operation};
use crate::registry::{ChildRelationship, TypeConfig, TypeRegistry};
use crate::security::{AllowAll, Permission, SecurityChecker};
use crate::store::{Store, StoreOutcome, StoreRequest};
use crate::validation::{NoopValidator, Validator};
use std::sync::Arc;
use tracing::{error, info};

pub(crate) struct EngineInner {
    pub(crate) registry: TypeRegistry,
    pub(crate) dispatch: DispatchTable,
    pub(crate) cache: CacheLayer,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) security: Arc<dyn SecurityChecker>,
    pub(crate) validator: Arc<dyn Validator>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) config: EngineConfig,
}

impl EngineInner {
    pub(crate) fn config_of(&self, type_name: &str) -> Result<Arc<TypeConfig>> {
        self.registry.config_of(type_name)
    }

    pub(crate) fn query(&self, config: &TypeConfig, token: &QueryToken) -> Result<QueryDefinition> {
        self.dispatch
            .resolve(config, self.registry.generation(), token)
    }

    /// Resolves, binds and runs `token` with `criteria` as the parameter
    /// source.
    pub(crate) fn execute(
        &self,
        config: &TypeConfig,
        token: &QueryToken,
        criteria: &Dto,
        ctx: &CallContext<'_>,
    ) -> Result<StoreOutcome> {
        let definition = self.query(config, token)?;
        let params = definition.bind(criteria, config);
        self.send(config, token, &definition, params, None, ctx)
    }

    /// Runs an already bound definition.
    pub(crate) fn send(
        &self,
        config: &TypeConfig,
        token: &QueryToken,
        definition: &QueryDefinition,
        params: Params,
        row: Option<Row>,
        ctx: &CallContext<'_>,
    ) -> Result<StoreOutcome> {
        let request = StoreRequest {
            type_name: config.name(),
            table: config.table_name(),
            token,
            kind: definition.kind(),
            statement: definition.statement(),
            params,
            row,
            transaction: ctx.transaction,
        };
        self.store.execute(&request, ctx.session)
    }

    /// Type-level permission flags first, then the security checker.
    pub(crate) fn authorize_write(
        &self,
        config: &TypeConfig,
        operation: Operation,
        session: &SessionContext,
    ) -> Result<()> {
        if !config.type_permissions().allows(operation) {
            return Err(EngineError::Authorization(format!(
                "{:?} is not permitted on {}",
                operation,
                config.name()
            )));
        }
        self.security
            .check_authority(Permission::from(operation), config.name(), session)
    }

    pub(crate) fn audit_user<'s>(&'s self, session: &'s SessionContext) -> &'s str {
        session.user().unwrap_or(self.config.system_user.as_str())
    }
}

/// Entry point: one per process, shared by cloning.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder(store: Arc<dyn Store>) -> EngineBuilder {
        EngineBuilder::new(store)
    }

    /// Lifecycle controller for one entity type.
    pub fn controller(&self, type_name: &str) -> EntityController {
        EntityController::new(self.inner.clone(), type_name)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.inner.registry
    }

    pub fn register_type(&self, config: TypeConfig) -> Result<()> {
        self.inner.registry.register_type(config)
    }

    pub fn register(&self, parent_type: &str, child_type: &str, token: impl Into<QueryToken>) -> Result<()> {
        self.inner.registry.register(parent_type, child_type, token)
    }

    pub fn register_relationship(&self, parent_type: &str, relationship: ChildRelationship) -> Result<()> {
        self.inner
            .registry
            .register_relationship(parent_type, relationship)
    }

    pub fn register_query(
        &self,
        type_name: &str,
        token: impl Into<QueryToken>,
        definition: QueryDefinition,
    ) -> Result<()> {
        self.inner
            .dispatch
            .register(type_name, token.into(), definition)
    }

    /// Tokens dispatchable for a type, sorted.
    pub fn query_tokens(&self, type_name: &str) -> Result<Vec<QueryToken>> {
        let config = self.inner.config_of(type_name)?;
        self.inner
            .dispatch
            .tokens(&config, self.inner.registry.generation())
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.inner.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

pub struct EngineBuilder {
    store: Arc<dyn Store>,
    security: Arc<dyn SecurityChecker>,
    validator: Arc<dyn Validator>,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
    types: Vec<TypeConfig>,
    relationships: Vec<(String, ChildRelationship)>,
    queries: Vec<(String, QueryToken, QueryDefinition)>,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            security: Arc::new(AllowAll),
            validator: Arc::new(NoopValidator),
            audit: Arc::new(NullAuditSink),
            config: EngineConfig::default(),
            types: Vec::new(),
            relationships: Vec::new(),
            queries: Vec::new(),
        }
    }

    pub fn security(mut self, security: Arc<dyn SecurityChecker>) -> Self {
        self.security = security;
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register_type(mut self, config: TypeConfig) -> Self {
        self.types.push(config);
        self
    }

    pub fn register(self, parent_type: &str, child_type: &str, token: impl Into<QueryToken>) -> Self {
        self.register_relationship(parent_type, ChildRelationship::new(child_type, token))
    }

    pub fn register_relationship(mut self, parent_type: &str, relationship: ChildRelationship) -> Self {
        self.relationships
            .push((parent_type.to_string(), relationship));
        self
    }

    pub fn query(mut self, type_name: &str, token: impl Into<QueryToken>, definition: QueryDefinition) -> Self {
        self.queries
            .push((type_name.to_string(), token.into(), definition));
        self
    }

    pub fn build(self) -> Result<Engine> {
        if let Err(e) = self.config.validate() {
            error!("invalid engine configuration: {e}");
            return Err(e);
        }

        let inner = EngineInner {
            registry: TypeRegistry::new(),
            dispatch: DispatchTable::new(),
            cache: CacheLayer::new(),
            store: self.store,
            security: self.security,
            validator: self.validator,
            audit: self.audit,
            config: self.config,
        };
        for config in self.types {
            inner.registry.register_type(config)?;
        }
        for (parent, relationship) in self.relationships {
            inner.registry.register_relationship(&parent, relationship)?;
        }
        for (type_name, token, definition) in self.queries {
            inner.dispatch.register(&type_name, token, definition)?;
        }

        info!(types = inner.registry.types()?.len(), "engine ready");
        Ok(Engine {
            inner: Arc::new(inner),
        })
    }
}
