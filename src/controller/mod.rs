// ============================================================================
// Entity Lifecycle Controller
// ============================================================================
//
// Public entry points for one entity type. Each mutating call is one unit:
// a store transaction wraps the whole cascade, audit entries are recorded
// before the commit and cache writes are applied after it. On failure the
// transaction rolls back, the cache is untouched and the caller's entity is
// restored to what it passed in.
//
// ============================================================================

mod read;

use crate::context::{CallContext, PropertyBag, SKIP_LIMIT, SessionContext};
use crate::core::{EngineError, Result, Value};
use crate::dispatch::QueryToken;
use crate::engine::EngineInner;
use crate::entity::{Dto, Operation};
use crate::registry::{CacheMode, TypeConfig};
use crate::security::Permission;
use crate::transaction::TransactionScope;
use std::sync::Arc;
use tracing::{debug, error, info_span, warn};

pub struct EntityController {
    engine: Arc<EngineInner>,
    type_name: String,
}

impl EntityController {
    pub(crate) fn new(engine: Arc<EngineInner>, type_name: &str) -> Self {
        Self {
            engine,
            type_name: type_name.to_string(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// A fresh entity of this type in state NEW.
    pub fn new_instance(&self) -> Dto {
        Dto::new(self.type_name.clone())
    }

    pub fn add(&self, dto: &mut Dto, session: &SessionContext, bag: &mut PropertyBag) -> Result<()> {
        self.mutate(Operation::Add, dto, session, bag)
    }

    pub fn update(&self, dto: &mut Dto, session: &SessionContext, bag: &mut PropertyBag) -> Result<()> {
        self.mutate(Operation::Update, dto, session, bag)
    }

    /// Deletes an entity the caller has marked DELETED. An entity that was
    /// never saved (no primary key) is a no-op.
    pub fn delete(&self, dto: &mut Dto, session: &SessionContext, bag: &mut PropertyBag) -> Result<()> {
        self.mutate(Operation::Delete, dto, session, bag)
    }

    /// Cache first for cached types; a miss falls through to the store.
    pub fn find_by_primary_key(
        &self,
        key: impl Into<Value>,
        session: &SessionContext,
        bag: &mut PropertyBag,
    ) -> Result<Dto> {
        let key = key.into();
        self.read("find_by_primary_key", session, bag, |engine, config, ctx| {
            engine.find_by_pk(config.name(), &key, ctx)
        })
    }

    /// First entity returned by `token`. No row is a not-found error.
    pub fn find_by_query(
        &self,
        token: impl Into<QueryToken>,
        criteria: &Dto,
        session: &SessionContext,
        bag: &mut PropertyBag,
    ) -> Result<Dto> {
        let token = token.into();
        self.read("find_by_query", session, bag, |engine, config, ctx| {
            engine.find_one(config, &token, criteria, ctx)
        })
    }

    /// Every entity returned by `token`, capped at `max_query_rows` unless
    /// the bag carries `SKIP_LIMIT`.
    pub fn find_by_query_list(
        &self,
        token: impl Into<QueryToken>,
        criteria: &Dto,
        session: &SessionContext,
        bag: &mut PropertyBag,
    ) -> Result<Vec<Dto>> {
        let token = token.into();
        let mut entities = self.read("find_by_query_list", session, bag, |engine, config, ctx| {
            if token == QueryToken::FindAll && config.cache_mode() == Some(CacheMode::LookupMap) {
                engine.all_cached(config, ctx)
            } else {
                engine.find_list(config, &token, criteria, ctx)
            }
        })?;

        if let Some(limit) = self.engine.config.max_query_rows {
            if entities.len() > limit && !bag.flag(SKIP_LIMIT) {
                debug!(type_name = %self.type_name, limit, found = entities.len(), "truncating result list");
                entities.truncate(limit);
            }
        }
        Ok(entities)
    }

    fn mutate(
        &self,
        operation: Operation,
        dto: &mut Dto,
        session: &SessionContext,
        bag: &mut PropertyBag,
    ) -> Result<()> {
        let span = info_span!("mutate", type_name = %self.type_name, operation = %operation);
        let _enter = span.enter();

        if dto.type_name() != self.type_name {
            let message = format!(
                "{} controller cannot {} an entity of type {}",
                self.type_name,
                operation,
                dto.type_name()
            );
            error!("{message}");
            return Err(EngineError::Configuration(message));
        }

        let snapshot = dto.clone();
        let result = self.run_mutation(operation, dto, session, bag);
        bag.clear_internal();
        if let Err(e) = &result {
            warn!(error = %e, "call rolled back");
            *dto = snapshot;
        }
        result
    }

    fn run_mutation(
        &self,
        operation: Operation,
        dto: &mut Dto,
        session: &SessionContext,
        bag: &mut PropertyBag,
    ) -> Result<()> {
        let engine: &EngineInner = &self.engine;
        let config = engine.config_of(&self.type_name)?;
        let scope = TransactionScope::begin(engine.store.as_ref())?;

        let mut ctx = CallContext::new(session, bag, Some(scope.id()), engine.config.max_cascade_depth);
        match operation {
            Operation::Delete => engine.delete(&config, dto, &mut ctx)?,
            Operation::Add | Operation::Update => engine.save(&config, dto, operation, &mut ctx)?,
        }
        let audit_entries = std::mem::take(&mut ctx.audit_entries);
        let cache_writes = std::mem::take(&mut ctx.cache_writes);

        if !audit_entries.is_empty() {
            engine.audit.record(&audit_entries)?;
        }
        let transaction = scope.id();
        scope.commit()?;
        debug!(%transaction, audit_entries = audit_entries.len(), "committed");

        if let Err(e) = engine.cache.apply(cache_writes) {
            error!(error = %e, "cache update after commit failed; purging all cached types");
            engine.cache.purge_all()?;
        }
        Ok(())
    }

    fn read<T>(
        &self,
        operation: &'static str,
        session: &SessionContext,
        bag: &mut PropertyBag,
        find: impl FnOnce(&EngineInner, &Arc<TypeConfig>, &mut CallContext<'_>) -> Result<T>,
    ) -> Result<T> {
        let span = info_span!("find", type_name = %self.type_name, operation);
        let _enter = span.enter();

        let engine: &EngineInner = &self.engine;
        let config = engine.config_of(&self.type_name)?;
        engine
            .security
            .check_authority(Permission::Read, config.name(), session)?;

        let mut ctx = CallContext::new(session, bag, None, engine.config.max_cascade_depth);
        let result = find(engine, &config, &mut ctx);
        let cache_writes = std::mem::take(&mut ctx.cache_writes);
        if result.is_ok() {
            if let Err(e) = engine.cache.apply(cache_writes) {
                warn!(error = %e, "cache fill after read failed");
            }
        }
        bag.clear_internal();
        result
    }
}
