use crate::cache::CacheWrite;
use crate::context::CallContext;
use crate::core::{EngineError, Result, Value};
use crate::dispatch::QueryToken;
use crate::engine::EngineInner;
use crate::entity::Dto;
use crate::registry::{CacheMode, TypeConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

impl EngineInner {
    /// Primary-key read through the cache when the type is cached.
    pub(crate) fn find_by_pk(
        &self,
        type_name: &str,
        key: &Value,
        ctx: &mut CallContext<'_>,
    ) -> Result<Dto> {
        let config = self.config_of(type_name)?;
        match config.cache_mode() {
            Some(CacheMode::PerEntity) => {
                if let Some(hit) = self.cache.get(type_name, key)? {
                    return Ok(hit);
                }
                let epoch = self.cache.begin_fill(&config)?;
                let dto = self.load_by_pk(&config, key, ctx)?;
                if ctx.bag.recursive_node_encountered() {
                    debug!(type_name, key = %key, "cycle-truncated entity not cached");
                } else {
                    ctx.cache_writes.push(CacheWrite::Loaded {
                        config: config.clone(),
                        dto: dto.clone(),
                        epoch,
                    });
                }
                Ok(dto)
            }
            Some(CacheMode::LookupMap) => {
                let found = if self.cache.is_initialized(type_name)? {
                    self.cache.get(type_name, key)?
                } else {
                    self.load_lookup_map(&config, ctx)?
                        .into_iter()
                        .find(|dto| dto.primary_key() == Some(key))
                };
                found.ok_or_else(|| EngineError::not_found(type_name, format!("primary key {key}")))
            }
            None => self.load_by_pk(&config, key, ctx),
        }
    }

    fn load_by_pk(&self, config: &TypeConfig, key: &Value, ctx: &mut CallContext<'_>) -> Result<Dto> {
        let criteria = Dto::criteria(config.name()).with_key(key.clone());
        self.find_one(config, &QueryToken::FindByPrimaryKey, &criteria, ctx)
            .map_err(|e| match e {
                EngineError::NotFound { type_name, .. } => {
                    EngineError::not_found(type_name, format!("primary key {key}"))
                }
                other => other,
            })
    }

    pub(crate) fn find_one(
        &self,
        config: &TypeConfig,
        token: &QueryToken,
        criteria: &Dto,
        ctx: &mut CallContext<'_>,
    ) -> Result<Dto> {
        let mut dto = self
            .query_rows(config, token, criteria, ctx)?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::not_found(config.name(), format!("no row for query '{token}'")))?;
        self.hydrate(config, &mut dto, ctx)?;
        Ok(dto)
    }

    pub(crate) fn find_list(
        &self,
        config: &TypeConfig,
        token: &QueryToken,
        criteria: &Dto,
        ctx: &mut CallContext<'_>,
    ) -> Result<Vec<Dto>> {
        let mut entities = self.query_rows(config, token, criteria, ctx)?;
        for dto in &mut entities {
            self.hydrate(config, dto, ctx)?;
        }
        Ok(entities)
    }

    /// Mapped rows without references or children.
    pub(crate) fn query_rows(
        &self,
        config: &TypeConfig,
        token: &QueryToken,
        criteria: &Dto,
        ctx: &CallContext<'_>,
    ) -> Result<Vec<Dto>> {
        let rows = self.execute(config, token, criteria, ctx)?.into_rows();
        Ok(rows.into_iter().map(|row| config.from_row(row)).collect())
    }

    /// The stored row for `key`, bypassing the cache.
    pub(crate) fn fetch_row(
        &self,
        config: &TypeConfig,
        key: &Value,
        ctx: &CallContext<'_>,
    ) -> Result<Option<Dto>> {
        let criteria = Dto::criteria(config.name()).with_key(key.clone());
        Ok(self
            .query_rows(config, &QueryToken::FindByPrimaryKey, &criteria, ctx)?
            .into_iter()
            .next())
    }

    /// Attaches references and child collections to a freshly read entity.
    ///
    /// Cached types only get children when they are auto-cached. An entity
    /// that is already an ancestor in this traversal is left bare and the
    /// call is flagged as having met a recursive node.
    pub(crate) fn hydrate(
        &self,
        config: &TypeConfig,
        dto: &mut Dto,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        let Some(identity) = dto.identity() else {
            return Ok(());
        };
        if ctx.bag.is_ancestor(&identity) {
            debug!(entity = %identity, "recursive node reached during hydration");
            ctx.bag.mark_recursive_node();
            return Ok(());
        }

        ctx.enter(config.name())?;
        let mark = ctx.bag.push_ancestor(Some(identity));
        let result = self.hydrate_graph(config, dto, ctx);
        ctx.bag.truncate_ancestors(mark);
        ctx.leave();
        result
    }

    fn hydrate_graph(&self, config: &TypeConfig, dto: &mut Dto, ctx: &mut CallContext<'_>) -> Result<()> {
        self.resolve_references(config, dto, ctx)?;
        if !config.is_cached() || config.auto_cache_children {
            self.load_children(config, dto, ctx)?;
        }
        Ok(())
    }

    /// Every entity of a lookup-map type.
    ///
    /// Outside a mutating call the result populates the cache under the
    /// per-type initialization guard; a failed load leaves the type
    /// initialized-empty. Inside one, rows may be uncommitted and are
    /// returned without touching the cache. A load that met a recursive
    /// node is returned but not cached.
    pub(crate) fn load_lookup_map(
        &self,
        config: &Arc<TypeConfig>,
        ctx: &mut CallContext<'_>,
    ) -> Result<Vec<Dto>> {
        if ctx.is_mutating() {
            return self.load_all(config, ctx);
        }

        let _guard = self.cache.begin_initialization(config.name())?;
        if self.cache.is_initialized(config.name())? {
            return self.cache.values(config.name());
        }
        let epoch = self.cache.begin_fill(config)?;
        match self.load_all(config, ctx) {
            Ok(entities) if ctx.bag.recursive_node_encountered() => {
                debug!(type_name = config.name(), "cycle-truncated load not cached");
                Ok(entities)
            }
            Ok(entities) => {
                self.cache.populate(config, entities.clone(), epoch)?;
                Ok(entities)
            }
            Err(e) => {
                error!(type_name = config.name(), error = %e, "cache load failed");
                self.cache.mark_initialized_empty(config)?;
                Err(e)
            }
        }
    }

    fn load_all(&self, config: &TypeConfig, ctx: &mut CallContext<'_>) -> Result<Vec<Dto>> {
        let criteria = Dto::criteria(config.name());
        let mut entities = self.query_rows(config, &QueryToken::FindAll, &criteria, ctx)?;

        // Members of the load resolve references to each other from this
        // map instead of re-entering the cache mid-load.
        let lookup: HashMap<Value, Dto> = entities
            .iter()
            .filter_map(|dto| dto.primary_key().cloned().map(|key| (key, dto.clone())))
            .collect();
        ctx.bag.install_lookup(config.name(), lookup);

        let mut result = Ok(());
        for dto in &mut entities {
            result = self.hydrate(config, dto, ctx);
            if result.is_err() {
                break;
            }
        }
        ctx.bag.remove_lookup(config.name());
        result?;

        debug!(type_name = config.name(), entities = entities.len(), "loaded all");
        Ok(entities)
    }

    /// All entities of a lookup-map type, served from the cache when loaded.
    pub(crate) fn all_cached(&self, config: &Arc<TypeConfig>, ctx: &mut CallContext<'_>) -> Result<Vec<Dto>> {
        if self.cache.is_initialized(config.name())? {
            self.cache.values(config.name())
        } else {
            self.load_lookup_map(config, ctx)
        }
    }
}
