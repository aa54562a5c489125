use crate::context::CallContext;
use crate::core::{EngineError, Result, Value};
use crate::dispatch::QueryToken;
use crate::engine::EngineInner;
use crate::entity::{Dto, DtoState, Operation};
use crate::hooks::HookOutcome;
use crate::registry::TypeConfig;
use std::sync::Arc;
use tracing::debug;

impl EngineInner {
    /// Tears an entity down leaf-first: children in delete order, then the
    /// row, then its owned references.
    pub(crate) fn delete(
        &self,
        config: &Arc<TypeConfig>,
        dto: &mut Dto,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        ctx.enter(config.name())?;
        let result = self.delete_inner(config, dto, ctx);
        ctx.leave();
        result
    }

    fn delete_inner(
        &self,
        config: &Arc<TypeConfig>,
        dto: &mut Dto,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        Operation::Delete.check_state(config.name(), dto.state())?;
        self.authorize_write(config, Operation::Delete, ctx.session)?;
        self.check_children(config, dto, Operation::Delete)?;

        if let Some(hooks) = config.entity_hooks() {
            if hooks.pre_delete(dto, ctx.session, ctx.bag)? == HookOutcome::Skip {
                debug!(type_name = config.name(), "delete skipped by hook");
                dto.set_state(DtoState::Unset);
                return Ok(());
            }
        }

        // Never saved, nothing stored.
        let Some(key) = dto.primary_key().cloned() else {
            debug!(type_name = config.name(), "delete without primary key is a no-op");
            return Ok(());
        };

        let mark = ctx.bag.push_ancestor(dto.identity());
        let result = self.delete_graph(config, dto, &key, ctx);
        ctx.bag.truncate_ancestors(mark);
        result?;

        self.record_audit(config, dto, Operation::Delete, ctx);
        self.queue_cache_write(config, dto, Operation::Delete, ctx)?;
        if let Some(hooks) = config.entity_hooks() {
            hooks.post_delete(dto, ctx.session, ctx.bag)?;
        }
        Ok(())
    }

    fn delete_graph(
        &self,
        config: &TypeConfig,
        dto: &mut Dto,
        key: &Value,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        self.delete_children(config, dto, key, ctx)?;

        let outcome = self.execute(config, &QueryToken::Delete, dto, ctx)?;
        self.check_affected(config, Operation::Delete, outcome.affected())?;

        self.delete_owned_references(config, dto, ctx)
    }

    /// Collections the caller did not load are read from the store first so
    /// no child row is orphaned.
    fn delete_children(
        &self,
        config: &TypeConfig,
        dto: &mut Dto,
        key: &Value,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        for relationship in self.registry.delete_order_of(config.name())? {
            if !relationship.cascades() {
                continue;
            }
            let child_config = self.config_of(&relationship.child_type)?;
            let wrap = |e| EngineError::cascade(config.name(), &relationship.child_type, e);

            let mut children = match dto.take_children(&relationship.token) {
                Some(children) => children,
                None => {
                    let criteria = Dto::criteria(relationship.child_type.clone())
                        .with_foreign_key(config.name(), key.clone());
                    self.query_rows(&child_config, &relationship.token, &criteria, ctx)
                        .map_err(wrap)?
                }
            };
            if children.is_empty() {
                continue;
            }

            debug!(
                parent = config.name(),
                child = %relationship.child_type,
                count = children.len(),
                "deleting children"
            );
            let result = self.delete_collection(&child_config, &mut children, ctx);
            dto.put_children(relationship.token.clone(), children);
            result.map_err(wrap)?;
        }
        Ok(())
    }

    fn delete_collection(
        &self,
        child_config: &Arc<TypeConfig>,
        children: &mut [Dto],
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        for child in children.iter_mut() {
            if let Some(identity) = child.identity() {
                if ctx.bag.is_ancestor(&identity) {
                    debug!(entity = %identity, "skipping child that is an ancestor");
                    ctx.bag.mark_recursive_node();
                    continue;
                }
            }
            child.mark_deleted();
            self.delete(child_config, child, ctx)?;
        }
        Ok(())
    }
}
