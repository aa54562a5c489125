use crate::context::{CallContext, RETRIEVE_CHILDREN};
use crate::core::{EngineError, Result, Value};
use crate::dispatch::QueryToken;
use crate::engine::EngineInner;
use crate::entity::{Dto, DtoState, Operation};
use crate::registry::{ChildRelationship, TypeConfig};
use tracing::debug;

impl EngineInner {
    /// Writes every supplied child collection in add order.
    ///
    /// New children are added, modified ones updated and DELETED ones go
    /// through the delete flow and leave the collection. Each child's
    /// foreign key is pointed at the parent first.
    pub(crate) fn cascade_children(
        &self,
        config: &TypeConfig,
        dto: &mut Dto,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        let Some(parent_key) = dto.primary_key().cloned() else {
            return Ok(());
        };

        for relationship in self.registry.add_order_of(config.name())? {
            if !relationship.cascades() {
                continue;
            }
            let Some(mut children) = dto.take_children(&relationship.token) else {
                continue;
            };
            let result = self.cascade_collection(config, &relationship, &parent_key, &mut children, ctx);
            dto.put_children(relationship.token.clone(), children);
            result.map_err(|e| EngineError::cascade(config.name(), &relationship.child_type, e))?;
        }
        Ok(())
    }

    fn cascade_collection(
        &self,
        parent: &TypeConfig,
        relationship: &ChildRelationship,
        parent_key: &Value,
        children: &mut Vec<Dto>,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        let child_config = self.config_of(&relationship.child_type)?;
        debug!(
            parent = parent.name(),
            child = %relationship.child_type,
            token = %relationship.token,
            count = children.len(),
            "cascading children"
        );

        for child in children.iter_mut() {
            if let Some(identity) = child.identity() {
                if ctx.bag.is_ancestor(&identity) {
                    debug!(entity = %identity, "skipping child that is an ancestor");
                    ctx.bag.mark_recursive_node();
                    continue;
                }
            }
            match child.state() {
                DtoState::New | DtoState::NewModified => {
                    child.set_foreign_key(parent.name(), parent_key.clone());
                    self.save(&child_config, child, Operation::Add, ctx)?;
                }
                DtoState::Updated => {
                    child.set_foreign_key(parent.name(), parent_key.clone());
                    self.save(&child_config, child, Operation::Update, ctx)?;
                }
                DtoState::Deleted => self.delete(&child_config, child, ctx)?,
                DtoState::Unset => {}
            }
        }
        children.retain(|child| !child.state().is_deleted());
        Ok(())
    }

    /// Loads auto-retrieved collections plus any the caller requested under
    /// `RETRIEVE_CHILDREN`.
    pub(crate) fn load_children(
        &self,
        config: &TypeConfig,
        dto: &mut Dto,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        let Some(key) = dto.primary_key().cloned() else {
            return Ok(());
        };
        let requested: Vec<QueryToken> = ctx.bag.tokens(RETRIEVE_CHILDREN).to_vec();

        for relationship in config.relationships() {
            if !relationship.auto_retrieve && !requested.contains(&relationship.token) {
                continue;
            }
            let child_config = self.config_of(&relationship.child_type)?;
            if child_config.is_self_referencing() && ctx.bag.recursive_node_encountered() {
                debug!(
                    parent = config.name(),
                    token = %relationship.token,
                    "recursive node seen; collection not loaded"
                );
                continue;
            }

            let criteria = Dto::criteria(relationship.child_type.clone())
                .with_foreign_key(config.name(), key.clone());
            let children = self
                .find_list(&child_config, &relationship.token, &criteria, ctx)
                .map_err(|e| EngineError::cascade(config.name(), &relationship.child_type, e))?;
            if children.is_empty() && !relationship.child_not_found_allowed {
                return Err(EngineError::not_found(
                    relationship.child_type.clone(),
                    format!(
                        "no children of {} {} under '{}'",
                        config.name(),
                        key,
                        relationship.token
                    ),
                ));
            }
            dto.put_children(relationship.token.clone(), children);
        }
        Ok(())
    }
}
