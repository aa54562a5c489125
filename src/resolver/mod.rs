// ============================================================================
// Reference Resolver
// ============================================================================
//
// Read path: hydrate reference fields from the bag's bulk lookup map or by
// primary key. Write path: save owned references before their owner and
// delete them after it.
//
// Both paths consult the per-call ancestor stack. An edge leading back to
// an ancestor is skipped and the call is flagged as having met a recursive
// node, after which self-referencing types stop resolving references.
//
// ============================================================================

use crate::context::CallContext;
use crate::core::{EngineError, EntityIdentity, Result, Value};
use crate::engine::EngineInner;
use crate::entity::{Dto, DtoState, Operation};
use crate::registry::TypeConfig;
use tracing::debug;

fn closes_cycle(target: &Dto, ctx: &mut CallContext<'_>) -> bool {
    match target.identity() {
        Some(identity) if ctx.bag.is_ancestor(&identity) => {
            debug!(entity = %identity, "skipping reference back to an ancestor");
            ctx.bag.mark_recursive_node();
            true
        }
        _ => false,
    }
}

impl EngineInner {
    pub(crate) fn resolve_references(
        &self,
        config: &TypeConfig,
        dto: &mut Dto,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        if config.is_self_referencing() && ctx.bag.recursive_node_encountered() {
            debug!(type_name = config.name(), "recursive node seen; references left unresolved");
            return Ok(());
        }

        for reference in config.reference_fields() {
            let key = dto.get(&reference.field).filter(|key| !key.is_null()).cloned();
            let Some(key) = key else {
                dto.take_reference(&reference.field);
                continue;
            };
            if dto
                .reference(&reference.field)
                .is_some_and(|attached| attached.primary_key() == Some(&key))
            {
                continue;
            }

            let identity = EntityIdentity::new(reference.target_type.clone(), key.clone());
            if ctx.bag.is_ancestor(&identity) {
                debug!(entity = %identity, field = %reference.field, "skipping reference back to an ancestor");
                ctx.bag.mark_recursive_node();
                continue;
            }
            if let Some(found) = ctx.bag.lookup(&reference.target_type, &key) {
                let found = found.clone();
                dto.set_reference(reference.field.clone(), found);
                continue;
            }

            match self.find_by_pk(&reference.target_type, &key, ctx) {
                Ok(target) => dto.set_reference(reference.field.clone(), target),
                Err(EngineError::NotFound { .. }) if reference.not_found_allowed => {
                    debug!(entity = %identity, "optional reference target missing");
                    dto.take_reference(&reference.field);
                }
                Err(e) => return Err(EngineError::reference(config.name(), &reference.field, e)),
            }
        }
        Ok(())
    }

    /// Writes new or modified owned references and points the owner's key
    /// fields at them. References marked DELETED are detached, their key
    /// field cleared, and returned for deletion after the owner is written.
    pub(crate) fn save_owned_references(
        &self,
        config: &TypeConfig,
        dto: &mut Dto,
        ctx: &mut CallContext<'_>,
    ) -> Result<Vec<(String, Dto)>> {
        let mut detached = Vec::new();
        for reference in config.reference_fields().iter().filter(|r| r.owned) {
            let Some(mut target) = dto.take_reference(&reference.field) else {
                continue;
            };
            if closes_cycle(&target, ctx) {
                dto.set_reference(reference.field.clone(), target);
                continue;
            }

            let target_config = self.config_of(&reference.target_type)?;
            let outcome = match target.state() {
                DtoState::New | DtoState::NewModified => {
                    self.save(&target_config, &mut target, Operation::Add, ctx)
                }
                DtoState::Updated => self.save(&target_config, &mut target, Operation::Update, ctx),
                DtoState::Deleted => {
                    dto.set(reference.field.clone(), Value::Null);
                    detached.push((reference.field.clone(), target));
                    continue;
                }
                DtoState::Unset => Ok(()),
            };
            outcome.map_err(|e| EngineError::reference(config.name(), &reference.field, e))?;

            if let Some(key) = target.primary_key() {
                if dto.get(&reference.field) != Some(key) {
                    dto.set(reference.field.clone(), key.clone());
                }
            }
            dto.set_reference(reference.field.clone(), target);
        }
        Ok(detached)
    }

    pub(crate) fn delete_detached_references(
        &self,
        config: &TypeConfig,
        detached: Vec<(String, Dto)>,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        for (field, mut target) in detached {
            if target.primary_key().is_none() {
                continue;
            }
            let target_config = self.config_of(target.type_name())?;
            self.delete(&target_config, &mut target, ctx)
                .map_err(|e| EngineError::reference(config.name(), &field, e))?;
        }
        Ok(())
    }

    /// Deletes every owned reference of an owner that was just deleted.
    pub(crate) fn delete_owned_references(
        &self,
        config: &TypeConfig,
        dto: &mut Dto,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        for reference in config.reference_fields().iter().filter(|r| r.owned) {
            let target_config = self.config_of(&reference.target_type)?;
            let key = dto.get(&reference.field).filter(|key| !key.is_null()).cloned();
            let target = match (dto.take_reference(&reference.field), key) {
                (Some(target), _) => Some(target),
                (None, Some(key)) => self.fetch_row(&target_config, &key, ctx)?,
                (None, None) => None,
            };
            let Some(mut target) = target else {
                continue;
            };
            if closes_cycle(&target, ctx) {
                continue;
            }

            target.mark_deleted();
            self.delete(&target_config, &mut target, ctx)
                .map_err(|e| EngineError::reference(config.name(), &reference.field, e))?;
            dto.set_reference(reference.field.clone(), target);
        }
        Ok(())
    }
}
