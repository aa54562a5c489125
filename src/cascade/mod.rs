// ============================================================================
// Cascade Orchestrator
// ============================================================================
//
// Drives one add or update of an entity through its whole graph:
//
//   check state -> authorize -> refresh-merge (updates) -> check children
//   -> pre hook -> keys -> validate -> owned references -> write row
//   -> refresh -> audit -> resolve references -> post hook
//   -> cascade children -> reload children -> cache -> commit marker
//
// Every step runs inside the caller's transaction; the first error aborts
// the walk and the controller rolls the whole call back.
//
// ============================================================================

mod children;
mod delete;

use crate::audit::recorder;
use crate::cache::CacheWrite;
use crate::context::{CallContext, FORCE_REFRESH};
use crate::core::{EngineError, Result, Value};
use crate::engine::EngineInner;
use crate::entity::{Dto, DtoState, Operation};
use crate::hooks::{HookOutcome, WriteTarget};
use crate::registry::{KeyGeneration, TypeConfig};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

impl EngineInner {
    pub(crate) fn save(
        &self,
        config: &Arc<TypeConfig>,
        dto: &mut Dto,
        operation: Operation,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        ctx.enter(config.name())?;
        let result = self.save_inner(config, dto, operation, ctx);
        ctx.leave();
        result
    }

    fn save_inner(
        &self,
        config: &Arc<TypeConfig>,
        dto: &mut Dto,
        operation: Operation,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        operation.check_state(config.name(), dto.state())?;
        self.authorize_write(config, operation, ctx.session)?;

        if operation == Operation::Update && self.refresh_requested(ctx) {
            self.merge_onto_current(config, dto, ctx)?;
        }
        self.check_children(config, dto, operation)?;

        let mut target = WriteTarget::new(operation);
        if let Some(hooks) = config.entity_hooks() {
            if hooks.pre_add_or_update(dto, &mut target, ctx.session, ctx.bag)? == HookOutcome::Skip {
                debug!(type_name = config.name(), "write skipped by hook");
                dto.set_state(DtoState::Unset);
                return Ok(());
            }
        }
        let operation = target.operation;
        if operation == Operation::Delete {
            debug!(type_name = config.name(), "hook redirected write to delete");
            dto.mark_deleted();
            return self.delete(config, dto, ctx);
        }

        if operation == Operation::Add {
            if config.is_audited() && dto.audit_id().is_none() {
                dto.set_audit_id(Uuid::new_v4().to_string());
            }
            self.assign_primary_key(config, dto)?;
            if let Some(version) = config.version() {
                if dto.get(version).is_none_or(Value::is_null) {
                    dto.set_untracked(version, Value::Integer(1));
                }
            }
        }

        let broken = self
            .validator
            .validate(dto, operation, config.rule_groups_for(operation));
        if !broken.is_empty() {
            debug!(type_name = config.name(), broken = broken.len(), "validation failed");
            return Err(EngineError::Validation(broken));
        }

        let detached = self.save_owned_references(config, dto, ctx)?;

        let definition = self.query(config, &target.token)?;
        let params = definition.bind(dto, config);
        if operation == Operation::Update {
            if let Some(version) = config.version() {
                let next = next_version(config.name(), dto.get(version))?;
                dto.set_untracked(version, next);
            }
        }
        let row = config.to_row(dto);
        let outcome = self.send(config, &target.token, &definition, params, Some(row), ctx)?;
        self.check_affected(config, operation, outcome.affected())?;

        if config.refreshes_after_write() {
            self.refresh_after_write(config, dto, ctx)?;
        }
        self.delete_detached_references(config, detached, ctx)?;
        self.record_audit(config, dto, operation, ctx);

        let mark = ctx.bag.push_ancestor(dto.identity());
        let result = self.after_write(config, dto, operation, ctx);
        ctx.bag.truncate_ancestors(mark);
        result?;

        self.queue_cache_write(config, dto, operation, ctx)?;
        dto.mark_committed();
        Ok(())
    }

    fn refresh_requested(&self, ctx: &CallContext<'_>) -> bool {
        ctx.bag.flag(FORCE_REFRESH)
            || (ctx.session.is_stateless() && self.config.refresh_stateless_updates)
    }

    /// Rebases an update onto the stored row.
    ///
    /// Stateful clients contribute their recorded property changes; a
    /// stateless client's properties are diffed against the row. Fields the
    /// caller never touched keep their stored value.
    fn merge_onto_current(
        &self,
        config: &TypeConfig,
        dto: &mut Dto,
        ctx: &CallContext<'_>,
    ) -> Result<()> {
        let Some(key) = dto.primary_key().cloned() else {
            return Err(EngineError::StateConsistency(format!(
                "cannot update {} without a primary key",
                config.name()
            )));
        };
        let Some(mut current) = self.fetch_row(config, &key, ctx)? else {
            return Err(EngineError::Conflict(format!(
                "{} {} no longer exists",
                config.name(),
                key
            )));
        };

        let changes: Vec<(String, Value)> = if ctx.session.is_stateless() {
            dto.properties()
                .iter()
                .filter(|(field, value)| current.get(field) != Some(*value))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()
        } else {
            dto.property_changes()
                .iter()
                .map(|(field, change)| (field.clone(), change.new.clone()))
                .collect()
        };
        debug!(type_name = config.name(), key = %key, changes = changes.len(), "merging update onto stored row");
        for (field, value) in changes {
            current.set(field, value);
        }

        current.replace_child_collections(dto.take_child_collections());
        current.replace_references(dto.take_references());
        for (parent, key) in dto.foreign_keys() {
            current.set_foreign_key(parent.clone(), key.clone());
        }
        if current.audit_id().is_none() {
            if let Some(audit_id) = dto.audit_id() {
                current.set_audit_id(audit_id.to_string());
            }
        }
        current.set_state(DtoState::Updated);
        *dto = current;
        Ok(())
    }

    /// Rejects unknown collection tokens, and on ADD any child that is not
    /// itself new.
    pub(crate) fn check_children(
        &self,
        config: &TypeConfig,
        dto: &Dto,
        operation: Operation,
    ) -> Result<()> {
        if !config.relationships().is_empty() {
            self.registry.validate_relationships(config.name())?;
        }

        for (token, children) in dto.child_collections() {
            if !config.relationships().iter().any(|rel| &rel.token == token) {
                let message = format!(
                    "{} has no child relationship registered under token '{}'",
                    config.name(),
                    token
                );
                error!("{message}");
                return Err(EngineError::Configuration(message));
            }
            if operation != Operation::Add {
                continue;
            }
            if let Some(child) = children.iter().find(|child| !child.state().is_new()) {
                return Err(EngineError::StateConsistency(format!(
                    "cannot add {} with child {} in state {}",
                    config.name(),
                    child.type_name(),
                    child.state()
                )));
            }
        }
        Ok(())
    }

    fn assign_primary_key(&self, config: &TypeConfig, dto: &mut Dto) -> Result<()> {
        if dto.primary_key().is_some_and(|key| !key.is_null()) {
            return Ok(());
        }
        let key = match config.key_generator() {
            KeyGeneration::External => {
                return Err(EngineError::StateConsistency(format!(
                    "{} requires a caller-supplied primary key",
                    config.name()
                )));
            }
            KeyGeneration::Uuid => Value::from(Uuid::new_v4().to_string()),
            KeyGeneration::Sequence(sequence) => self.store.allocate_key(sequence)?,
            KeyGeneration::Local(generate) => generate(),
        };
        debug!(type_name = config.name(), key = %key, "assigned primary key");
        dto.set_primary_key(key);
        Ok(())
    }

    /// Zero affected rows means the row changed or vanished since it was
    /// read, unless the type tolerates it for this operation.
    pub(crate) fn check_affected(
        &self,
        config: &TypeConfig,
        operation: Operation,
        affected: u64,
    ) -> Result<()> {
        if affected > 0 {
            return Ok(());
        }
        if config.zero_rows_policy().tolerates(operation) {
            debug!(type_name = config.name(), operation = %operation, "zero rows affected, tolerated");
            return Ok(());
        }
        warn!(type_name = config.name(), operation = %operation, "zero rows affected");
        Err(EngineError::Conflict(format!(
            "{} of {} affected no rows",
            operation,
            config.name()
        )))
    }

    /// Replaces the entity with its stored row, keeping the in-memory
    /// children, pending changes and resolved references.
    fn refresh_after_write(
        &self,
        config: &TypeConfig,
        dto: &mut Dto,
        ctx: &CallContext<'_>,
    ) -> Result<()> {
        let Some(key) = dto.primary_key().cloned() else {
            return Ok(());
        };
        let Some(mut fresh) = self.fetch_row(config, &key, ctx)? else {
            debug!(type_name = config.name(), key = %key, "row not readable after write");
            return Ok(());
        };

        fresh.replace_child_collections(dto.take_child_collections());
        fresh.replace_references(dto.take_references());
        fresh.replace_property_changes(dto.property_changes().clone());
        for (parent, key) in dto.foreign_keys() {
            if fresh.foreign_key(parent).is_none() {
                fresh.set_foreign_key(parent.clone(), key.clone());
            }
        }
        if fresh.audit_id().is_none() {
            if let Some(audit_id) = dto.audit_id() {
                fresh.set_audit_id(audit_id.to_string());
            }
        }
        fresh.set_state(dto.state());
        *dto = fresh;
        Ok(())
    }

    fn after_write(
        &self,
        config: &TypeConfig,
        dto: &mut Dto,
        operation: Operation,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        self.resolve_references(config, dto, ctx)?;
        if let Some(hooks) = config.entity_hooks() {
            hooks.post_write(dto, operation, ctx.session, ctx.bag)?;
        }
        self.cascade_children(config, dto, ctx)?;
        if !config.is_cached() || config.auto_cache_children {
            self.load_children(config, dto, ctx)?;
        }
        Ok(())
    }

    pub(crate) fn record_audit(
        &self,
        config: &TypeConfig,
        dto: &Dto,
        operation: Operation,
        ctx: &mut CallContext<'_>,
    ) {
        if !config.is_audited() {
            return;
        }
        let transaction_id = ctx.audit_transaction_id();
        let session = ctx.session;
        let entries = recorder::entries_for(
            config,
            dto,
            operation,
            &transaction_id,
            self.audit_user(session),
        );
        ctx.audit_entries.extend(entries);
    }

    /// Buffers the post-commit cache write for a cached type, or for any
    /// type whose writes must purge dependents.
    pub(crate) fn queue_cache_write(
        &self,
        config: &Arc<TypeConfig>,
        dto: &Dto,
        operation: Operation,
        ctx: &mut CallContext<'_>,
    ) -> Result<()> {
        if !config.is_cached() && !self.cache.has_dependents(config.name())? {
            return Ok(());
        }
        let mut committed = dto.clone();
        if operation != Operation::Delete {
            committed.mark_committed();
        }
        ctx.cache_writes.push(CacheWrite::Saved {
            config: config.clone(),
            operation,
            dto: committed,
        });
        Ok(())
    }
}

fn next_version(type_name: &str, current: Option<&Value>) -> Result<Value> {
    match current.and_then(Value::as_i64) {
        Some(version) => version.checked_add(1).map(Value::Integer).ok_or_else(|| {
            EngineError::Conflict(format!("{type_name} version {version} cannot be incremented"))
        }),
        None => Ok(Value::Integer(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_version_increments_or_starts_at_one() {
        assert_eq!(next_version("Contract", Some(&Value::Integer(4))).unwrap(), Value::Integer(5));
        assert_eq!(next_version("Contract", Some(&Value::Null)).unwrap(), Value::Integer(1));
        assert_eq!(next_version("Contract", None).unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_exhausted_version_is_conflict() {
        let err = next_version("Contract", Some(&Value::Integer(i64::MAX))).unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::Conflict);
    }
}
