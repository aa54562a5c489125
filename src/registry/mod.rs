// ============================================================================
// Type Registry
// ============================================================================
//
// Per-type metadata keyed by type name. Reads clone an `Arc` snapshot;
// writes copy the map, change the copy and swap it in, so readers never
// block on each other after warm-up.
//
// ============================================================================

pub mod config;
mod mapping;

pub use config::{
    CacheMode, ChildRelationship, KeyGeneration, ParentLink, Permissions, ReferenceField,
    TypeConfig, ZeroRowsPolicy,
};

use crate::core::{EngineError, Result};
use crate::dispatch::QueryToken;
use config::default_foreign_key_column;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error};

type ConfigMap = HashMap<String, Arc<TypeConfig>>;

pub struct TypeRegistry {
    types: RwLock<Arc<ConfigMap>>,
    /// Types whose relationships passed the duplicate-token check
    validated: Mutex<HashSet<String>>,
    /// Bumped on every write so dependent tables can rebuild
    generation: AtomicU64,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            types: RwLock::new(Arc::new(HashMap::new())),
            validated: Mutex::new(HashSet::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Result<Arc<ConfigMap>> {
        Ok(self.types.read()?.clone())
    }

    /// Registers a fully declared type.
    ///
    /// Children declared on the config are wired exactly as if
    /// [`register_relationship`](Self::register_relationship) had been called
    /// for each. A type that so far only exists implicitly (it was named by
    /// another type's relationship) keeps the links already recorded on it.
    pub fn register_type(&self, mut config: TypeConfig) -> Result<()> {
        let declared = std::mem::take(&mut config.children);
        {
            let mut guard = self.types.write()?;
            let mut map = (**guard).clone();

            if let Some(existing) = map.get(&config.name) {
                if !existing.implicit {
                    let message = format!("type '{}' is already registered", config.name);
                    error!("{message}");
                    return Err(EngineError::Configuration(message));
                }
                config.parents = existing.parents.clone();
                config.children = existing.children.clone();
            }

            debug!(type_name = %config.name, "registering type");
            map.insert(config.name.clone(), Arc::new(config.clone()));
            *guard = Arc::new(map);
        }
        self.bump(&config.name)?;

        for relationship in declared {
            self.register_relationship(&config.name, relationship)?;
        }
        Ok(())
    }

    /// Records a parent-child wiring with default ordering and flags.
    pub fn register(
        &self,
        parent_type: &str,
        child_type: &str,
        token: impl Into<QueryToken>,
    ) -> Result<()> {
        self.register_relationship(parent_type, ChildRelationship::new(child_type, token))
    }

    /// Records a parent-child wiring on both ends.
    ///
    /// Duplicate tokens are accepted here and reported the first time the
    /// parent's relationships are validated for a cascade.
    pub fn register_relationship(
        &self,
        parent_type: &str,
        mut relationship: ChildRelationship,
    ) -> Result<()> {
        let mut guard = self.types.write()?;
        let mut map = (**guard).clone();

        let mut parent = entry_or_implicit(&map, parent_type);
        relationship.declared = parent.children.len();
        let column = relationship
            .foreign_key
            .clone()
            .unwrap_or_else(|| default_foreign_key_column(parent_type));
        let link = ParentLink {
            parent_type: parent_type.to_string(),
            token: relationship.token.clone(),
            column,
        };
        let child_type = relationship.child_type.clone();
        debug!(
            parent = parent_type,
            child = %child_type,
            token = %relationship.token,
            "registering child relationship"
        );
        parent.children.push(relationship);

        if child_type == parent_type {
            parent.parents.push(link);
            map.insert(parent_type.to_string(), Arc::new(parent));
        } else {
            let mut child = entry_or_implicit(&map, &child_type);
            child.parents.push(link);
            map.insert(parent_type.to_string(), Arc::new(parent));
            map.insert(child_type, Arc::new(child));
        }

        *guard = Arc::new(map);
        drop(guard);
        self.bump(parent_type)
    }

    /// Configuration for `type_name`, created with defaults on first use.
    pub fn config_of(&self, type_name: &str) -> Result<Arc<TypeConfig>> {
        if let Some(config) = self.snapshot()?.get(type_name) {
            return Ok(config.clone());
        }

        let mut guard = self.types.write()?;
        if let Some(config) = guard.get(type_name) {
            return Ok(config.clone());
        }
        debug!(type_name, "creating default type configuration");
        let config = Arc::new(TypeConfig::implicit(type_name));
        let mut map = (**guard).clone();
        map.insert(type_name.to_string(), config.clone());
        *guard = Arc::new(map);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(config)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.snapshot()
            .map(|map| map.contains_key(type_name))
            .unwrap_or(false)
    }

    pub fn types(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.snapshot()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Child relationships in add/update order (ties by declaration).
    pub fn add_order_of(&self, type_name: &str) -> Result<Vec<ChildRelationship>> {
        let mut children = self.config_of(type_name)?.children.clone();
        children.sort_by_key(|rel| (rel.effective_add_order(), rel.declared));
        Ok(children)
    }

    /// Child relationships in delete order (ties by declaration).
    pub fn delete_order_of(&self, type_name: &str) -> Result<Vec<ChildRelationship>> {
        let mut children = self.config_of(type_name)?.children.clone();
        children.sort_by_key(|rel| (rel.effective_delete_order(), rel.declared));
        Ok(children)
    }

    pub fn relationship(
        &self,
        parent_type: &str,
        token: &QueryToken,
    ) -> Result<Option<ChildRelationship>> {
        Ok(self
            .config_of(parent_type)?
            .children
            .iter()
            .find(|rel| &rel.token == token)
            .cloned())
    }

    /// Rejects two relationships of one parent sharing a token. Success is
    /// remembered until the type's wiring changes.
    pub fn validate_relationships(&self, type_name: &str) -> Result<()> {
        if self.validated.lock()?.contains(type_name) {
            return Ok(());
        }

        let config = self.config_of(type_name)?;
        let mut seen = HashSet::new();
        for relationship in &config.children {
            if !seen.insert(&relationship.token) {
                let message = format!(
                    "type '{}' registers query token '{}' more than once",
                    type_name, relationship.token
                );
                error!("{message}");
                return Err(EngineError::Configuration(message));
            }
        }

        self.validated.lock()?.insert(type_name.to_string());
        Ok(())
    }

    fn bump(&self, type_name: &str) -> Result<()> {
        self.validated.lock()?.remove(type_name);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn entry_or_implicit(map: &ConfigMap, type_name: &str) -> TypeConfig {
    map.get(type_name)
        .map(|config| (**config).clone())
        .unwrap_or_else(|| TypeConfig::implicit(type_name))
}
