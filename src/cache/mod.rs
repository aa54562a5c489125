// ============================================================================
// Cache Layer
// ============================================================================
//
// Cache-aside storage for cached entity types. Each type owns one slot:
//
//   PerEntity  - entries keyed by primary key, filled by point reads
//   LookupMap  - the whole type, filled by one authoritative full load
//
// Point writes touch a single key. A write to type Y purges (does not
// refresh) every type registered as depending on Y, transitively.
//
// Every save and purge of a type bumps its epoch. A read captures the
// epoch before touching the store, and its fill is dropped when the epoch
// has moved on by the time the fill is applied.
//
// ============================================================================

use crate::core::{EngineError, Result, Value};
use crate::entity::{Dto, Operation};
use crate::registry::{CacheMode, TypeConfig};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error};

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub purges: u64,
}

/// A cache mutation produced inside a call and applied when it ends.
#[derive(Debug, Clone)]
pub(crate) enum CacheWrite {
    Saved { config: Arc<TypeConfig>, operation: Operation, dto: Dto },
    Loaded { config: Arc<TypeConfig>, dto: Dto, epoch: u64 },
}

struct CacheSlot {
    mode: CacheMode,
    initialized: bool,
    entries: HashMap<Value, Dto>,
}

impl CacheSlot {
    fn new(mode: CacheMode) -> Self {
        Self {
            mode,
            initialized: false,
            entries: HashMap::new(),
        }
    }
}

/// Removes a type from the in-flight set when its load ends.
pub(crate) struct InitializationGuard<'a> {
    layer: &'a CacheLayer,
    type_name: String,
}

impl Drop for InitializationGuard<'_> {
    fn drop(&mut self) {
        let mut initializing = self
            .layer
            .initializing
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        initializing.remove(&self.type_name);
    }
}

#[derive(Default)]
pub struct CacheLayer {
    slots: RwLock<HashMap<String, Arc<RwLock<CacheSlot>>>>,
    initializing: Mutex<HashSet<String>>,
    /// Taken before any slot lock
    epochs: Mutex<HashMap<String, u64>>,
    /// Y -> types whose cached entries embed Y
    dependents: RwLock<HashMap<String, BTreeSet<String>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    purges: AtomicU64,
}

impl CacheLayer {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, type_name: &str) -> Result<Option<Arc<RwLock<CacheSlot>>>> {
        Ok(self.slots.read()?.get(type_name).cloned())
    }

    fn slot_or_create(&self, type_name: &str, mode: CacheMode) -> Result<Arc<RwLock<CacheSlot>>> {
        if let Some(slot) = self.slot(type_name)? {
            return Ok(slot);
        }
        let mut slots = self.slots.write()?;
        Ok(slots
            .entry(type_name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(CacheSlot::new(mode))))
            .clone())
    }

    pub fn is_initialized(&self, type_name: &str) -> Result<bool> {
        match self.slot(type_name)? {
            Some(slot) => Ok(slot.read()?.initialized),
            None => Ok(false),
        }
    }

    /// Claims the full load of `type_name`. A second caller arriving while
    /// the load is in flight fails instead of loading again.
    pub(crate) fn begin_initialization(&self, type_name: &str) -> Result<InitializationGuard<'_>> {
        let mut initializing = self.initializing.lock()?;
        if !initializing.insert(type_name.to_string()) {
            let message = format!("cache initialization of {} is already in progress", type_name);
            error!("{message}");
            return Err(EngineError::Configuration(message));
        }
        Ok(InitializationGuard {
            layer: self,
            type_name: type_name.to_string(),
        })
    }

    /// Registers the type's dependency edges and returns the epoch a read
    /// of it starts from. Call before the store is read.
    pub fn begin_fill(&self, config: &TypeConfig) -> Result<u64> {
        self.register_dependencies(config)?;
        Ok(self.epochs.lock()?.get(config.name()).copied().unwrap_or(0))
    }

    fn bump_epoch(epochs: &mut HashMap<String, u64>, type_name: &str) {
        let epoch = epochs.entry(type_name.to_string()).or_insert(0);
        *epoch = epoch.wrapping_add(1);
    }

    /// Replaces the slot's contents with an authoritative load read at
    /// `epoch`. A load overtaken by a save or purge is dropped and the
    /// type stays unloaded.
    pub fn populate(&self, config: &TypeConfig, entities: Vec<Dto>, epoch: u64) -> Result<()> {
        let Some(mode) = config.cache_mode() else {
            return Ok(());
        };
        let slot = self.slot_or_create(config.name(), mode)?;
        {
            let epochs = self.epochs.lock()?;
            if epochs.get(config.name()).copied().unwrap_or(0) != epoch {
                debug!(type_name = config.name(), "stale full load dropped");
                return Ok(());
            }
            let mut slot = slot.write()?;
            slot.entries = entities
                .into_iter()
                .filter_map(|dto| dto.primary_key().cloned().map(|key| (key, dto)))
                .collect();
            slot.initialized = true;
            debug!(type_name = config.name(), entries = slot.entries.len(), "cache populated");
        }
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.register_dependencies(config)
    }

    /// Marks a failed load as an empty, initialized cache.
    pub fn mark_initialized_empty(&self, config: &TypeConfig) -> Result<()> {
        let Some(mode) = config.cache_mode() else {
            return Ok(());
        };
        let slot = self.slot_or_create(config.name(), mode)?;
        let mut slot = slot.write()?;
        slot.entries.clear();
        slot.initialized = true;
        self.load_failures.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn get(&self, type_name: &str, key: &Value) -> Result<Option<Dto>> {
        let found = match self.slot(type_name)? {
            Some(slot) => slot.read()?.entries.get(key).cloned(),
            None => None,
        };
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(found)
    }

    /// Every cached entity of the type, ordered by primary key.
    pub fn values(&self, type_name: &str) -> Result<Vec<Dto>> {
        let Some(slot) = self.slot(type_name)? else {
            return Ok(Vec::new());
        };
        let slot = slot.read()?;
        let mut values: Vec<Dto> = slot.entries.values().cloned().collect();
        values.sort_by(|a, b| a.primary_key().cmp(&b.primary_key()));
        Ok(values)
    }

    pub fn len(&self, type_name: &str) -> Result<usize> {
        match self.slot(type_name)? {
            Some(slot) => Ok(slot.read()?.entries.len()),
            None => Ok(0),
        }
    }

    /// Stores an entity read at `epoch` into a per-entity slot. The fill
    /// never replaces an entry and is dropped when a save or purge of the
    /// type happened since the read began.
    pub fn put_loaded(&self, config: &TypeConfig, dto: Dto, epoch: u64) -> Result<()> {
        if config.cache_mode() != Some(CacheMode::PerEntity) {
            return Ok(());
        }
        let Some(key) = dto.primary_key().cloned() else {
            return Ok(());
        };
        let slot = self.slot_or_create(config.name(), CacheMode::PerEntity)?;
        {
            let epochs = self.epochs.lock()?;
            if epochs.get(config.name()).copied().unwrap_or(0) != epoch {
                debug!(type_name = config.name(), key = %key, "stale read fill dropped");
                return Ok(());
            }
            let mut slot = slot.write()?;
            slot.entries.entry(key).or_insert(dto);
            slot.initialized = true;
        }
        self.register_dependencies(config)
    }

    /// Applies one committed write: ADD inserts, UPDATE replaces and DELETE
    /// removes the entity's key, then dependents are purged.
    pub fn save(&self, config: &TypeConfig, dto: &Dto, operation: Operation) -> Result<()> {
        if let (Some(mode), Some(key)) = (config.cache_mode(), dto.primary_key()) {
            let slot = self.slot_or_create(config.name(), mode)?;
            let mut epochs = self.epochs.lock()?;
            Self::bump_epoch(&mut epochs, config.name());
            let mut slot = slot.write()?;
            // A lookup map that was never loaded stays unloaded; the next
            // read performs the full load.
            let writable = slot.initialized || slot.mode == CacheMode::PerEntity;
            if writable {
                match operation {
                    Operation::Add | Operation::Update => {
                        slot.entries.insert(key.clone(), dto.clone());
                        slot.initialized = true;
                    }
                    Operation::Delete => {
                        slot.entries.remove(key);
                    }
                }
            }
        }
        if operation != Operation::Delete {
            self.register_dependencies(config)?;
        }
        self.purge_dependents(config.name())
    }

    /// Drops a type's contents; the next read reloads it.
    pub fn purge(&self, type_name: &str) -> Result<()> {
        let mut epochs = self.epochs.lock()?;
        Self::bump_epoch(&mut epochs, type_name);
        if let Some(slot) = self.slot(type_name)? {
            let mut slot = slot.write()?;
            slot.entries.clear();
            slot.initialized = false;
            self.purges.fetch_add(1, Ordering::Relaxed);
            debug!(type_name, "cache purged");
        }
        Ok(())
    }

    pub fn purge_all(&self) -> Result<()> {
        let mut names: BTreeSet<String> = self.slots.read()?.keys().cloned().collect();
        names.extend(self.epochs.lock()?.keys().cloned());
        for name in names {
            self.purge(&name)?;
        }
        Ok(())
    }

    /// Records that cached `dependent` entries embed `dependency` entities.
    pub fn register_dependency(&self, dependent: &str, dependency: &str) -> Result<()> {
        if dependent == dependency {
            return Ok(());
        }
        let mut dependents = self.dependents.write()?;
        if dependents
            .entry(dependency.to_string())
            .or_default()
            .insert(dependent.to_string())
        {
            debug!(dependent, dependency, "cache dependency registered");
        }
        Ok(())
    }

    pub fn has_dependents(&self, type_name: &str) -> Result<bool> {
        Ok(self
            .dependents
            .read()?
            .get(type_name)
            .is_some_and(|set| !set.is_empty()))
    }

    pub fn dependents_of(&self, type_name: &str) -> Result<Vec<String>> {
        Ok(self
            .dependents
            .read()?
            .get(type_name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn register_dependencies(&self, config: &TypeConfig) -> Result<()> {
        for reference in config.reference_fields() {
            self.register_dependency(config.name(), &reference.target_type)?;
        }
        for relationship in config.relationships() {
            self.register_dependency(config.name(), &relationship.child_type)?;
        }
        Ok(())
    }

    fn purge_dependents(&self, type_name: &str) -> Result<()> {
        let mut visited = HashSet::from([type_name.to_string()]);
        let mut pending = self.dependents_of(type_name)?;
        while let Some(dependent) = pending.pop() {
            if !visited.insert(dependent.clone()) {
                continue;
            }
            self.purge(&dependent)?;
            pending.extend(self.dependents_of(&dependent)?);
        }
        Ok(())
    }

    pub(crate) fn apply(&self, writes: Vec<CacheWrite>) -> Result<()> {
        for write in writes {
            match write {
                CacheWrite::Saved { config, operation, dto } => {
                    self.save(&config, &dto, operation)?;
                }
                CacheWrite::Loaded { config, dto, epoch } => {
                    self.put_loaded(&config, dto, epoch)?;
                }
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            purges: self.purges.load(Ordering::Relaxed),
        }
    }
}
