use crate::core::Value;
use crate::dispatch::QueryToken;
use crate::entity::Operation;
use crate::hooks::EntityHooks;
use crate::validation::RuleGroup;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// How a new entity receives its primary key.
#[derive(Clone, Default)]
pub enum KeyGeneration {
    /// The caller supplies the key
    #[default]
    External,
    /// A random v4 UUID rendered as text
    Uuid,
    /// Allocated from a named store sequence
    Sequence(String),
    /// Generated in process by the given function
    Local(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl fmt::Debug for KeyGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External => write!(f, "External"),
            Self::Uuid => write!(f, "Uuid"),
            Self::Sequence(name) => f.debug_tuple("Sequence").field(name).finish(),
            Self::Local(_) => write!(f, "Local(..)"),
        }
    }
}

/// Type-level write permissions, checked before the security checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub add: bool,
    pub update: bool,
    pub delete: bool,
}

impl Permissions {
    pub fn all() -> Self {
        Self {
            add: true,
            update: true,
            delete: true,
        }
    }

    pub fn read_only() -> Self {
        Self {
            add: false,
            update: false,
            delete: false,
        }
    }

    pub fn allows(&self, operation: Operation) -> bool {
        match operation {
            Operation::Add => self.add,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::all()
    }
}

/// Per-operation tolerance of a write that affects zero rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZeroRowsPolicy {
    pub add: bool,
    pub update: bool,
    pub delete: bool,
}

impl ZeroRowsPolicy {
    pub fn tolerates(&self, operation: Operation) -> bool {
        match operation {
            Operation::Add => self.add,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// One slot per entity, filled on demand by primary-key reads
    PerEntity,
    /// One map per type, filled by a full load on first read
    LookupMap,
}

/// Parent -> child wiring registered on the parent type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRelationship {
    pub child_type: String,
    pub token: QueryToken,
    pub add_order: Option<i32>,
    pub delete_order: Option<i32>,
    pub auto_retrieve: bool,
    pub vanity: bool,
    pub child_not_found_allowed: bool,
    pub cascade_writes: bool,
    pub foreign_key: Option<String>,
    pub(crate) declared: usize,
}

impl ChildRelationship {
    pub fn new(child_type: impl Into<String>, token: impl Into<QueryToken>) -> Self {
        Self {
            child_type: child_type.into(),
            token: token.into(),
            add_order: None,
            delete_order: None,
            auto_retrieve: false,
            vanity: false,
            child_not_found_allowed: true,
            cascade_writes: true,
            foreign_key: None,
            declared: 0,
        }
    }

    pub fn add_order(mut self, order: i32) -> Self {
        self.add_order = Some(order);
        self
    }

    pub fn delete_order(mut self, order: i32) -> Self {
        self.delete_order = Some(order);
        self
    }

    pub fn auto_retrieve(mut self) -> Self {
        self.auto_retrieve = true;
        self
    }

    /// Display-only collection: loaded, never cascaded.
    pub fn vanity(mut self) -> Self {
        self.vanity = true;
        self
    }

    pub fn require_children(mut self) -> Self {
        self.child_not_found_allowed = false;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.cascade_writes = false;
        self
    }

    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Add/update ordering key; declaration order when unset.
    pub fn effective_add_order(&self) -> i32 {
        self.add_order.unwrap_or(self.declared as i32)
    }

    /// Delete ordering key; reverse declaration order when unset.
    pub fn effective_delete_order(&self) -> i32 {
        self.delete_order.unwrap_or(-(self.declared as i32))
    }

    pub(crate) fn cascades(&self) -> bool {
        self.cascade_writes && !self.vanity
    }
}

/// Child -> parent link, the mirror of a [`ChildRelationship`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub parent_type: String,
    pub token: QueryToken,
    pub column: String,
}

/// A property holding the primary key of another entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceField {
    pub field: String,
    pub target_type: String,
    pub not_found_allowed: bool,
    pub owned: bool,
}

impl ReferenceField {
    pub fn new(field: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            target_type: target_type.into(),
            not_found_allowed: false,
            owned: false,
        }
    }

    pub fn not_found_allowed(mut self) -> Self {
        self.not_found_allowed = true;
        self
    }

    /// The target's lifecycle follows the owner: it is saved before and
    /// deleted after the owner.
    pub fn owned(mut self) -> Self {
        self.owned = true;
        self
    }
}

/// Per-type metadata, built once and shared for the process lifetime.
#[derive(Clone)]
pub struct TypeConfig {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) primary_key: String,
    pub(crate) key_generation: KeyGeneration,
    pub(crate) permissions: Permissions,
    pub(crate) cache: Option<CacheMode>,
    pub(crate) auto_cache_children: bool,
    pub(crate) self_referencing: bool,
    pub(crate) refresh_on_write: bool,
    pub(crate) audited: bool,
    pub(crate) audit_excluded: BTreeSet<String>,
    pub(crate) audit_column: String,
    pub(crate) version_property: Option<String>,
    pub(crate) zero_rows: ZeroRowsPolicy,
    pub(crate) default_mapping: bool,
    pub(crate) children: Vec<ChildRelationship>,
    pub(crate) parents: Vec<ParentLink>,
    pub(crate) references: Vec<ReferenceField>,
    pub(crate) add_rule_groups: Vec<RuleGroup>,
    pub(crate) update_rule_groups: Vec<RuleGroup>,
    pub(crate) hooks: Option<Arc<dyn EntityHooks>>,
    pub(crate) implicit: bool,
}

impl TypeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: name.to_lowercase(),
            name,
            primary_key: "id".to_string(),
            key_generation: KeyGeneration::External,
            permissions: Permissions::all(),
            cache: None,
            auto_cache_children: false,
            self_referencing: false,
            refresh_on_write: false,
            audited: false,
            audit_excluded: BTreeSet::new(),
            audit_column: "audit_id".to_string(),
            version_property: None,
            zero_rows: ZeroRowsPolicy::default(),
            default_mapping: true,
            children: Vec::new(),
            parents: Vec::new(),
            references: Vec::new(),
            add_rule_groups: vec![RuleGroup::Default, RuleGroup::Add],
            update_rule_groups: vec![RuleGroup::Default, RuleGroup::Update],
            hooks: None,
            implicit: false,
        }
    }

    pub(crate) fn implicit(name: &str) -> Self {
        let mut config = Self::new(name);
        config.implicit = true;
        config
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn key_generation(mut self, generation: KeyGeneration) -> Self {
        self.key_generation = generation;
        self
    }

    pub fn permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn cached(mut self, mode: CacheMode) -> Self {
        self.cache = Some(mode);
        self
    }

    /// Attach auto-retrieved children to every entity of a full cache load.
    pub fn auto_cache_children(mut self) -> Self {
        self.auto_cache_children = true;
        self
    }

    pub fn self_referencing(mut self) -> Self {
        self.self_referencing = true;
        self
    }

    pub fn refresh_on_write(mut self) -> Self {
        self.refresh_on_write = true;
        self
    }

    pub fn audited(mut self) -> Self {
        self.audited = true;
        self
    }

    pub fn audit_exclude(mut self, property: impl Into<String>) -> Self {
        self.audit_excluded.insert(property.into());
        self
    }

    pub fn audit_column(mut self, column: impl Into<String>) -> Self {
        self.audit_column = column.into();
        self
    }

    pub fn version_property(mut self, property: impl Into<String>) -> Self {
        self.version_property = Some(property.into());
        self
    }

    pub fn tolerate_zero_rows(mut self, operation: Operation) -> Self {
        match operation {
            Operation::Add => self.zero_rows.add = true,
            Operation::Update => self.zero_rows.update = true,
            Operation::Delete => self.zero_rows.delete = true,
        }
        self
    }

    pub fn without_default_mapping(mut self) -> Self {
        self.default_mapping = false;
        self
    }

    pub fn child(mut self, relationship: ChildRelationship) -> Self {
        self.children.push(relationship);
        self
    }

    pub fn reference(mut self, reference: ReferenceField) -> Self {
        self.references.push(reference);
        self
    }

    pub fn rule_groups(mut self, operation: Operation, groups: Vec<RuleGroup>) -> Self {
        match operation {
            Operation::Add => self.add_rule_groups = groups,
            Operation::Update => self.update_rule_groups = groups,
            Operation::Delete => {}
        }
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn EntityHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn primary_key_column(&self) -> &str {
        &self.primary_key
    }

    pub fn key_generator(&self) -> &KeyGeneration {
        &self.key_generation
    }

    pub fn type_permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn cache_mode(&self) -> Option<CacheMode> {
        self.cache
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    pub fn is_self_referencing(&self) -> bool {
        self.self_referencing
    }

    pub fn is_audited(&self) -> bool {
        self.audited
    }

    pub fn version(&self) -> Option<&str> {
        self.version_property.as_deref()
    }

    pub fn zero_rows_policy(&self) -> ZeroRowsPolicy {
        self.zero_rows
    }

    pub fn has_default_mapping(&self) -> bool {
        self.default_mapping
    }

    /// Cached types and `refresh_on_write` types re-read their row after
    /// every write.
    pub fn refreshes_after_write(&self) -> bool {
        self.refresh_on_write || self.cache.is_some()
    }

    pub fn relationships(&self) -> &[ChildRelationship] {
        &self.children
    }

    pub fn parent_links(&self) -> &[ParentLink] {
        &self.parents
    }

    pub fn reference_fields(&self) -> &[ReferenceField] {
        &self.references
    }

    pub fn rule_groups_for(&self, operation: Operation) -> &[RuleGroup] {
        match operation {
            Operation::Add => &self.add_rule_groups,
            Operation::Update => &self.update_rule_groups,
            Operation::Delete => &[],
        }
    }

    pub fn entity_hooks(&self) -> Option<&Arc<dyn EntityHooks>> {
        self.hooks.as_ref()
    }

    pub(crate) fn is_audit_tracked(&self, property: &str) -> bool {
        self.audited && !self.audit_excluded.contains(property)
    }

    pub(crate) fn parent_column(&self, parent_type: &str) -> Option<&str> {
        self.parents
            .iter()
            .find(|link| link.parent_type == parent_type)
            .map(|link| link.column.as_str())
    }
}

impl fmt::Debug for TypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeConfig")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("key_generation", &self.key_generation)
            .field("cache", &self.cache)
            .field("self_referencing", &self.self_referencing)
            .field("audited", &self.audited)
            .field("children", &self.children)
            .field("parents", &self.parents)
            .field("references", &self.references)
            .finish_non_exhaustive()
    }
}

/// Default foreign-key column for links to `parent_type`.
pub(crate) fn default_foreign_key_column(parent_type: &str) -> String {
    format!("{}_id", parent_type.to_lowercase())
}
