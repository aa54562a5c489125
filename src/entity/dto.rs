use super::DtoState;
use crate::core::{EntityIdentity, Value};
use crate::dispatch::QueryToken;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Old and new value of a property mutated after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub old: Value,
    pub new: Value,
}

impl PropertyChange {
    pub fn new(old: impl Into<Value>, new: impl Into<Value>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }
}

/// A business entity instance.
///
/// Scalar properties live in `properties`; `primary_key` and `foreign_keys`
/// are kept apart from them and mapped to columns by the type's
/// configuration. Children are grouped by the query token they were loaded
/// under, resolved references by the property that holds their key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dto {
    type_name: String,
    state: DtoState,
    primary_key: Option<Value>,
    foreign_keys: BTreeMap<String, Value>,
    properties: BTreeMap<String, Value>,
    child_collections: BTreeMap<QueryToken, Vec<Dto>>,
    references: BTreeMap<String, Dto>,
    property_changes: BTreeMap<String, PropertyChange>,
    audit_id: Option<String>,
}

impl Dto {
    /// A fresh entity in state `NEW`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self::with_state(type_name, DtoState::New)
    }

    /// A clean entity with a known primary key, as if just loaded.
    pub fn persisted(type_name: impl Into<String>, primary_key: impl Into<Value>) -> Self {
        let mut dto = Self::with_state(type_name, DtoState::Unset);
        dto.primary_key = Some(primary_key.into());
        dto
    }

    /// An empty query-criteria holder for `find_by_query` calls.
    pub fn criteria(type_name: impl Into<String>) -> Self {
        Self::with_state(type_name, DtoState::Unset)
    }

    fn with_state(type_name: impl Into<String>, state: DtoState) -> Self {
        Self {
            type_name: type_name.into(),
            state,
            primary_key: None,
            foreign_keys: BTreeMap::new(),
            properties: BTreeMap::new(),
            child_collections: BTreeMap::new(),
            references: BTreeMap::new(),
            property_changes: BTreeMap::new(),
            audit_id: None,
        }
    }

    /// Builder-style property assignment that bypasses change tracking.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(field.into(), value.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<Value>) -> Self {
        self.primary_key = Some(key.into());
        self
    }

    pub fn with_foreign_key(mut self, parent_type: impl Into<String>, key: impl Into<Value>) -> Self {
        self.foreign_keys.insert(parent_type.into(), key.into());
        self
    }

    pub fn with_child(mut self, token: impl Into<QueryToken>, child: Dto) -> Self {
        self.add_child(token, child);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn state(&self) -> DtoState {
        self.state
    }

    pub fn set_state(&mut self, state: DtoState) {
        self.state = state;
    }

    pub fn mark_deleted(&mut self) {
        self.state = DtoState::Deleted;
    }

    pub fn primary_key(&self) -> Option<&Value> {
        self.primary_key.as_ref()
    }

    pub fn set_primary_key(&mut self, key: impl Into<Value>) {
        self.primary_key = Some(key.into());
    }

    pub fn identity(&self) -> Option<EntityIdentity> {
        self.primary_key
            .as_ref()
            .map(|key| EntityIdentity::new(self.type_name.clone(), key.clone()))
    }

    pub fn foreign_key(&self, parent_type: &str) -> Option<&Value> {
        self.foreign_keys.get(parent_type)
    }

    pub fn foreign_keys(&self) -> &BTreeMap<String, Value> {
        &self.foreign_keys
    }

    pub fn set_foreign_key(&mut self, parent_type: impl Into<String>, key: impl Into<Value>) {
        self.foreign_keys.insert(parent_type.into(), key.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.properties.get(field)
    }

    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    /// Tracked setter.
    ///
    /// On a loaded entity the first old value of each field is kept in
    /// `property_changes`; setting a field back to that value drops the
    /// entry. The state moves NEW -> NEWMODIFIED or UNSET -> UPDATED.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        let previous = self
            .properties
            .insert(field.clone(), value.clone())
            .unwrap_or(Value::Null);
        if previous == value {
            return;
        }

        if !self.state.is_new() {
            match self.property_changes.entry(field) {
                Entry::Occupied(mut entry) => {
                    if entry.get().old == value {
                        entry.remove();
                    } else {
                        entry.get_mut().new = value;
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(PropertyChange { old: previous, new: value });
                }
            }
        }
        self.state = self.state.after_mutation();
    }

    pub(crate) fn set_untracked(&mut self, field: impl Into<String>, value: Value) {
        self.properties.insert(field.into(), value);
    }

    pub fn property_changes(&self) -> &BTreeMap<String, PropertyChange> {
        &self.property_changes
    }

    pub(crate) fn replace_property_changes(&mut self, changes: BTreeMap<String, PropertyChange>) {
        self.property_changes = changes;
    }

    pub fn children(&self, token: &QueryToken) -> &[Dto] {
        self.child_collections
            .get(token)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether a collection has been loaded (or supplied) under `token`.
    pub fn has_collection(&self, token: &QueryToken) -> bool {
        self.child_collections.contains_key(token)
    }

    pub fn children_mut(&mut self, token: impl Into<QueryToken>) -> &mut Vec<Dto> {
        self.child_collections.entry(token.into()).or_default()
    }

    pub fn add_child(&mut self, token: impl Into<QueryToken>, child: Dto) {
        self.children_mut(token).push(child);
    }

    pub fn child_collections(&self) -> &BTreeMap<QueryToken, Vec<Dto>> {
        &self.child_collections
    }

    pub(crate) fn take_children(&mut self, token: &QueryToken) -> Option<Vec<Dto>> {
        self.child_collections.remove(token)
    }

    pub(crate) fn put_children(&mut self, token: QueryToken, children: Vec<Dto>) {
        self.child_collections.insert(token, children);
    }

    pub(crate) fn take_child_collections(&mut self) -> BTreeMap<QueryToken, Vec<Dto>> {
        std::mem::take(&mut self.child_collections)
    }

    pub(crate) fn replace_child_collections(&mut self, collections: BTreeMap<QueryToken, Vec<Dto>>) {
        self.child_collections = collections;
    }

    pub fn reference(&self, field: &str) -> Option<&Dto> {
        self.references.get(field)
    }

    pub fn references(&self) -> &BTreeMap<String, Dto> {
        &self.references
    }

    pub fn set_reference(&mut self, field: impl Into<String>, target: Dto) {
        self.references.insert(field.into(), target);
    }

    pub(crate) fn take_reference(&mut self, field: &str) -> Option<Dto> {
        self.references.remove(field)
    }

    pub(crate) fn take_references(&mut self) -> BTreeMap<String, Dto> {
        std::mem::take(&mut self.references)
    }

    pub(crate) fn replace_references(&mut self, references: BTreeMap<String, Dto>) {
        self.references = references;
    }

    pub fn audit_id(&self) -> Option<&str> {
        self.audit_id.as_deref()
    }

    pub(crate) fn set_audit_id(&mut self, audit_id: String) {
        self.audit_id = Some(audit_id);
    }

    /// Commit marker: the entity is clean again.
    pub(crate) fn mark_committed(&mut self) {
        self.state = DtoState::Unset;
        self.property_changes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setter_on_new_entity_does_not_track() {
        let mut dto = Dto::new("Customer");
        dto.set("name", "Ada");
        assert_eq!(dto.state(), DtoState::NewModified);
        assert!(dto.property_changes().is_empty());
        assert_eq!(dto.get("name"), Some(&Value::from("Ada")));
    }

    #[test]
    fn test_setter_on_loaded_entity_tracks_first_old_value() {
        let mut dto = Dto::persisted("Customer", 1).with("name", "A");
        dto.set("name", "B");
        dto.set("name", "C");
        assert_eq!(dto.state(), DtoState::Updated);
        assert_eq!(dto.property_changes()["name"], PropertyChange::new("A", "C"));

        dto.set("name", "A");
        assert!(dto.property_changes().is_empty());
    }

    #[test]
    fn test_unchanged_set_is_ignored() {
        let mut dto = Dto::persisted("Customer", 1).with("name", "A");
        dto.set("name", "A");
        assert_eq!(dto.state(), DtoState::Unset);
    }

    #[test]
    fn test_commit_marker_clears_changes() {
        let mut dto = Dto::persisted("Customer", 1).with("name", "A");
        dto.set("name", "B");
        dto.mark_committed();
        assert_eq!(dto.state(), DtoState::Unset);
        assert!(dto.property_changes().is_empty());
    }

    #[test]
    fn test_identity_requires_key() {
        assert!(Dto::new("Customer").identity().is_none());
        let id = Dto::persisted("Customer", 5).identity().unwrap();
        assert_eq!(id, EntityIdentity::new("Customer", 5));
    }
}
