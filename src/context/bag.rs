use crate::core::{EntityIdentity, Value};
use crate::dispatch::QueryToken;
use crate::entity::Dto;
use std::collections::HashMap;

/// Caller flag: re-read the stored row before applying an update.
pub const FORCE_REFRESH: &str = "force_refresh";
/// Caller flag: ignore `EngineConfig::max_query_rows` for list queries.
pub const SKIP_LIMIT: &str = "skip_limit";
/// Caller value (`BagValue::Tokens`): child collections to load in addition
/// to the auto-retrieved ones.
pub const RETRIEVE_CHILDREN: &str = "retrieve_children";

const INTERNAL_PREFIX: &str = "engine.";
const ANCESTORS: &str = "engine.ancestors";
const RECURSIVE_NODE: &str = "engine.recursive_node";

#[derive(Debug, Clone, PartialEq)]
pub enum BagValue {
    Flag(bool),
    Value(Value),
    Tokens(Vec<QueryToken>),
    Identities(Vec<EntityIdentity>),
    Lookup(HashMap<Value, Dto>),
}

/// Ordered, request-scoped key-value store passed by reference through one
/// call tree.
///
/// Keys starting with `engine.` are reserved for the engine's own traversal
/// state (ancestor stack, cycle marker, bulk lookup maps) and are cleared
/// when the outermost call returns.
#[derive(Debug, Clone, Default)]
pub struct PropertyBag {
    entries: Vec<(String, BagValue)>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flag(mut self, key: &str) -> Self {
        self.set_flag(key, true);
        self
    }

    pub fn with(mut self, key: &str, value: BagValue) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces; a replaced key keeps its position.
    pub fn insert(&mut self, key: &str, value: BagValue) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&BagValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut BagValue> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<BagValue> {
        let position = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(position).1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some(BagValue::Flag(true)))
    }

    pub fn set_flag(&mut self, key: &str, on: bool) {
        self.insert(key, BagValue::Flag(on));
    }

    pub fn tokens(&self, key: &str) -> &[QueryToken] {
        match self.get(key) {
            Some(BagValue::Tokens(tokens)) => tokens,
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BagValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    // ------------------------------------------------------------------
    // Engine traversal state
    // ------------------------------------------------------------------

    /// Pushes `identity` onto the ancestor stack and returns the depth to
    /// truncate back to.
    pub(crate) fn push_ancestor(&mut self, identity: Option<EntityIdentity>) -> usize {
        let stack = self.ancestor_stack_mut();
        let mark = stack.len();
        if let Some(identity) = identity {
            stack.push(identity);
        }
        mark
    }

    pub(crate) fn truncate_ancestors(&mut self, mark: usize) {
        if let Some(BagValue::Identities(stack)) = self.get_mut(ANCESTORS) {
            stack.truncate(mark);
        }
    }

    pub(crate) fn is_ancestor(&self, identity: &EntityIdentity) -> bool {
        match self.get(ANCESTORS) {
            Some(BagValue::Identities(stack)) => stack.contains(identity),
            _ => false,
        }
    }

    pub(crate) fn ancestor_depth(&self) -> usize {
        match self.get(ANCESTORS) {
            Some(BagValue::Identities(stack)) => stack.len(),
            _ => 0,
        }
    }

    fn ancestor_stack_mut(&mut self) -> &mut Vec<EntityIdentity> {
        if !matches!(self.get(ANCESTORS), Some(BagValue::Identities(_))) {
            self.insert(ANCESTORS, BagValue::Identities(Vec::new()));
        }
        match self.get_mut(ANCESTORS) {
            Some(BagValue::Identities(stack)) => stack,
            _ => unreachable!("ancestor stack inserted above"),
        }
    }

    pub(crate) fn mark_recursive_node(&mut self) {
        self.set_flag(RECURSIVE_NODE, true);
    }

    pub(crate) fn recursive_node_encountered(&self) -> bool {
        self.flag(RECURSIVE_NODE)
    }

    pub(crate) fn install_lookup(&mut self, type_name: &str, lookup: HashMap<Value, Dto>) {
        self.insert(&lookup_key(type_name), BagValue::Lookup(lookup));
    }

    pub(crate) fn remove_lookup(&mut self, type_name: &str) {
        self.remove(&lookup_key(type_name));
    }

    pub(crate) fn lookup(&self, type_name: &str, key: &Value) -> Option<&Dto> {
        match self.get(&lookup_key(type_name)) {
            Some(BagValue::Lookup(map)) => map.get(key),
            _ => None,
        }
    }

    pub(crate) fn clear_internal(&mut self) {
        self.entries.retain(|(k, _)| !k.starts_with(INTERNAL_PREFIX));
    }
}

fn lookup_key(type_name: &str) -> String {
    format!("{INTERNAL_PREFIX}lookup.{type_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_order_and_replaces_in_place() {
        let mut bag = PropertyBag::new();
        bag.set_flag("a", true);
        bag.insert("b", BagValue::Value(Value::from(1)));
        bag.set_flag("a", false);
        let keys: Vec<&str> = bag.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(!bag.flag("a"));
    }

    #[test]
    fn test_ancestor_stack_truncates_to_mark() {
        let mut bag = PropertyBag::new();
        let root = EntityIdentity::new("Node", 1);
        let child = EntityIdentity::new("Node", 2);

        let outer = bag.push_ancestor(Some(root.clone()));
        let inner = bag.push_ancestor(Some(child.clone()));
        assert!(bag.is_ancestor(&root));
        assert!(bag.is_ancestor(&child));

        bag.truncate_ancestors(inner);
        assert!(!bag.is_ancestor(&child));
        bag.truncate_ancestors(outer);
        assert_eq!(bag.ancestor_depth(), 0);
    }

    #[test]
    fn test_clear_internal_keeps_caller_keys() {
        let mut bag = PropertyBag::new().with_flag(FORCE_REFRESH);
        bag.mark_recursive_node();
        bag.install_lookup("Node", HashMap::new());
        bag.clear_internal();
        assert!(bag.flag(FORCE_REFRESH));
        assert!(!bag.recursive_node_encountered());
        assert_eq!(bag.len(), 1);
    }
}
