use super::AuditEntry;
use crate::core::Value;
use crate::entity::{Dto, Operation};
use crate::registry::TypeConfig;
use chrono::Utc;

/// Audit entries for one committed write of `dto`.
///
/// Updates diff `property_changes`; adds and deletes enumerate every
/// non-null tracked property as its new or old value. List properties
/// yield one entry per added or removed element.
pub(crate) fn entries_for(
    config: &TypeConfig,
    dto: &Dto,
    operation: Operation,
    transaction_id: &str,
    create_id: &str,
) -> Vec<AuditEntry> {
    if !config.is_audited() {
        return Vec::new();
    }

    let now = Utc::now();
    let entry = |property: &str, old: Option<String>, new: Option<String>| AuditEntry {
        transaction_id: transaction_id.to_string(),
        audit_id: dto.audit_id().unwrap_or_default().to_string(),
        class_name: config.name().to_string(),
        property_name: property.to_string(),
        old_value: old,
        new_value: new,
        create_id: create_id.to_string(),
        create_datetime: now,
    };
    let tracked = |property: &str| {
        config.is_audit_tracked(property) && config.version() != Some(property)
    };

    let mut entries = Vec::new();
    match operation {
        Operation::Update => {
            for (property, change) in dto.property_changes() {
                if !tracked(property) {
                    continue;
                }
                match (&change.old, &change.new) {
                    (Value::List(_), _) | (_, Value::List(_)) => {
                        let old = change.old.as_list().unwrap_or(&[]);
                        let new = change.new.as_list().unwrap_or(&[]);
                        for removed in old.iter().filter(|v| !new.contains(*v)) {
                            entries.push(entry(property, render(removed), None));
                        }
                        for added in new.iter().filter(|v| !old.contains(*v)) {
                            entries.push(entry(property, None, render(added)));
                        }
                    }
                    (old, new) => entries.push(entry(property, render(old), render(new))),
                }
            }
        }
        Operation::Add | Operation::Delete => {
            for (property, value) in dto.properties() {
                if value.is_null() || !tracked(property) {
                    continue;
                }
                let values = match value {
                    Value::List(items) => items.as_slice(),
                    scalar => std::slice::from_ref(scalar),
                };
                for value in values {
                    if operation == Operation::Add {
                        entries.push(entry(property, None, render(value)));
                    } else {
                        entries.push(entry(property, render(value), None));
                    }
                }
            }
        }
    }
    entries
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Text(text) => Some(text.clone()),
        Value::List(_) => serde_json::to_string(value).ok(),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TypeConfig {
        TypeConfig::new("Customer")
            .audited()
            .audit_exclude("password")
            .version_property("version")
    }

    #[test]
    fn test_update_emits_one_entry_per_changed_scalar() {
        let mut dto = Dto::persisted("Customer", 1)
            .with("name", "A")
            .with("password", "x")
            .with("version", 2);
        dto.set("name", "B");
        dto.set("password", "y");

        let entries = entries_for(&config(), &dto, Operation::Update, "t1", "alice");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].property_name, "name");
        assert_eq!(entries[0].old_value.as_deref(), Some("A"));
        assert_eq!(entries[0].new_value.as_deref(), Some("B"));
        assert_eq!(entries[0].transaction_id, "t1");
        assert_eq!(entries[0].create_id, "alice");
    }

    #[test]
    fn test_list_membership_changes() {
        let mut dto = Dto::persisted("Customer", 1).with(
            "tags",
            vec![Value::from("a"), Value::from("b")],
        );
        dto.set("tags", vec![Value::from("b"), Value::from("c")]);

        let entries = entries_for(&config(), &dto, Operation::Update, "t", "u");
        let pairs: Vec<(Option<&str>, Option<&str>)> = entries
            .iter()
            .map(|e| (e.old_value.as_deref(), e.new_value.as_deref()))
            .collect();
        assert_eq!(pairs, vec![(Some("a"), None), (None, Some("c"))]);
    }

    #[test]
    fn test_add_and_delete_enumerate_values() {
        let dto = Dto::new("Customer")
            .with("name", "Ada")
            .with("nickname", Value::Null)
            .with("version", 1);

        let added = entries_for(&config(), &dto, Operation::Add, "t", "u");
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].new_value.as_deref(), Some("Ada"));
        assert_eq!(added[0].old_value, None);

        let deleted = entries_for(&config(), &dto, Operation::Delete, "t", "u");
        assert_eq!(deleted[0].old_value.as_deref(), Some("Ada"));
        assert_eq!(deleted[0].new_value, None);
    }

    #[test]
    fn test_unaudited_type_records_nothing() {
        let mut dto = Dto::persisted("Customer", 1).with("name", "A");
        dto.set("name", "B");
        let entries = entries_for(&TypeConfig::new("Customer"), &dto, Operation::Update, "t", "u");
        assert!(entries.is_empty());
    }
}
