/// Transaction and audit tests
///
/// One transaction per outer call, rollback of partial cascades, and
/// property-level audit entries recorded before the commit
/// Run with: cargo test --test transaction_audit_tests
mod common;

use common::{Fixture, bag, new_line, new_order, order_types, session};
use rustdto::{Dto, DtoState, ErrorKind, KeyGeneration, QueryKind, TypeConfig, Value};
use std::collections::HashSet;

fn person_types(builder: rustdto::EngineBuilder) -> rustdto::EngineBuilder {
    builder.register_type(
        TypeConfig::new("Person")
            .key_generation(KeyGeneration::Uuid)
            .audited()
            .audit_exclude("last_seen"),
    )
}

#[test]
fn test_update_records_one_entry_per_changed_property() {
    let fx = Fixture::new(person_types);
    let people = fx.engine.controller("Person");

    let mut person = Dto::new("Person").with("name", "A").with("city", "Oslo");
    people.add(&mut person, &session(), &mut bag()).unwrap();
    let audit_id = person.audit_id().unwrap().to_string();
    fx.audit.clear().unwrap();

    let key = person.primary_key().unwrap().clone();
    let mut loaded = people.find_by_primary_key(key, &session(), &mut bag()).unwrap();
    assert_eq!(loaded.audit_id(), Some(audit_id.as_str()));
    loaded.set("name", "B");
    loaded.set("last_seen", "today");
    people.update(&mut loaded, &session(), &mut bag()).unwrap();

    let entries = fx.audit.entries().unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.class_name, "Person");
    assert_eq!(entry.property_name, "name");
    assert_eq!(entry.old_value.as_deref(), Some("A"));
    assert_eq!(entry.new_value.as_deref(), Some("B"));
    assert_eq!(entry.create_id, "alice");
    assert_eq!(entry.audit_id, audit_id);
}

#[test]
fn test_field_set_back_to_original_is_not_audited() {
    let fx = Fixture::new(person_types);
    let people = fx.engine.controller("Person");

    let mut person = Dto::new("Person").with("name", "A");
    people.add(&mut person, &session(), &mut bag()).unwrap();
    fx.audit.clear().unwrap();

    person.set("name", "B");
    person.set("name", "A");
    assert_eq!(person.state(), DtoState::Updated);
    assert!(person.property_changes().is_empty());
    people.update(&mut person, &session(), &mut bag()).unwrap();
    assert!(fx.audit.entries().unwrap().is_empty());
}

#[test]
fn test_entries_of_one_call_share_a_transaction_id() {
    let fx = Fixture::new(order_types);
    let orders = fx.engine.controller("Order");

    let mut order = new_order("Ada")
        .with_child("shipments", Dto::new("Shipment").with("carrier", "post"))
        .with_child("shipments", Dto::new("Shipment").with("carrier", "rail"))
        .with_child("lines", new_line("X-1", 1));
    orders.add(&mut order, &session(), &mut bag()).unwrap();

    let entries = fx.audit.entries().unwrap();
    // Order.customer plus one carrier per shipment; lines are not audited
    assert_eq!(entries.len(), 3);
    assert_eq!(fx.audit.batches().unwrap(), 1);
    let transactions: HashSet<&str> = entries.iter().map(|e| e.transaction_id.as_str()).collect();
    assert_eq!(transactions.len(), 1);
    assert!(entries.iter().all(|e| e.old_value.is_none()));

    let shipments = fx.audit.entries_for("Shipment").unwrap();
    let audit_ids: HashSet<&str> = shipments.iter().map(|e| e.audit_id.as_str()).collect();
    assert_eq!(audit_ids.len(), 2);

    // A second call gets its own transaction id
    fx.audit.clear().unwrap();
    order.mark_deleted();
    orders.delete(&mut order, &session(), &mut bag()).unwrap();
    let deleted = fx.audit.entries().unwrap();
    assert_eq!(deleted.len(), 3);
    assert!(deleted.iter().all(|e| e.new_value.is_none()));
    assert!(!transactions.contains(deleted[0].transaction_id.as_str()));
}

#[test]
fn test_failed_child_insert_rolls_back_the_whole_call() {
    let fx = Fixture::new(order_types);
    let orders = fx.engine.controller("Order");
    fx.store.fail_next("orderline", QueryKind::Insert).unwrap();

    let mut order = new_order("Ada")
        .with_child("lines", new_line("X-1", 1))
        .with_child("lines", new_line("X-2", 2));
    let before = order.clone();
    let err = orders.add(&mut order, &session(), &mut bag()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Store);
    assert!(matches!(err, rustdto::EngineError::Cascade { .. }));
    assert_eq!(fx.store.row_count("order").unwrap(), 0);
    assert_eq!(fx.store.row_count("orderline").unwrap(), 0);
    assert!(fx.audit.entries().unwrap().is_empty());
    assert_eq!(fx.store.active_transactions().unwrap(), 0);
    assert_eq!(order, before);

    // The restored entity can be submitted again
    orders.add(&mut order, &session(), &mut bag()).unwrap();
    assert_eq!(fx.store.row_count("order").unwrap(), 1);
    assert_eq!(fx.store.row_count("orderline").unwrap(), 2);
}

#[test]
fn test_audit_sink_failure_aborts_the_call() {
    let fx = Fixture::new(order_types);
    let orders = fx.engine.controller("Order");
    fx.audit.fail_next();

    let mut order = new_order("Ada").with_child("lines", new_line("X-1", 1));
    let err = orders.add(&mut order, &session(), &mut bag()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Audit);
    assert_eq!(fx.store.row_count("order").unwrap(), 0);
    assert_eq!(fx.store.row_count("orderline").unwrap(), 0);
    assert_eq!(fx.store.active_transactions().unwrap(), 0);
    assert_eq!(order.state(), DtoState::NewModified);
    assert!(order.primary_key().is_none());
}

#[test]
fn test_committed_call_leaves_no_open_transaction() {
    let fx = Fixture::new(order_types);
    let orders = fx.engine.controller("Order");

    let mut order = new_order("Ada").with_child("lines", new_line("X-1", 1));
    orders.add(&mut order, &session(), &mut bag()).unwrap();
    assert_eq!(order.state(), DtoState::Unset);
    assert_eq!(order.children(&"lines".into())[0].state(), DtoState::Unset);
    assert_eq!(fx.store.active_transactions().unwrap(), 0);
    assert_eq!(
        fx.store.rows("order").unwrap()[0].get("customer"),
        Some(&Value::from("Ada"))
    );
}
