/// Policy tests
///
/// Validation rule groups, type-level write permissions and the security
/// checker
/// Run with: cargo test --test policy_tests
mod common;

use common::{Fixture, bag, new_line, new_order, order_types, session};
use rustdto::{
    Dto, ErrorKind, Grant, KeyGeneration, Operation, Permission, PermissionChecker, Permissions,
    Rule, RuleGroup, RuleSetValidator, SessionContext, TypeConfig, Value,
};
use std::sync::Arc;

fn ticket_types(builder: rustdto::EngineBuilder) -> rustdto::EngineBuilder {
    let validator = RuleSetValidator::new()
        .rule("Ticket", RuleGroup::Default, Rule::required("title"))
        .rule("Ticket", RuleGroup::Add, Rule::max_length("title", 10))
        .rule("Ticket", RuleGroup::Update, Rule::range("priority", 1.0, 5.0));
    builder
        .validator(Arc::new(validator))
        .register_type(TypeConfig::new("Ticket").key_generation(KeyGeneration::Uuid))
}

#[test]
fn test_broken_rules_abort_before_any_write() {
    let fx = Fixture::new(ticket_types);
    let tickets = fx.engine.controller("Ticket");

    let mut ticket = Dto::new("Ticket").with("title", "far too long a title");
    let err = tickets.add(&mut ticket, &session(), &mut bag()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let broken = err.broken_rules();
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].rule, "max_length");
    assert_eq!(broken[0].property.as_deref(), Some("title"));
    assert!(fx.writes().is_empty());
    assert!(ticket.primary_key().is_none());
}

#[test]
fn test_rule_groups_follow_the_operation() {
    let fx = Fixture::new(ticket_types);
    let tickets = fx.engine.controller("Ticket");

    // The range rule belongs to the update group only
    let mut ticket = Dto::new("Ticket").with("title", "short").with("priority", 9);
    tickets.add(&mut ticket, &session(), &mut bag()).unwrap();

    ticket.set("title", "");
    let err = tickets.update(&mut ticket, &session(), &mut bag()).unwrap_err();
    let rules: Vec<&str> = err.broken_rules().iter().map(|r| r.rule.as_str()).collect();
    assert_eq!(rules, vec!["required", "range"]);

    // A long title is fine on update
    ticket.set("title", "a title longer than ten");
    ticket.set("priority", 3);
    tickets.update(&mut ticket, &session(), &mut bag()).unwrap();
    assert_eq!(
        fx.store.rows("ticket").unwrap()[0].get("priority"),
        Some(&Value::from(3))
    );
}

#[test]
fn test_read_only_type_rejects_writes() {
    let fx = Fixture::new(|builder| {
        builder.register_type(
            TypeConfig::new("Currency")
                .permissions(Permissions::read_only())
                .key_generation(KeyGeneration::Uuid),
        )
    });
    let currencies = fx.engine.controller("Currency");

    let mut currency = Dto::new("Currency").with("code", "EUR");
    let err = currencies.add(&mut currency, &session(), &mut bag()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert!(fx.writes().is_empty());
}

fn secured_orders(checker: PermissionChecker) -> Fixture {
    Fixture::new(move |builder| order_types(builder).security(Arc::new(checker)))
}

#[test]
fn test_anonymous_session_fails_authentication() {
    let fx = secured_orders(PermissionChecker::new().with_admin("root").unwrap());
    let orders = fx.engine.controller("Order");

    let err = orders
        .find_by_primary_key(1, &SessionContext::anonymous(), &mut bag())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);

    let mut order = new_order("Ada");
    let err = orders
        .add(&mut order, &SessionContext::anonymous(), &mut bag())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[test]
fn test_every_entity_in_the_cascade_is_authorized() {
    let checker = PermissionChecker::new();
    checker.grant("alice", Grant::on(Permission::Add, "Order")).unwrap();
    checker.grant("alice", Grant::on(Permission::Read, "Order")).unwrap();
    let fx = secured_orders(checker);
    let orders = fx.engine.controller("Order");

    let mut order = new_order("Ada").with_child("lines", new_line("X-1", 1));
    let err = orders.add(&mut order, &session(), &mut bag()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert!(matches!(err, rustdto::EngineError::Cascade { .. }));
    assert_eq!(fx.store.row_count("order").unwrap(), 0);

    // Without children only the Order grant is consulted
    let mut order = new_order("Ada");
    orders.add(&mut order, &session(), &mut bag()).unwrap();
    assert_eq!(fx.store.row_count("order").unwrap(), 1);

    let err = orders
        .update(&mut order.clone(), &session(), &mut bag())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
}

#[test]
fn test_read_requires_read_permission() {
    let checker = PermissionChecker::new();
    checker.grant("alice", Grant::any_type(Permission::Add)).unwrap();
    checker.grant("bob", Grant::on(Permission::Read, "Order")).unwrap();
    let fx = secured_orders(checker);
    let orders = fx.engine.controller("Order");

    let mut order = new_order("Ada").with_child("lines", new_line("X-1", 1));
    orders.add(&mut order, &session(), &mut bag()).unwrap();
    let key = order.primary_key().unwrap().clone();

    let err = orders
        .find_by_primary_key(key.clone(), &session(), &mut bag())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    // Only the top-level read is checked; lines hydrate with it
    let found = orders
        .find_by_primary_key(key, &SessionContext::for_user("bob"), &mut bag())
        .unwrap();
    assert_eq!(found.children(&"lines".into()).len(), 1);
}

#[test]
fn test_rule_groups_can_be_replaced_per_type() {
    let validator = RuleSetValidator::new()
        .rule("Memo", RuleGroup::Default, Rule::required("body"))
        .rule("Memo", RuleGroup::Named("draft".to_string()), Rule::max_length("body", 3));
    let fx = Fixture::new(move |builder| {
        builder.validator(Arc::new(validator)).register_type(
            TypeConfig::new("Memo")
                .key_generation(KeyGeneration::Uuid)
                .rule_groups(Operation::Add, vec![RuleGroup::Named("draft".to_string())]),
        )
    });
    let memos = fx.engine.controller("Memo");

    // Default group is not part of the add groups any more
    let mut empty = Dto::new("Memo");
    memos.add(&mut empty, &session(), &mut bag()).unwrap();

    let mut long = Dto::new("Memo").with("body", "long body");
    let err = memos.add(&mut long, &session(), &mut bag()).unwrap_err();
    assert_eq!(err.broken_rules()[0].rule, "max_length");
}
