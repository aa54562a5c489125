#![allow(dead_code)]

use rustdto::store::JournalEntry;
use rustdto::{
    CacheMode, ChildRelationship, Dto, Engine, EngineBuilder, InMemoryStore, KeyGeneration,
    MemoryAuditSink, PropertyBag, QueryKind, ReferenceField, SessionContext, TypeConfig,
};
use std::sync::Arc;

pub struct Fixture {
    pub engine: Engine,
    pub store: Arc<InMemoryStore>,
    pub audit: Arc<MemoryAuditSink>,
}

impl Fixture {
    pub fn new(configure: impl FnOnce(EngineBuilder) -> EngineBuilder) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self::with_store(store, configure)
    }

    pub fn with_store(
        store: Arc<InMemoryStore>,
        configure: impl FnOnce(EngineBuilder) -> EngineBuilder,
    ) -> Self {
        let audit = Arc::new(MemoryAuditSink::new());
        let builder = Engine::builder(store.clone()).audit_sink(audit.clone());
        let engine = configure(builder).build().unwrap();
        Self { engine, store, audit }
    }

    /// (kind, table) of every write the store has seen, in order.
    pub fn writes(&self) -> Vec<(QueryKind, String)> {
        self.store
            .writes()
            .unwrap()
            .into_iter()
            .map(|JournalEntry { kind, table, .. }| (kind, table))
            .collect()
    }

    /// Number of reads the store has answered for `table`.
    pub fn reads_of(&self, table: &str) -> usize {
        self.store
            .journal()
            .unwrap()
            .iter()
            .filter(|entry| !entry.kind.is_write() && entry.table == table)
            .count()
    }
}

pub fn session() -> SessionContext {
    SessionContext::for_user("alice")
}

pub fn bag() -> PropertyBag {
    PropertyBag::new()
}

/// Order -> lines (add 1, delete 2, auto-retrieved), Order -> shipments
/// (add 2, delete 1). Orders are audited.
pub fn order_types(builder: EngineBuilder) -> EngineBuilder {
    builder
        .register_type(
            TypeConfig::new("Order")
                .key_generation(KeyGeneration::Sequence("order_seq".to_string()))
                .audited()
                .child(
                    ChildRelationship::new("OrderLine", "lines")
                        .add_order(1)
                        .delete_order(2)
                        .auto_retrieve(),
                )
                .child(
                    ChildRelationship::new("Shipment", "shipments")
                        .add_order(2)
                        .delete_order(1),
                ),
        )
        .register_type(
            TypeConfig::new("OrderLine").key_generation(KeyGeneration::Sequence("line_seq".to_string())),
        )
        .register_type(
            TypeConfig::new("Shipment")
                .key_generation(KeyGeneration::Sequence("shipment_seq".to_string()))
                .audited(),
        )
}

/// Customer (cached per entity) references Region (cached lookup map).
pub fn customer_types(builder: EngineBuilder) -> EngineBuilder {
    builder
        .register_type(
            TypeConfig::new("Region")
                .key_generation(KeyGeneration::Sequence("region_seq".to_string()))
                .cached(CacheMode::LookupMap),
        )
        .register_type(
            TypeConfig::new("Customer")
                .key_generation(KeyGeneration::Sequence("customer_seq".to_string()))
                .cached(CacheMode::PerEntity)
                .reference(ReferenceField::new("region_id", "Region").not_found_allowed()),
        )
}

pub fn new_order(customer: &str) -> Dto {
    let mut order = Dto::new("Order");
    order.set("customer", customer);
    order
}

pub fn new_line(sku: &str, quantity: i64) -> Dto {
    Dto::new("OrderLine").with("sku", sku).with("quantity", quantity)
}
