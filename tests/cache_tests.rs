/// Cache tests
///
/// Cache-aside reads, point writes, dependency purges and guarded full loads
/// Run with: cargo test --test cache_tests
mod common;

use common::{Fixture, bag, customer_types, session};
use rustdto::store::StoreRequest;
use rustdto::transaction::TransactionId;
use rustdto::{
    CacheMode, Dto, ErrorKind, InMemoryStore, QueryKind, QueryToken, SessionContext, Store,
    StoreOutcome, TypeConfig, Value,
};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;

fn add_region(fx: &Fixture, name: &str) -> Dto {
    let mut region = Dto::new("Region").with("name", name);
    fx.engine
        .controller("Region")
        .add(&mut region, &session(), &mut bag())
        .unwrap();
    region
}

fn add_customer(fx: &Fixture, name: &str, region: &Dto) -> Dto {
    let mut customer = Dto::new("Customer")
        .with("name", name)
        .with("region_id", region.primary_key().unwrap().clone());
    fx.engine
        .controller("Customer")
        .add(&mut customer, &session(), &mut bag())
        .unwrap();
    customer
}

#[test]
fn test_saved_entity_is_served_from_cache() {
    let fx = Fixture::new(customer_types);
    let north = add_region(&fx, "north");
    let customer = add_customer(&fx, "Ada", &north);
    let key = customer.primary_key().unwrap().clone();
    assert_eq!(fx.engine.cache().len("Customer").unwrap(), 1);

    fx.store.clear_journal().unwrap();
    let customers = fx.engine.controller("Customer");
    let found = customers.find_by_primary_key(key.clone(), &session(), &mut bag()).unwrap();
    assert_eq!(found.get("name"), Some(&Value::from("Ada")));
    assert_eq!(fx.reads_of("customer"), 0);
    assert!(fx.engine.cache_stats().hits >= 1);
}

#[test]
fn test_update_replaces_cached_entry() {
    let fx = Fixture::new(customer_types);
    let north = add_region(&fx, "north");
    let customer = add_customer(&fx, "Ada", &north);
    let key = customer.primary_key().unwrap().clone();
    let customers = fx.engine.controller("Customer");

    let mut loaded = customers.find_by_primary_key(key.clone(), &session(), &mut bag()).unwrap();
    loaded.set("name", "Grace");
    customers.update(&mut loaded, &session(), &mut bag()).unwrap();

    fx.store.clear_journal().unwrap();
    let found = customers.find_by_primary_key(key, &session(), &mut bag()).unwrap();
    assert_eq!(found.get("name"), Some(&Value::from("Grace")));
    assert_eq!(fx.reads_of("customer"), 0);
}

#[test]
fn test_dependency_write_purges_dependent_cache() {
    let fx = Fixture::new(customer_types);
    let north = add_region(&fx, "north");
    let customer = add_customer(&fx, "Ada", &north);
    let key = customer.primary_key().unwrap().clone();
    let customers = fx.engine.controller("Customer");
    let regions = fx.engine.controller("Region");

    // The entry written by the add already records the dependency
    assert_eq!(
        fx.engine.cache().dependents_of("Region").unwrap(),
        vec!["Customer".to_string()]
    );
    fx.store.clear_journal().unwrap();
    let found = customers.find_by_primary_key(key.clone(), &session(), &mut bag()).unwrap();
    assert_eq!(fx.reads_of("customer"), 0);
    assert_eq!(
        found.reference("region_id").and_then(|r| r.get("name")),
        Some(&Value::from("north"))
    );

    let mut region = regions
        .find_by_primary_key(north.primary_key().unwrap().clone(), &session(), &mut bag())
        .unwrap();
    region.set("name", "boreal");
    regions.update(&mut region, &session(), &mut bag()).unwrap();
    assert_eq!(fx.engine.cache().len("Customer").unwrap(), 0);

    fx.store.clear_journal().unwrap();
    let reloaded = customers.find_by_primary_key(key, &session(), &mut bag()).unwrap();
    assert_eq!(fx.reads_of("customer"), 1);
    assert_eq!(
        reloaded.reference("region_id").and_then(|r| r.get("name")),
        Some(&Value::from("boreal"))
    );
}

#[test]
fn test_lookup_map_loads_once() {
    let fx = Fixture::new(customer_types);
    add_region(&fx, "north");
    add_region(&fx, "south");
    let regions = fx.engine.controller("Region");

    // Writes before the first load do not initialize the map
    assert!(!fx.engine.cache().is_initialized("Region").unwrap());

    fx.store.clear_journal().unwrap();
    let all = regions
        .find_by_query_list(QueryToken::FindAll, &Dto::criteria("Region"), &session(), &mut bag())
        .unwrap();
    assert_eq!(all.len(), 2);
    let south = regions.find_by_primary_key(2, &session(), &mut bag()).unwrap();
    assert_eq!(south.get("name"), Some(&Value::from("south")));
    assert_eq!(fx.reads_of("region"), 1);

    // Point write after load touches one key only; the only extra read is
    // the write re-reading its own row
    add_region(&fx, "east");
    assert_eq!(fx.engine.cache().len("Region").unwrap(), 3);
    assert_eq!(fx.reads_of("region"), 2);
}

#[test]
fn test_failed_full_load_marks_type_initialized_empty() {
    let fx = Fixture::new(customer_types);
    add_region(&fx, "north");
    fx.store.fail_next("region", QueryKind::SelectList).unwrap();
    let regions = fx.engine.controller("Region");

    let err = regions
        .find_by_query_list(QueryToken::FindAll, &Dto::criteria("Region"), &session(), &mut bag())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Store);
    assert!(fx.engine.cache().is_initialized("Region").unwrap());
    assert_eq!(fx.engine.cache().len("Region").unwrap(), 0);

    let err = regions.find_by_primary_key(1, &session(), &mut bag()).unwrap_err();
    assert!(err.is_not_found());

    fx.engine.cache().purge("Region").unwrap();
    assert!(regions.find_by_primary_key(1, &session(), &mut bag()).is_ok());
}

#[test]
fn test_rolled_back_write_leaves_cache_untouched() {
    let fx = Fixture::new(customer_types);
    let north = add_region(&fx, "north");
    let customer = add_customer(&fx, "Ada", &north);
    let key = customer.primary_key().unwrap().clone();
    let customers = fx.engine.controller("Customer");

    let mut loaded = customers.find_by_primary_key(key.clone(), &session(), &mut bag()).unwrap();
    loaded.set("name", "Grace");
    fx.store.fail_next("customer", QueryKind::Update).unwrap();
    assert!(customers.update(&mut loaded, &session(), &mut bag()).is_err());
    assert_eq!(loaded.get("name"), Some(&Value::from("Grace")));

    let cached = fx.engine.cache().get("Customer", &key).unwrap().unwrap();
    assert_eq!(cached.get("name"), Some(&Value::from("Ada")));
}

/// Holds the result of the first `kind` read of `table` until released.
struct GatedStore {
    inner: InMemoryStore,
    table: &'static str,
    kind: QueryKind,
    entered: Mutex<Option<Sender<()>>>,
    release: Mutex<Receiver<()>>,
}

impl GatedStore {
    fn new(table: &'static str, kind: QueryKind) -> (Arc<Self>, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        let store = Arc::new(Self {
            inner: InMemoryStore::new(),
            table,
            kind,
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
        });
        (store, entered_rx, release_tx)
    }
}

impl Store for GatedStore {
    fn execute(&self, request: &StoreRequest<'_>, session: &SessionContext) -> rustdto::Result<StoreOutcome> {
        let outcome = self.inner.execute(request, session)?;
        if request.table == self.table && request.kind == self.kind {
            let entered = self.entered.lock().unwrap().take();
            if let Some(entered) = entered {
                entered.send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
        }
        Ok(outcome)
    }

    fn allocate_key(&self, sequence: &str) -> rustdto::Result<Value> {
        self.inner.allocate_key(sequence)
    }

    fn begin(&self) -> rustdto::Result<TransactionId> {
        self.inner.begin()
    }

    fn commit(&self, transaction: TransactionId) -> rustdto::Result<()> {
        self.inner.commit(transaction)
    }

    fn rollback(&self, transaction: TransactionId) -> rustdto::Result<()> {
        self.inner.rollback(transaction)
    }
}

#[test]
fn test_concurrent_initialization_fails_fast() {
    let (store, entered_rx, release_tx) = GatedStore::new("region", QueryKind::SelectList);
    let mut row = rustdto::Row::new();
    row.insert("id".to_string(), Value::from(1));
    row.insert("name".to_string(), Value::from("north"));
    store.inner.insert_row("region", row).unwrap();

    let engine = rustdto::Engine::builder(store.clone())
        .register_type(TypeConfig::new("Region").cached(CacheMode::LookupMap))
        .build()
        .unwrap();

    let loader = {
        let engine = engine.clone();
        thread::spawn(move || {
            engine
                .controller("Region")
                .find_by_primary_key(1, &session(), &mut bag())
        })
    };

    entered_rx.recv().unwrap();
    let err = engine
        .controller("Region")
        .find_by_primary_key(1, &session(), &mut bag())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    release_tx.send(()).unwrap();
    let loaded = loader.join().unwrap().unwrap();
    assert_eq!(loaded.get("name"), Some(&Value::from("north")));
    assert!(engine.cache().is_initialized("Region").unwrap());
}

#[test]
fn test_read_fill_overtaken_by_committed_write_is_dropped() {
    let (store, entered_rx, release_tx) = GatedStore::new("item", QueryKind::SelectOne);
    let mut row = rustdto::Row::new();
    row.insert("id".to_string(), Value::from(1));
    row.insert("label".to_string(), Value::from("A"));
    store.inner.insert_row("item", row).unwrap();

    let engine = rustdto::Engine::builder(store.clone())
        .register_type(TypeConfig::new("Item").cached(CacheMode::PerEntity))
        .build()
        .unwrap();

    // The reader has seen "A" but not yet filled the cache
    let reader = {
        let engine = engine.clone();
        thread::spawn(move || {
            engine
                .controller("Item")
                .find_by_primary_key(1, &session(), &mut bag())
        })
    };
    entered_rx.recv().unwrap();

    let items = engine.controller("Item");
    let mut item = Dto::persisted("Item", 1);
    item.set("label", "B");
    items.update(&mut item, &session(), &mut bag()).unwrap();
    let cached = engine.cache().get("Item", &Value::from(1)).unwrap().unwrap();
    assert_eq!(cached.get("label"), Some(&Value::from("B")));

    release_tx.send(()).unwrap();
    let stale = reader.join().unwrap().unwrap();
    assert_eq!(stale.get("label"), Some(&Value::from("A")));

    let found = items.find_by_primary_key(1, &session(), &mut bag()).unwrap();
    assert_eq!(found.get("label"), Some(&Value::from("B")));
    assert_eq!(
        store.inner.rows("item").unwrap()[0].get("label"),
        Some(&Value::from("B"))
    );
}

#[test]
fn test_dependency_write_drops_fills_in_flight() {
    let (store, entered_rx, release_tx) = GatedStore::new("region", QueryKind::SelectList);
    let engine = customer_types(rustdto::Engine::builder(store.clone()))
        .build()
        .unwrap();
    let mut region = rustdto::Row::new();
    region.insert("id".to_string(), Value::from(1));
    region.insert("name".to_string(), Value::from("north"));
    store.inner.insert_row("region", region).unwrap();
    let mut customer = rustdto::Row::new();
    customer.insert("id".to_string(), Value::from(1));
    customer.insert("name".to_string(), Value::from("Ada"));
    customer.insert("region_id".to_string(), Value::from(1));
    store.inner.insert_row("customer", customer).unwrap();

    // The reader has resolved region "north" but cached nothing yet
    let reader = {
        let engine = engine.clone();
        thread::spawn(move || {
            engine
                .controller("Customer")
                .find_by_primary_key(1, &session(), &mut bag())
        })
    };
    entered_rx.recv().unwrap();

    let mut renamed = Dto::persisted("Region", 1);
    renamed.set("name", "boreal");
    engine
        .controller("Region")
        .update(&mut renamed, &session(), &mut bag())
        .unwrap();

    release_tx.send(()).unwrap();
    let stale = reader.join().unwrap().unwrap();
    assert_eq!(
        stale.reference("region_id").and_then(|r| r.get("name")),
        Some(&Value::from("north"))
    );
    assert!(!engine.cache().is_initialized("Region").unwrap());
    assert!(engine.cache().get("Customer", &Value::from(1)).unwrap().is_none());

    let found = engine
        .controller("Customer")
        .find_by_primary_key(1, &session(), &mut bag())
        .unwrap();
    assert_eq!(
        found.reference("region_id").and_then(|r| r.get("name")),
        Some(&Value::from("boreal"))
    );
}
