// ============================================================================
// Query Dispatch Table
// ============================================================================
//
// Per entity type, a map from query token to the definition that binds
// parameters and names the statement. Standard tokens come from default
// entity mapping and are rebuilt whenever the type registry changes;
// explicitly registered tokens override them and survive rebuilds.
//
// ============================================================================

pub mod token;

pub use token::QueryToken;

use crate::core::{EngineError, Params, Result, Value};
use crate::entity::Dto;
use crate::registry::TypeConfig;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, error};

/// What a statement does, and how the store should answer it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    SelectOne,
    SelectList,
    Insert,
    Update,
    Delete,
}

impl QueryKind {
    pub fn is_write(&self) -> bool {
        matches!(self, QueryKind::Insert | QueryKind::Update | QueryKind::Delete)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKind::SelectOne => write!(f, "SELECT ONE"),
            QueryKind::SelectList => write!(f, "SELECT LIST"),
            QueryKind::Insert => write!(f, "INSERT"),
            QueryKind::Update => write!(f, "UPDATE"),
            QueryKind::Delete => write!(f, "DELETE"),
        }
    }
}

pub type Binder = Arc<dyn Fn(&Dto, &TypeConfig) -> Params + Send + Sync>;

/// Statement text plus the callback that binds its parameters from an
/// entity or a query-criteria holder.
#[derive(Clone)]
pub struct QueryDefinition {
    kind: QueryKind,
    statement: String,
    binder: Binder,
}

impl QueryDefinition {
    pub fn new<F>(kind: QueryKind, statement: impl Into<String>, binder: F) -> Self
    where
        F: Fn(&Dto, &TypeConfig) -> Params + Send + Sync + 'static,
    {
        Self {
            kind,
            statement: statement.into(),
            binder: Arc::new(binder),
        }
    }

    /// Binds the named properties of the criteria, in order. Missing
    /// properties bind as NULL.
    pub fn by_properties(kind: QueryKind, statement: impl Into<String>, fields: &[&str]) -> Self {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        Self::new(kind, statement, move |dto, _| {
            fields
                .iter()
                .map(|field| (field.clone(), dto.get(field).cloned().unwrap_or(Value::Null)))
                .collect()
        })
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn bind(&self, dto: &Dto, config: &TypeConfig) -> Params {
        (self.binder)(dto, config)
    }
}

impl fmt::Debug for QueryDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDefinition")
            .field("kind", &self.kind)
            .field("statement", &self.statement)
            .finish_non_exhaustive()
    }
}

struct QueryTable {
    generation: u64,
    queries: HashMap<QueryToken, QueryDefinition>,
}

#[derive(Default)]
pub struct DispatchTable {
    tables: RwLock<HashMap<String, Arc<QueryTable>>>,
    custom: RwLock<HashMap<String, HashMap<QueryToken, QueryDefinition>>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a query for a type.
    pub fn register(&self, type_name: &str, token: QueryToken, definition: QueryDefinition) -> Result<()> {
        debug!(type_name, token = %token, kind = %definition.kind, "registering query");
        self.custom
            .write()?
            .entry(type_name.to_string())
            .or_default()
            .insert(token, definition);
        self.tables.write()?.remove(type_name);
        Ok(())
    }

    /// The definition registered for `token`. An unknown token is a
    /// configuration error.
    pub fn resolve(
        &self,
        config: &TypeConfig,
        generation: u64,
        token: &QueryToken,
    ) -> Result<QueryDefinition> {
        let table = self.table_for(config, generation)?;
        table.queries.get(token).cloned().ok_or_else(|| {
            let message = format!(
                "no query registered for {} under token '{}'",
                config.name(),
                token
            );
            error!("{message}");
            EngineError::Configuration(message)
        })
    }

    pub fn tokens(&self, config: &TypeConfig, generation: u64) -> Result<Vec<QueryToken>> {
        let mut tokens: Vec<QueryToken> = self
            .table_for(config, generation)?
            .queries
            .keys()
            .cloned()
            .collect();
        tokens.sort();
        Ok(tokens)
    }

    fn table_for(&self, config: &TypeConfig, generation: u64) -> Result<Arc<QueryTable>> {
        if let Some(table) = self.tables.read()?.get(config.name()) {
            if table.generation == generation {
                return Ok(table.clone());
            }
        }

        let mut queries = if config.has_default_mapping() {
            default_queries(config)
        } else {
            HashMap::new()
        };
        if let Some(custom) = self.custom.read()?.get(config.name()) {
            for (token, definition) in custom {
                queries.insert(token.clone(), definition.clone());
            }
        }

        debug!(type_name = config.name(), queries = queries.len(), "built query table");
        let table = Arc::new(QueryTable { generation, queries });
        self.tables
            .write()?
            .insert(config.name().to_string(), table.clone());
        Ok(table)
    }
}

fn bind_primary_key(dto: &Dto, config: &TypeConfig) -> Params {
    vec![(
        config.primary_key_column().to_string(),
        dto.primary_key().cloned().unwrap_or(Value::Null),
    )]
}

fn default_queries(config: &TypeConfig) -> HashMap<QueryToken, QueryDefinition> {
    let table = config.table_name();
    let pk = config.primary_key_column();
    let mut queries = HashMap::new();

    queries.insert(
        QueryToken::FindByPrimaryKey,
        QueryDefinition::new(
            QueryKind::SelectOne,
            format!("SELECT * FROM {table} WHERE {pk} = :{pk}"),
            bind_primary_key,
        ),
    );
    queries.insert(
        QueryToken::FindAll,
        QueryDefinition::new(QueryKind::SelectList, format!("SELECT * FROM {table}"), |_, _| {
            Vec::new()
        }),
    );
    queries.insert(
        QueryToken::Insert,
        QueryDefinition::new(QueryKind::Insert, format!("INSERT INTO {table}"), bind_primary_key),
    );

    let update = match config.version() {
        Some(version) => format!("UPDATE {table} WHERE {pk} = :{pk} AND {version} = :{version}"),
        None => format!("UPDATE {table} WHERE {pk} = :{pk}"),
    };
    queries.insert(
        QueryToken::Update,
        QueryDefinition::new(QueryKind::Update, update, |dto, config| {
            let mut params = bind_primary_key(dto, config);
            if let Some(version) = config.version() {
                let expected = dto.get(version).cloned().unwrap_or(Value::Null);
                params.push((version.to_string(), expected));
            }
            params
        }),
    );
    queries.insert(
        QueryToken::Delete,
        QueryDefinition::new(
            QueryKind::Delete,
            format!("DELETE FROM {table} WHERE {pk} = :{pk}"),
            bind_primary_key,
        ),
    );

    // One "children of parent" list per parent token. Several parents may
    // share a token; the first link whose key the criteria carries wins.
    let mut by_token: HashMap<QueryToken, Vec<(String, String)>> = HashMap::new();
    for link in config.parent_links() {
        if link.token.is_standard() {
            continue;
        }
        by_token
            .entry(link.token.clone())
            .or_default()
            .push((link.parent_type.clone(), link.column.clone()));
    }
    for (token, links) in by_token {
        let statement = format!(
            "SELECT * FROM {table} WHERE {} = :{}",
            links[0].1, links[0].1
        );
        queries.insert(
            token,
            QueryDefinition::new(QueryKind::SelectList, statement, move |criteria, _| {
                let (_, column, key) = links
                    .iter()
                    .find_map(|(parent, column)| {
                        criteria
                            .foreign_key(parent)
                            .map(|key| (parent, column, key.clone()))
                    })
                    .unwrap_or((&links[0].0, &links[0].1, Value::Null));
                vec![(column.clone(), key)]
            }),
        );
    }

    queries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeRegistry;

    #[test]
    fn test_default_mapping_tokens() {
        let registry = TypeRegistry::new();
        registry.register("Order", "OrderLine", "lines").unwrap();
        let dispatch = DispatchTable::new();

        let line = registry.config_of("OrderLine").unwrap();
        let tokens = dispatch.tokens(&line, registry.generation()).unwrap();
        assert!(tokens.contains(&QueryToken::FindByPrimaryKey));
        assert!(tokens.contains(&QueryToken::Insert));
        assert!(tokens.contains(&QueryToken::named("lines")));

        let children = dispatch
            .resolve(&line, registry.generation(), &QueryToken::named("lines"))
            .unwrap();
        let criteria = Dto::criteria("OrderLine").with_foreign_key("Order", 7);
        assert_eq!(
            children.bind(&criteria, &line),
            vec![("order_id".to_string(), Value::from(7))]
        );
    }

    #[test]
    fn test_unknown_token_is_configuration_error() {
        let registry = TypeRegistry::new();
        let dispatch = DispatchTable::new();
        let config = registry.config_of("Order").unwrap();
        let err = dispatch
            .resolve(&config, registry.generation(), &QueryToken::named("by_customer"))
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn test_update_binds_expected_version() {
        let registry = TypeRegistry::new();
        registry
            .register_type(TypeConfig::new("Invoice").version_property("version"))
            .unwrap();
        let dispatch = DispatchTable::new();
        let config = registry.config_of("Invoice").unwrap();

        let update = dispatch
            .resolve(&config, registry.generation(), &QueryToken::Update)
            .unwrap();
        let dto = Dto::persisted("Invoice", 1).with("version", 3);
        assert_eq!(
            update.bind(&dto, &config),
            vec![
                ("id".to_string(), Value::from(1)),
                ("version".to_string(), Value::from(3)),
            ]
        );
    }

    #[test]
    fn test_custom_queries_survive_registry_changes() {
        let registry = TypeRegistry::new();
        let dispatch = DispatchTable::new();
        dispatch
            .register(
                "Customer",
                QueryToken::named("by_name"),
                QueryDefinition::by_properties(QueryKind::SelectList, "SELECT BY NAME", &["name"]),
            )
            .unwrap();

        let config = registry.config_of("Customer").unwrap();
        assert!(dispatch.resolve(&config, registry.generation(), &QueryToken::named("by_name")).is_ok());

        registry.register("Customer", "Address", "addresses").unwrap();
        let config = registry.config_of("Customer").unwrap();
        let by_name = dispatch
            .resolve(&config, registry.generation(), &QueryToken::named("by_name"))
            .unwrap();
        let criteria = Dto::criteria("Customer").with("name", "Ada");
        assert_eq!(by_name.bind(&criteria, &config), vec![("name".to_string(), Value::from("Ada"))]);
    }

    #[test]
    fn test_without_default_mapping_only_custom_tokens() {
        let registry = TypeRegistry::new();
        registry
            .register_type(TypeConfig::new("Report").without_default_mapping())
            .unwrap();
        let dispatch = DispatchTable::new();
        let config = registry.config_of("Report").unwrap();
        assert!(dispatch.tokens(&config, registry.generation()).unwrap().is_empty());
    }
}
