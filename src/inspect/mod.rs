// dbsync/src/inspect/mod.rs
pub(crate) mod mysql;
pub(crate) mod sql;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::config::{Environment, Role};
use crate::errors::Result;
use crate::sync::SyncContext;
use crate::tunnel::{TunnelSpec, with_tunnel};

pub use mysql::MySqlConnector;

const DEFAULT_MYSQL_PORT: u16 = 3306;

/// What one table of a source looks like at inspection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<String>,
    /// Largest primary key value; `None` for empty tables, tables without a
    /// single-column key, or when the aggregate failed.
    pub max_id: Option<i64>,
}

impl TableInfo {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Where a catalog connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Socket(PathBuf),
}

impl Endpoint {
    /// Reach an environment without a tunnel.
    pub fn direct(env: &Environment) -> Self {
        match &env.socket {
            Some(socket) => Endpoint::Socket(socket.clone()),
            None => Endpoint::Tcp {
                host: env.host().to_string(),
                port: env.port.unwrap_or(DEFAULT_MYSQL_PORT),
            },
        }
    }

    /// The local end of a tunnel.
    pub fn tunneled(local_port: u16) -> Self {
        Endpoint::Tcp {
            host: "127.0.0.1".to_string(),
            port: local_port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Socket(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Read-only queries against one database.
#[async_trait]
pub trait Catalog: Send {
    async fn tables(&mut self) -> Result<Vec<String>>;

    async fn columns(&mut self, table: &str) -> Result<Vec<String>>;

    /// Table → key column, for tables whose primary key is a single column.
    async fn primary_keys(&mut self) -> Result<BTreeMap<String, String>>;

    async fn max_value(&mut self, table: &str, column: &str) -> Result<Option<i64>>;

    /// `MAX(column)` for every `(table, column)` pair in one round trip.
    async fn max_values(
        &mut self,
        keys: &[(String, String)],
    ) -> Result<BTreeMap<String, Option<i64>>>;

    async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait CatalogConnector: Send + Sync {
    async fn connect(&self, env: &Environment, endpoint: &Endpoint) -> Result<Box<dyn Catalog>>;
}

/// Closes `catalog` and hands back `result`. A failed close is only logged.
pub(crate) async fn release<T>(catalog: Box<dyn Catalog>, result: Result<T>) -> Result<T> {
    if let Err(e) = catalog.close().await {
        tracing::warn!("Failed to close database connection: {}", e);
    }
    result
}

/// Columns and max key of every table of `source_name`, read through a tunnel.
///
/// The map belongs to the caller; nothing is cached between calls.
pub async fn inspect(ctx: &SyncContext, source_name: &str) -> Result<BTreeMap<String, TableInfo>> {
    let source = ctx.registry.get(source_name, Role::Source)?;
    let spec = TunnelSpec::for_source(source, &ctx.settings);

    with_tunnel(ctx.tunnels.as_ref(), &spec, &ctx.cancel, |port| async move {
        let mut catalog = ctx
            .catalogs
            .connect(source, &Endpoint::tunneled(port))
            .await?;
        let collected = collect_table_info(catalog.as_mut()).await;
        release(catalog, collected).await
    })
    .await
}

async fn collect_table_info(catalog: &mut dyn Catalog) -> Result<BTreeMap<String, TableInfo>> {
    let tables = catalog.tables().await?;
    let keys = catalog.primary_keys().await?;
    tracing::info!("Inspecting {} tables", tables.len());

    let mut infos = BTreeMap::new();
    for table in tables {
        let columns = catalog.columns(&table).await?;
        let max_id = match keys.get(&table) {
            Some(key) => match catalog.max_value(&table, key).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("Could not read max {} of {}: {}", key, table, e);
                    None
                }
            },
            None => {
                tracing::debug!("{} has no single-column primary key", table);
                None
            }
        };
        infos.insert(
            table.clone(),
            TableInfo {
                name: table,
                columns,
                max_id,
            },
        );
    }
    Ok(infos)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::errors::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Default)]
    pub(crate) struct FakeTable {
        pub columns: Vec<String>,
        pub key: Option<String>,
        pub max: Option<i64>,
        pub fail_max: bool,
    }

    impl FakeTable {
        pub fn new(columns: &[&str], max: Option<i64>) -> Self {
            FakeTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                key: Some("id".to_string()),
                max,
                fail_max: false,
            }
        }
    }

    #[derive(Debug, Clone, Default)]
    pub(crate) struct FakeDatabase {
        pub tables: BTreeMap<String, FakeTable>,
    }

    impl FakeDatabase {
        pub fn with(mut self, name: &str, table: FakeTable) -> Self {
            self.tables.insert(name.to_string(), table);
            self
        }
    }

    /// Serves in-memory databases keyed by environment name.
    #[derive(Default, Clone)]
    pub(crate) struct FakeConnector {
        pub databases: BTreeMap<String, FakeDatabase>,
        pub connections: Arc<Mutex<Vec<(String, Endpoint)>>>,
        pub closed: Arc<AtomicUsize>,
    }

    impl FakeConnector {
        pub fn with(mut self, env: &str, db: FakeDatabase) -> Self {
            self.databases.insert(env.to_string(), db);
            self
        }

        pub fn close_count(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct FakeCatalog {
        db: FakeDatabase,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CatalogConnector for FakeConnector {
        async fn connect(&self, env: &Environment, endpoint: &Endpoint) -> Result<Box<dyn Catalog>> {
            self.connections
                .lock()
                .unwrap()
                .push((env.name.clone(), endpoint.clone()));
            let db = self
                .databases
                .get(&env.name)
                .cloned()
                .ok_or_else(|| AppError::Inspection(format!("cannot reach {}", env.name)))?;
            Ok(Box::new(FakeCatalog {
                db,
                closed: self.closed.clone(),
            }))
        }
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn tables(&mut self) -> Result<Vec<String>> {
            Ok(self.db.tables.keys().cloned().collect())
        }

        async fn columns(&mut self, table: &str) -> Result<Vec<String>> {
            Ok(self.db.tables[table].columns.clone())
        }

        async fn primary_keys(&mut self) -> Result<BTreeMap<String, String>> {
            Ok(self
                .db
                .tables
                .iter()
                .filter_map(|(name, t)| t.key.clone().map(|k| (name.clone(), k)))
                .collect())
        }

        async fn max_value(&mut self, table: &str, _column: &str) -> Result<Option<i64>> {
            let t = &self.db.tables[table];
            if t.fail_max {
                return Err(AppError::Inspection(format!("MAX on {} failed", table)));
            }
            Ok(t.max)
        }

        async fn max_values(
            &mut self,
            keys: &[(String, String)],
        ) -> Result<BTreeMap<String, Option<i64>>> {
            Ok(keys
                .iter()
                .map(|(table, _)| (table.clone(), self.db.tables[table].max))
                .collect())
        }

        async fn close(self: Box<Self>) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
