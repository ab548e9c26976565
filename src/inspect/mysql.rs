// dbsync/src/inspect/mysql.rs
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};
use std::collections::BTreeMap;

use super::{Catalog, CatalogConnector, Endpoint, sql};
use crate::config::Environment;
use crate::errors::{AppError, Result};

fn inspection_error(context: String) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::Inspection(format!("{}: {}", context, e))
}

/// Connects with sqlx.
#[derive(Debug, Clone, Default)]
pub struct MySqlConnector;

pub(crate) fn connect_options(env: &Environment, endpoint: &Endpoint) -> MySqlConnectOptions {
    let options = MySqlConnectOptions::new()
        .username(env.username())
        .password(env.password())
        .database(env.database());
    match endpoint {
        Endpoint::Tcp { host, port } => options.host(host).port(*port),
        Endpoint::Socket(path) => options.socket(path),
    }
}

#[async_trait]
impl CatalogConnector for MySqlConnector {
    async fn connect(&self, env: &Environment, endpoint: &Endpoint) -> Result<Box<dyn Catalog>> {
        tracing::debug!("Connecting to {} at {}", env.name, endpoint);
        let conn = connect_options(env, endpoint)
            .connect()
            .await
            .map_err(inspection_error(format!(
                "failed to connect to '{}' at {}",
                env.name, endpoint
            )))?;
        Ok(Box::new(MySqlCatalog { conn }))
    }
}

pub struct MySqlCatalog {
    conn: MySqlConnection,
}

#[async_trait]
impl Catalog for MySqlCatalog {
    async fn tables(&mut self) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(sql::LIST_TABLES)
            .fetch_all(&mut self.conn)
            .await
            .map_err(inspection_error("failed to list tables".to_string()))
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(sql::LIST_COLUMNS)
            .bind(table)
            .fetch_all(&mut self.conn)
            .await
            .map_err(inspection_error(format!("failed to list columns of {}", table)))
    }

    async fn primary_keys(&mut self) -> Result<BTreeMap<String, String>> {
        let rows = sqlx::query_as::<_, (String, String, String)>(sql::LIST_PRIMARY_KEY_COLUMNS)
            .fetch_all(&mut self.conn)
            .await
            .map_err(inspection_error("failed to read primary keys".to_string()))?;
        Ok(single_column_keys(rows))
    }

    async fn max_value(&mut self, table: &str, column: &str) -> Result<Option<i64>> {
        let query = sql::max_value(table, column);
        sqlx::query_scalar::<_, Option<i64>>(&query)
            .fetch_one(&mut self.conn)
            .await
            .map_err(inspection_error(format!("MAX({}) on {} failed", column, table)))
    }

    async fn max_values(
        &mut self,
        keys: &[(String, String)],
    ) -> Result<BTreeMap<String, Option<i64>>> {
        let Some(query) = sql::max_values(keys) else {
            return Ok(BTreeMap::new());
        };
        let mut statement = sqlx::query_as::<_, (String, Option<i64>)>(&query);
        for (table, _) in keys {
            statement = statement.bind(table.as_str());
        }
        let rows = statement
            .fetch_all(&mut self.conn)
            .await
            .map_err(inspection_error("combined max id query failed".to_string()))?;
        Ok(rows.into_iter().collect())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(inspection_error("failed to close connection".to_string()))
    }
}

/// Keeps tables whose primary key is exactly one integer column.
pub(crate) fn single_column_keys(rows: Vec<(String, String, String)>) -> BTreeMap<String, String> {
    let mut grouped: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for (table, column, data_type) in rows {
        grouped.entry(table).or_default().push((column, data_type));
    }
    grouped
        .into_iter()
        .filter_map(|(table, mut columns)| {
            if columns.len() != 1 {
                return None;
            }
            let (column, data_type) = columns.remove(0);
            if !sql::is_integer_type(&data_type) {
                tracing::debug!("{}.{} is {}, not an integer key", table, column, data_type);
                return None;
            }
            Some((table, column))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn key(table: &str, column: &str, data_type: &str) -> (String, String, String) {
        (table.to_string(), column.to_string(), data_type.to_string())
    }

    #[test]
    fn test_composite_keys_are_dropped() {
        let rows = vec![
            key("orders", "id", "bigint"),
            key("order_items", "order_id", "int"),
            key("order_items", "line", "int"),
        ];
        let keys = single_column_keys(rows);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys.get("orders").map(String::as_str), Some("id"));
    }

    #[test]
    fn test_non_integer_keys_are_dropped() {
        let rows = vec![
            key("orders", "id", "int"),
            key("sessions", "uuid", "varchar"),
            key("tokens", "digest", "binary"),
            key("flags", "id", "TINYINT"),
        ];
        let keys = single_column_keys(rows);
        assert_eq!(keys.keys().collect::<Vec<_>>(), vec!["flags", "orders"]);
        assert!(!keys.contains_key("sessions"));
    }

    #[test]
    fn test_connect_options_follow_endpoint() {
        let env = Environment {
            name: "development".to_string(),
            username: Some("root".to_string()),
            password: Some("secret".to_string()),
            database: Some("shop".to_string()),
            ..Default::default()
        };
        let tcp = connect_options(
            &env,
            &Endpoint::Tcp {
                host: "127.0.0.1".to_string(),
                port: 13306,
            },
        );
        let shown = format!("{:?}", tcp);
        assert!(shown.contains("127.0.0.1"));
        assert!(shown.contains("13306"));

        let socket = connect_options(&env, &Endpoint::Socket(PathBuf::from("/tmp/mysql.sock")));
        assert!(format!("{:?}", socket).contains("/tmp/mysql.sock"));
    }
}
