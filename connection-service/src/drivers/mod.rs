//! Backend driver set.
//!
//! [`DatabasePool`] is a closed union over the four native pool types. Every
//! operation matches on it exhaustively and forwards to the backend module,
//! so adding a backend is a compile error until each operation handles it.

mod mongo;
mod mysql;
mod postgres;
mod sqlite;
pub mod value;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolOptions;
use sqlx::{MySqlPool, PgPool, SqlitePool};

use common::config::PoolConfig;
use common::errors::{AppError, AppResult};
use common::models::{ColumnSchema, DbType, Record, TablesSchema};

use crate::pool_manager::PoolOpener;

/// Deadline for the liveness probe and ping.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for catalog, record and query calls.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Max documents returned from a MongoDB collection.
pub const MONGO_RECORD_LIMIT: i64 = 100;

/// Live pool for one of the supported backends.
#[derive(Clone)]
pub enum DatabasePool {
    /// PostgreSQL connection pool.
    Postgres(PgPool),
    /// MySQL connection pool.
    MySQL(MySqlPool),
    /// SQLite connection pool.
    SQLite(SqlitePool),
    /// MongoDB client (pooled internally by the driver).
    MongoDB(mongodb::Client),
}

/// Runs `fut` under `limit`, failing with [`AppError::Timeout`] on expiry.
pub(crate) async fn with_deadline<T, F>(limit: Duration, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AppError::Timeout(limit.as_secs()))?
}

/// Common sizing for the SQL backends.
fn sql_pool_options<DB: sqlx::Database>(config: &PoolConfig) -> PoolOptions<DB> {
    PoolOptions::<DB>::new()
        .max_connections(config.max_open_conns)
        .min_connections(config.min_connections())
        .max_lifetime(config.conn_max_lifetime)
        .idle_timeout(config.conn_max_idle_time)
        .acquire_timeout(PING_TIMEOUT)
}

fn query_error(e: impl std::fmt::Display) -> AppError {
    AppError::Query(e.to_string())
}

impl DatabasePool {
    /// Opens a pool for `db_type` and probes it.
    ///
    /// A failed probe closes the handle before returning `ConnectFailed`.
    pub async fn open(db_type: DbType, conn_str: &str, config: &PoolConfig) -> AppResult<Self> {
        let pool = match db_type {
            DbType::Postgres => DatabasePool::Postgres(postgres::open(conn_str, config)?),
            DbType::MySQL => DatabasePool::MySQL(mysql::open(conn_str, config)?),
            DbType::SQLite => DatabasePool::SQLite(sqlite::open(conn_str, config)?),
            DbType::MongoDB => DatabasePool::MongoDB(mongo::open(conn_str, config).await?),
        };

        if let Err(e) = pool.ping().await {
            pool.close().await;
            tracing::warn!(db_type = %db_type, error = %e, "liveness probe failed");
            return Err(match e {
                AppError::ConnectFailed(_) => e,
                other => AppError::ConnectFailed(other.to_string()),
            });
        }

        tracing::info!(db_type = %db_type, "pool opened");
        Ok(pool)
    }

    pub fn db_type(&self) -> DbType {
        match self {
            DatabasePool::Postgres(_) => DbType::Postgres,
            DatabasePool::MySQL(_) => DbType::MySQL,
            DatabasePool::SQLite(_) => DbType::SQLite,
            DatabasePool::MongoDB(_) => DbType::MongoDB,
        }
    }

    /// Round-trips a trivial command, bounded by [`PING_TIMEOUT`].
    pub async fn ping(&self) -> AppResult<()> {
        with_deadline(PING_TIMEOUT, async {
            let probe = match self {
                DatabasePool::Postgres(p) => sqlx::query("SELECT 1").execute(p).await.map(drop),
                DatabasePool::MySQL(p) => sqlx::query("SELECT 1").execute(p).await.map(drop),
                DatabasePool::SQLite(p) => sqlx::query("SELECT 1").execute(p).await.map(drop),
                DatabasePool::MongoDB(c) => return mongo::ping(c).await,
            };
            probe.map_err(|e| AppError::ConnectFailed(e.to_string()))
        })
        .await
    }

    /// Closes the underlying handle. Idempotent.
    pub async fn close(&self) {
        match self {
            DatabasePool::Postgres(p) => p.close().await,
            DatabasePool::MySQL(p) => p.close().await,
            DatabasePool::SQLite(p) => p.close().await,
            DatabasePool::MongoDB(c) => mongo::close(c).await,
        }
    }

    /// Whether the handle has been closed. MongoDB clients do not expose this.
    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        match self {
            DatabasePool::Postgres(p) => p.is_closed(),
            DatabasePool::MySQL(p) => p.is_closed(),
            DatabasePool::SQLite(p) => p.is_closed(),
            DatabasePool::MongoDB(_) => false,
        }
    }

    /// Table (or collection) names, sorted.
    pub async fn list_tables(&self, db_name: Option<&str>) -> AppResult<Vec<String>> {
        with_deadline(QUERY_TIMEOUT, async {
            match self {
                DatabasePool::Postgres(p) => postgres::list_tables(p).await,
                DatabasePool::MySQL(p) => mysql::list_tables(p).await,
                DatabasePool::SQLite(p) => sqlite::list_tables(p).await,
                DatabasePool::MongoDB(c) => mongo::list_collections(c, db_name).await,
            }
        })
        .await
    }

    /// Column schema of one table.
    ///
    /// # Errors
    /// `InvalidIdentifier` if the table is not listed; `CatalogQueryFailed`
    /// if any catalog query fails.
    pub async fn get_table_schema(
        &self,
        db_name: Option<&str>,
        table: &str,
    ) -> AppResult<Vec<ColumnSchema>> {
        let known = self.list_tables(db_name).await?;
        common::utils::IdentifierValidator::ensure_listed(table, &known)?;
        self.table_schema_unchecked(db_name, table).await
    }

    /// Schemas for `tables` (every table when empty). Failures are isolated
    /// per table and reported in [`TablesSchema::failures`].
    pub async fn get_tables_schema(
        &self,
        db_name: Option<&str>,
        tables: &[String],
    ) -> AppResult<TablesSchema> {
        let known = self.list_tables(db_name).await?;
        let wanted: Vec<&String> = if tables.is_empty() {
            known.iter().collect()
        } else {
            tables.iter().collect()
        };

        let mut result = TablesSchema::default();
        for table in wanted {
            let outcome = match common::utils::IdentifierValidator::ensure_listed(table, &known) {
                Ok(_) => self.table_schema_unchecked(db_name, table).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(columns) => {
                    result.tables.insert(table.clone(), columns);
                }
                Err(e) => {
                    tracing::warn!(table = %table, error = %e, "schema skipped");
                    result.failures.insert(table.clone(), e.to_string());
                }
            }
        }
        Ok(result)
    }

    async fn table_schema_unchecked(
        &self,
        db_name: Option<&str>,
        table: &str,
    ) -> AppResult<Vec<ColumnSchema>> {
        let catalog = with_deadline(QUERY_TIMEOUT, async {
            match self {
                DatabasePool::Postgres(p) => postgres::table_schema(p, table).await,
                DatabasePool::MySQL(p) => mysql::table_schema(p, table).await,
                DatabasePool::SQLite(p) => sqlite::table_schema(p, table).await,
                DatabasePool::MongoDB(c) => mongo::collection_schema(c, db_name, table).await,
            }
        })
        .await;

        catalog.map_err(|e| match e {
            AppError::Timeout(_) | AppError::Validation(_) => e,
            other => AppError::CatalogQueryFailed {
                table: table.to_string(),
                message: other.to_string(),
            },
        })
    }

    /// Every row of a table, or up to [`MONGO_RECORD_LIMIT`] documents.
    pub async fn get_table_records(
        &self,
        db_name: Option<&str>,
        table: &str,
    ) -> AppResult<Vec<Record>> {
        let known = self.list_tables(db_name).await?;
        let table = common::utils::IdentifierValidator::ensure_listed(table, &known)?;
        with_deadline(QUERY_TIMEOUT, async {
            match self {
                DatabasePool::Postgres(p) => postgres::table_records(p, table).await,
                DatabasePool::MySQL(p) => mysql::table_records(p, table).await,
                DatabasePool::SQLite(p) => sqlite::table_records(p, table).await,
                DatabasePool::MongoDB(c) => mongo::collection_records(c, db_name, table).await,
            }
        })
        .await
    }

    /// Executes caller-supplied text.
    ///
    /// SQL backends run it verbatim and return all rows or an error, never a
    /// partial result. MongoDB treats it as a collection name to enumerate.
    pub async fn run_query(&self, db_name: Option<&str>, text: &str) -> AppResult<Vec<Record>> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("query text is empty".into()));
        }
        with_deadline(QUERY_TIMEOUT, async {
            match self {
                DatabasePool::Postgres(p) => postgres::run_query(p, text).await,
                DatabasePool::MySQL(p) => mysql::run_query(p, text).await,
                DatabasePool::SQLite(p) => sqlite::run_query(p, text).await,
                DatabasePool::MongoDB(c) => mongo::run_query(c, db_name, text).await,
            }
        })
        .await
    }
}

/// Opens pools through the real drivers.
pub struct DriverOpener {
    config: PoolConfig,
}

impl DriverOpener {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PoolOpener for DriverOpener {
    async fn open(&self, db_type: DbType, conn_str: &str) -> AppResult<DatabasePool> {
        DatabasePool::open(db_type, conn_str, &self.config).await
    }
}

/// Results of the base and auxiliary catalog queries for one table.
#[derive(Default)]
struct CatalogParts {
    columns: Vec<ColumnSchema>,
    primary: HashSet<String>,
    unique: HashSet<String>,
    /// column -> (table, column)
    foreign: HashMap<String, (String, String)>,
    /// (column, index name)
    indexes: Vec<(String, String)>,
}

impl CatalogParts {
    /// Merges the auxiliary sets into the base columns by column name.
    fn merge(self) -> Vec<ColumnSchema> {
        let CatalogParts {
            mut columns,
            primary,
            unique,
            mut foreign,
            indexes,
        } = self;

        for col in &mut columns {
            col.is_primary_key |= primary.contains(&col.name);
            col.is_unique |= unique.contains(&col.name);
            if let Some((table, column)) = foreign.remove(&col.name) {
                col.is_foreign_key = true;
                col.foreign_key_table = Some(table);
                col.foreign_key_column = Some(column);
            }
            col.indexes = indexes
                .iter()
                .filter(|(c, _)| *c == col.name)
                .map(|(_, idx)| idx.clone())
                .collect();
            col.indexes.dedup();
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_by_column_name() {
        let parts = CatalogParts {
            columns: vec![
                ColumnSchema::new("id", "integer"),
                ColumnSchema::new("email", "text"),
                ColumnSchema::new("user_id", "integer"),
            ],
            primary: HashSet::from(["id".to_string()]),
            unique: HashSet::from(["email".to_string()]),
            foreign: HashMap::from([(
                "user_id".to_string(),
                ("users".to_string(), "id".to_string()),
            )]),
            indexes: vec![
                ("id".to_string(), "orders_pkey".to_string()),
                ("email".to_string(), "orders_email_key".to_string()),
            ],
        };
        let columns = parts.merge();
        assert!(columns[0].is_primary_key && !columns[0].is_unique);
        assert_eq!(columns[0].indexes, vec!["orders_pkey"]);
        assert!(columns[1].is_unique && !columns[1].is_foreign_key);
        assert!(columns[2].is_foreign_key);
        assert_eq!(columns[2].foreign_key_table.as_deref(), Some("users"));
        assert_eq!(columns[2].foreign_key_column.as_deref(), Some("id"));
        assert!(columns[2].indexes.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_maps_to_timeout() {
        let result: AppResult<()> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AppError::Timeout(_))));
    }
}
