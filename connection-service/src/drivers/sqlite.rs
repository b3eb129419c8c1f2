//! SQLite backend.
//!
//! Catalog reads use the `pragma_*` table-valued functions so the table name
//! is bound as a parameter rather than spliced into the statement.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite};

use common::config::PoolConfig;
use common::errors::{AppError, AppResult};
use common::models::{ColumnSchema, DbType, Record};
use common::utils::{conn_string, IdentifierValidator};

use super::value::sqlite_row_to_record;
use super::{query_error, sql_pool_options, CatalogParts};

const LIST_TABLES: &str = "SELECT name FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

const TABLE_INFO: &str = "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)";

const PRIMARY_KEY_OF: &str = "SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk LIMIT 1";

const FOREIGN_KEYS: &str = "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1)";

const INDEX_LIST: &str = "SELECT name, \"unique\", origin FROM pragma_index_list(?1)";

const INDEX_COLUMNS: &str = "SELECT name FROM pragma_index_info(?1) WHERE name IS NOT NULL";

pub(super) fn open(conn_str: &str, config: &PoolConfig) -> AppResult<SqlitePool> {
    let form = conn_string::parse(conn_str, DbType::SQLite)?;
    let path = form
        .file_path
        .ok_or_else(|| AppError::InvalidPath(conn_str.to_string()))?;

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true);

    Ok(sql_pool_options::<Sqlite>(config).connect_lazy_with(options))
}

pub(super) async fn list_tables(pool: &SqlitePool) -> AppResult<Vec<String>> {
    sqlx::query(LIST_TABLES)
        .fetch_all(pool)
        .await
        .map_err(query_error)?
        .iter()
        .map(|r| r.try_get::<String, _>(0).map_err(query_error))
        .collect()
}

pub(super) async fn table_schema(pool: &SqlitePool, table: &str) -> AppResult<Vec<ColumnSchema>> {
    let mut parts = CatalogParts::default();

    for row in sqlx::query(TABLE_INFO)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(query_error)?
    {
        let name: String = row.try_get(0).map_err(query_error)?;
        let declared: Option<String> = row.try_get(1).map_err(query_error)?;
        let not_null: i64 = row.try_get(2).map_err(query_error)?;
        let pk: i64 = row.try_get(4).map_err(query_error)?;

        let mut col = ColumnSchema::new(name.clone(), declared.unwrap_or_default());
        col.is_nullable = not_null == 0 && pk == 0;
        col.default_value = row.try_get::<Option<String>, _>(3).map_err(query_error)?;
        if pk > 0 {
            parts.primary.insert(name);
        }
        parts.columns.push(col);
    }

    for row in sqlx::query(FOREIGN_KEYS)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(query_error)?
    {
        let column: String = row.try_get(0).map_err(query_error)?;
        let target_table: String = row.try_get(1).map_err(query_error)?;
        let target_column = match row.try_get::<Option<String>, _>(2).map_err(query_error)? {
            Some(c) => c,
            // `REFERENCES users` without a column targets its primary key
            None => sqlx::query_scalar::<_, String>(PRIMARY_KEY_OF)
                .bind(&target_table)
                .fetch_optional(pool)
                .await
                .map_err(query_error)?
                .unwrap_or_else(|| "rowid".to_string()),
        };
        parts.foreign.insert(column, (target_table, target_column));
    }

    for row in sqlx::query(INDEX_LIST)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(query_error)?
    {
        let index: String = row.try_get(0).map_err(query_error)?;
        let unique: i64 = row.try_get(1).map_err(query_error)?;
        let origin: String = row.try_get(2).map_err(query_error)?;

        let columns: Vec<String> = sqlx::query_scalar(INDEX_COLUMNS)
            .bind(&index)
            .fetch_all(pool)
            .await
            .map_err(query_error)?;
        for column in columns {
            if unique == 1 && origin == "u" {
                parts.unique.insert(column.clone());
            }
            parts.indexes.push((column, index.clone()));
        }
    }

    Ok(parts.merge())
}

pub(super) async fn table_records(pool: &SqlitePool, table: &str) -> AppResult<Vec<Record>> {
    let sql = format!("SELECT * FROM {}", IdentifierValidator::quote_double(table));
    fetch_records(pool, &sql).await
}

pub(super) async fn run_query(pool: &SqlitePool, text: &str) -> AppResult<Vec<Record>> {
    fetch_records(pool, text).await
}

async fn fetch_records(pool: &SqlitePool, sql: &str) -> AppResult<Vec<Record>> {
    let rows: Vec<SqliteRow> = sqlx::query(sql)
        .persistent(false)
        .fetch_all(pool)
        .await
        .map_err(query_error)?;
    Ok(rows.iter().map(sqlite_row_to_record).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DatabasePool;
    use serde_json::json;
    use tempfile::TempDir;

    async fn fixture(statements: &[&str]) -> (TempDir, DatabasePool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.db");
        let pool = DatabasePool::open(
            DbType::SQLite,
            path.to_str().unwrap(),
            &PoolConfig::default(),
        )
        .await
        .unwrap();
        let DatabasePool::SQLite(sqlite) = &pool else { unreachable!() };
        for stmt in statements {
            sqlx::query(stmt).execute(sqlite).await.unwrap();
        }
        (dir, pool)
    }

    #[tokio::test]
    async fn test_records_are_typed() {
        let (_dir, pool) = fixture(&[
            "CREATE TABLE t (a INTEGER PRIMARY KEY, b TEXT)",
            "INSERT INTO t (a, b) VALUES (1, 'x')",
        ])
        .await;
        let records = pool.get_table_records(None, "t").await.unwrap();
        assert_eq!(serde_json::to_value(records).unwrap(), json!([{"a": 1, "b": "x"}]));
        pool.close().await;
    }

    #[tokio::test]
    async fn test_fixture_flags() {
        let (_dir, pool) = fixture(&[
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, email TEXT UNIQUE, \
             user_id INTEGER REFERENCES users(id))",
            "CREATE INDEX idx_orders_user ON orders (user_id)",
        ])
        .await;

        assert_eq!(pool.list_tables(None).await.unwrap(), vec!["orders", "users"]);

        let columns = pool.get_table_schema(None, "orders").await.unwrap();
        assert_eq!(columns.len(), 3);
        let by_name = |n: &str| columns.iter().find(|c| c.name == n).unwrap();

        let id = by_name("id");
        assert!(id.is_primary_key && !id.is_unique && !id.is_foreign_key);

        let email = by_name("email");
        assert!(email.is_unique && !email.is_primary_key && !email.is_foreign_key);
        assert!(email.is_nullable);
        assert_eq!(email.indexes.len(), 1);

        let user_id = by_name("user_id");
        assert!(user_id.is_foreign_key && !user_id.is_unique && !user_id.is_primary_key);
        assert_eq!(user_id.foreign_key_table.as_deref(), Some("users"));
        assert_eq!(user_id.foreign_key_column.as_deref(), Some("id"));
        assert_eq!(user_id.indexes, vec!["idx_orders_user"]);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_implicit_fk_target_resolves_to_primary_key() {
        let (_dir, pool) = fixture(&[
            "CREATE TABLE users (uid INTEGER PRIMARY KEY)",
            "CREATE TABLE posts (id INTEGER PRIMARY KEY, author INTEGER REFERENCES users)",
        ])
        .await;
        let columns = pool.get_table_schema(None, "posts").await.unwrap();
        let author = columns.iter().find(|c| c.name == "author").unwrap();
        assert_eq!(author.foreign_key_column.as_deref(), Some("uid"));
        pool.close().await;
    }

    #[tokio::test]
    async fn test_unknown_table_rejected_before_use() {
        let (_dir, pool) = fixture(&["CREATE TABLE t (a INTEGER)"]).await;
        let err = pool
            .get_table_records(None, "t; DROP TABLE t")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidIdentifier(_)));
        let err = pool.get_table_schema(None, "missing").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidIdentifier(_)));
        assert_eq!(pool.list_tables(None).await.unwrap(), vec!["t"]);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_bulk_schema_isolates_failures() {
        let (_dir, pool) = fixture(&[
            "CREATE TABLE a (x INTEGER)",
            "CREATE TABLE b (y TEXT NOT NULL)",
        ])
        .await;
        let all = pool.get_tables_schema(None, &[]).await.unwrap();
        assert_eq!(all.tables.len(), 2);
        assert!(all.failures.is_empty());
        assert!(!all.tables["b"][0].is_nullable);

        let some = pool
            .get_tables_schema(None, &["a".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(some.tables.keys().collect::<Vec<_>>(), vec!["a"]);
        assert!(some.failures.contains_key("nope"));
        pool.close().await;
    }

    #[tokio::test]
    async fn test_invalid_query_returns_error() {
        let (_dir, pool) = fixture(&[
            "CREATE TABLE t (a INTEGER)",
            "INSERT INTO t VALUES (1), (2)",
        ])
        .await;
        let err = pool.run_query(None, "SELEC * FRM t").await.unwrap_err();
        assert!(matches!(err, AppError::Query(_)));

        let rows = pool
            .run_query(None, "SELECT a, a * 1.5 AS scaled, NULL AS empty FROM t ORDER BY a")
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(rows).unwrap(),
            json!([
                {"a": 1, "scaled": 1.5, "empty": null},
                {"a": 2, "scaled": 3.0, "empty": null}
            ])
        );
        pool.close().await;
    }

    #[tokio::test]
    async fn test_sixteen_byte_blob_renders_as_uuid() {
        let uuid = uuid::Uuid::new_v4();
        let (_dir, pool) = fixture(&["CREATE TABLE k (id BLOB)"]).await;
        let DatabasePool::SQLite(sqlite) = &pool else { unreachable!() };
        sqlx::query("INSERT INTO k VALUES (?1)")
            .bind(uuid.as_bytes().to_vec())
            .execute(sqlite)
            .await
            .unwrap();
        let rows = pool.get_table_records(None, "k").await.unwrap();
        assert_eq!(rows[0]["id"], json!(uuid.to_string()));
        pool.close().await;
    }

    #[tokio::test]
    async fn test_relative_path_rejected() {
        let err = DatabasePool::open(DbType::SQLite, "data/app.db", &PoolConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::InvalidPath(_)));
    }
}
