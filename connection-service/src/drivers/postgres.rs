//! PostgreSQL backend. Catalog reads are limited to the `public` schema.

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPool, PgRow};
use sqlx::{Postgres, Row};

use common::config::PoolConfig;
use common::errors::{AppError, AppResult};
use common::models::{ColumnSchema, Record};
use common::utils::IdentifierValidator;

use super::value::pg_row_to_record;
use super::{query_error, sql_pool_options, CatalogParts};

const LIST_TABLES: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = 'public' ORDER BY table_name";

const COLUMNS: &str = "SELECT column_name::text, data_type::text, is_nullable::text, column_default::text \
     FROM information_schema.columns \
     WHERE table_schema = 'public' AND table_name = $1 \
     ORDER BY ordinal_position";

const CONSTRAINT_COLUMNS: &str = "SELECT kcu.column_name::text \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_name = kcu.constraint_name \
      AND tc.table_schema = kcu.table_schema \
      AND tc.table_name = kcu.table_name \
     WHERE tc.table_schema = 'public' AND tc.table_name = $1 AND tc.constraint_type = $2";

const FOREIGN_KEYS: &str = "SELECT kcu.column_name::text, ccu.table_name::text, ccu.column_name::text \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
     JOIN information_schema.constraint_column_usage ccu \
       ON tc.constraint_name = ccu.constraint_name AND tc.table_schema = ccu.table_schema \
     WHERE tc.table_schema = 'public' AND tc.table_name = $1 AND tc.constraint_type = 'FOREIGN KEY'";

const INDEXES: &str = "SELECT a.attname::text, i.relname::text \
     FROM pg_class t \
     JOIN pg_namespace n ON n.oid = t.relnamespace \
     JOIN pg_index ix ON t.oid = ix.indrelid \
     JOIN pg_class i ON i.oid = ix.indexrelid \
     JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
     WHERE t.relkind = 'r' AND n.nspname = 'public' AND t.relname = $1 \
     ORDER BY i.relname";

pub(super) fn open(conn_str: &str, config: &PoolConfig) -> AppResult<PgPool> {
    let options = PgConnectOptions::from_str(conn_str)
        .map_err(|e| AppError::MalformedConnectionString(e.to_string()))?;
    Ok(sql_pool_options::<Postgres>(config).connect_lazy_with(options))
}

pub(super) async fn list_tables(pool: &PgPool) -> AppResult<Vec<String>> {
    let rows = sqlx::query(LIST_TABLES)
        .fetch_all(pool)
        .await
        .map_err(query_error)?;
    rows.iter()
        .map(|r| r.try_get::<String, _>(0).map_err(query_error))
        .collect()
}

async fn constraint_columns(pool: &PgPool, table: &str, kind: &str) -> AppResult<Vec<String>> {
    sqlx::query(CONSTRAINT_COLUMNS)
        .bind(table)
        .bind(kind)
        .fetch_all(pool)
        .await
        .map_err(query_error)?
        .iter()
        .map(|r| r.try_get::<String, _>(0).map_err(query_error))
        .collect()
}

pub(super) async fn table_schema(pool: &PgPool, table: &str) -> AppResult<Vec<ColumnSchema>> {
    let mut parts = CatalogParts::default();

    for row in sqlx::query(COLUMNS)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(query_error)?
    {
        let mut col = ColumnSchema::new(
            row.try_get::<String, _>(0).map_err(query_error)?,
            row.try_get::<String, _>(1).map_err(query_error)?,
        );
        col.is_nullable = row.try_get::<String, _>(2).map_err(query_error)? == "YES";
        col.default_value = row.try_get::<Option<String>, _>(3).map_err(query_error)?;
        parts.columns.push(col);
    }

    parts.primary = constraint_columns(pool, table, "PRIMARY KEY").await?.into_iter().collect();
    parts.unique = constraint_columns(pool, table, "UNIQUE").await?.into_iter().collect();

    for row in sqlx::query(FOREIGN_KEYS)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(query_error)?
    {
        let column: String = row.try_get(0).map_err(query_error)?;
        let target = (
            row.try_get::<String, _>(1).map_err(query_error)?,
            row.try_get::<String, _>(2).map_err(query_error)?,
        );
        parts.foreign.insert(column, target);
    }

    for row in sqlx::query(INDEXES)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(query_error)?
    {
        parts.indexes.push((
            row.try_get::<String, _>(0).map_err(query_error)?,
            row.try_get::<String, _>(1).map_err(query_error)?,
        ));
    }

    Ok(parts.merge())
}

pub(super) async fn table_records(pool: &PgPool, table: &str) -> AppResult<Vec<Record>> {
    let sql = format!("SELECT * FROM public.{}", IdentifierValidator::quote_double(table));
    fetch_records(pool, &sql).await
}

pub(super) async fn run_query(pool: &PgPool, text: &str) -> AppResult<Vec<Record>> {
    fetch_records(pool, text).await
}

async fn fetch_records(pool: &PgPool, sql: &str) -> AppResult<Vec<Record>> {
    let rows: Vec<PgRow> = sqlx::query(sql)
        .persistent(false)
        .fetch_all(pool)
        .await
        .map_err(query_error)?;
    Ok(rows.iter().map(pg_row_to_record).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DatabasePool;

    /// Runs only when `TEST_POSTGRES_URL` points at a scratch database.
    async fn test_pool() -> Option<DatabasePool> {
        let url = std::env::var("TEST_POSTGRES_URL").ok()?;
        let pool = DatabasePool::open(common::models::DbType::Postgres, &url, &PoolConfig::default())
            .await
            .expect("TEST_POSTGRES_URL is set but unreachable");
        Some(pool)
    }

    #[tokio::test]
    async fn test_fixture_flags() {
        let Some(pool) = test_pool().await else { return };
        let DatabasePool::Postgres(pg) = &pool else { unreachable!() };
        for stmt in [
            "DROP TABLE IF EXISTS pm_orders",
            "DROP TABLE IF EXISTS pm_users",
            "CREATE TABLE pm_users (id INTEGER PRIMARY KEY)",
            "CREATE TABLE pm_orders (id INTEGER PRIMARY KEY, email TEXT UNIQUE, user_id INTEGER REFERENCES pm_users(id))",
        ] {
            sqlx::query(stmt).execute(pg).await.unwrap();
        }

        let columns = pool.get_table_schema(None, "pm_orders").await.unwrap();
        let by_name = |n: &str| columns.iter().find(|c| c.name == n).unwrap();
        assert!(by_name("id").is_primary_key);
        assert!(by_name("email").is_unique);
        assert!(!by_name("email").is_primary_key);
        let fk = by_name("user_id");
        assert!(fk.is_foreign_key);
        assert_eq!(fk.foreign_key_table.as_deref(), Some("pm_users"));
        assert_eq!(fk.foreign_key_column.as_deref(), Some("id"));

        let err = pool.run_query(None, "SELEC oops").await.unwrap_err();
        assert!(matches!(err, AppError::Query(_)));
        pool.close().await;
    }
}
