//! MySQL backend.
//!
//! Connection strings use the DSN form `user:pass@tcp(host:port)/db?tls=...`,
//! which sqlx does not read, so options are built from the parsed form.
//! Catalog reads are scoped to `DATABASE()`.

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlRow, MySqlSslMode};
use sqlx::{MySql, Row};

use common::config::PoolConfig;
use common::errors::AppResult;
use common::models::{ColumnSchema, DbType, Record};
use common::utils::{conn_string, IdentifierValidator};

use super::value::mysql_row_to_record;
use super::{query_error, sql_pool_options, CatalogParts};

const LIST_TABLES: &str = "SELECT CAST(table_name AS CHAR) FROM information_schema.tables \
     WHERE table_schema = DATABASE() ORDER BY table_name";

const COLUMNS: &str = "SELECT CAST(column_name AS CHAR), CAST(data_type AS CHAR), \
            CAST(is_nullable AS CHAR), CAST(column_default AS CHAR) \
     FROM information_schema.columns \
     WHERE table_schema = DATABASE() AND table_name = ? \
     ORDER BY ordinal_position";

const PRIMARY_KEY: &str = "SELECT CAST(column_name AS CHAR) FROM information_schema.key_column_usage \
     WHERE table_schema = DATABASE() AND table_name = ? AND constraint_name = 'PRIMARY'";

const UNIQUE: &str = "SELECT CAST(kcu.column_name AS CHAR) \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_schema = kcu.constraint_schema \
      AND tc.constraint_name = kcu.constraint_name \
      AND tc.table_name = kcu.table_name \
     WHERE tc.table_schema = DATABASE() AND tc.table_name = ? AND tc.constraint_type = 'UNIQUE'";

const FOREIGN_KEYS: &str = "SELECT CAST(column_name AS CHAR), CAST(referenced_table_name AS CHAR), \
            CAST(referenced_column_name AS CHAR) \
     FROM information_schema.key_column_usage \
     WHERE table_schema = DATABASE() AND table_name = ? AND referenced_table_name IS NOT NULL";

const INDEXES: &str = "SELECT CAST(column_name AS CHAR), CAST(index_name AS CHAR) \
     FROM information_schema.statistics \
     WHERE table_schema = DATABASE() AND table_name = ? \
     ORDER BY index_name, seq_in_index";

pub(super) fn open(conn_str: &str, config: &PoolConfig) -> AppResult<MySqlPool> {
    let form = conn_string::parse(conn_str, DbType::MySQL)?;
    let filled = conn_string::with_defaults(DbType::MySQL, &form);

    let mut options = MySqlConnectOptions::new()
        .host(filled.host.as_deref().unwrap_or("localhost"))
        .port(filled.port.unwrap_or(3306))
        .username(&form.username)
        .ssl_mode(if form.ssl {
            MySqlSslMode::Required
        } else {
            MySqlSslMode::Preferred
        });
    if !form.password.is_empty() {
        options = options.password(&form.password);
    }
    if !form.db_name.is_empty() {
        options = options.database(&form.db_name);
    }

    Ok(sql_pool_options::<MySql>(config).connect_lazy_with(options))
}

async fn single_column(pool: &MySqlPool, sql: &str, table: Option<&str>) -> AppResult<Vec<String>> {
    let mut query = sqlx::query(sql);
    if let Some(table) = table {
        query = query.bind(table);
    }
    query
        .fetch_all(pool)
        .await
        .map_err(query_error)?
        .iter()
        .map(|r| r.try_get::<String, _>(0).map_err(query_error))
        .collect()
}

pub(super) async fn list_tables(pool: &MySqlPool) -> AppResult<Vec<String>> {
    single_column(pool, LIST_TABLES, None).await
}

pub(super) async fn table_schema(pool: &MySqlPool, table: &str) -> AppResult<Vec<ColumnSchema>> {
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

    parts.primary = single_column(pool, PRIMARY_KEY, Some(table)).await?.into_iter().collect();
    parts.unique = single_column(pool, UNIQUE, Some(table)).await?.into_iter().collect();

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

pub(super) async fn table_records(pool: &MySqlPool, table: &str) -> AppResult<Vec<Record>> {
    let sql = format!("SELECT * FROM {}", IdentifierValidator::quote_backtick(table));
    fetch_records(pool, &sql).await
}

pub(super) async fn run_query(pool: &MySqlPool, text: &str) -> AppResult<Vec<Record>> {
    fetch_records(pool, text).await
}

async fn fetch_records(pool: &MySqlPool, sql: &str) -> AppResult<Vec<Record>> {
    let rows: Vec<MySqlRow> = sqlx::query(sql)
        .persistent(false)
        .fetch_all(pool)
        .await
        .map_err(query_error)?;
    Ok(rows.iter().map(mysql_row_to_record).collect())
}
