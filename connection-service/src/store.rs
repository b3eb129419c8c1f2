//! Connection metadata store.
//!
//! Descriptors (with the sealed connection string) live outside the pool
//! registry, next to each connection's query history. Production uses the
//! MySQL `connections` and `query_history` tables; the in-memory store backs
//! tests and single-node runs without `DATABASE_URL`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use tokio::sync::RwLock;

use common::errors::{AppError, AppResult};
use common::models::{ConnectionDescriptor, QueryHistoryEntry};

/// Persistence collaborator for connection descriptors.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn insert(&self, descriptor: &ConnectionDescriptor) -> AppResult<()>;

    /// Connections owned by `user_id`, newest first.
    async fn list_by_user(&self, user_id: &str) -> AppResult<Vec<ConnectionDescriptor>>;

    /// Fails `ConnectionNotFound` unless `id` exists and belongs to `user_id`.
    async fn get(&self, id: &str, user_id: &str) -> AppResult<ConnectionDescriptor>;

    async fn delete(&self, id: &str, user_id: &str) -> AppResult<()>;

    async fn set_active(&self, id: &str, user_id: &str, active: bool) -> AppResult<()>;

    async fn set_all_inactive_for_user(&self, user_id: &str) -> AppResult<()>;

    async fn set_all_inactive(&self) -> AppResult<()>;

    async fn record_query(&self, entry: &QueryHistoryEntry) -> AppResult<()>;

    /// History of one connection owned by `user_id`, newest first.
    async fn list_query_history(
        &self,
        connection_id: &str,
        user_id: &str,
        limit: usize,
    ) -> AppResult<Vec<QueryHistoryEntry>>;

    /// Sealed connection string of a connection owned by `user_id`.
    async fn get_connection_string(&self, id: &str, user_id: &str) -> AppResult<String> {
        Ok(self.get(id, user_id).await?.encrypted_conn_string)
    }

    /// Whether the owner already has a connection with the same name and target.
    async fn exists_duplicate(&self, candidate: &ConnectionDescriptor) -> AppResult<bool> {
        Ok(self
            .list_by_user(&candidate.user_id)
            .await?
            .iter()
            .any(|existing| existing.is_duplicate_of(candidate)))
    }
}

// ============== MySQL ==============

/// Row from the `connections` MySQL table.
#[derive(sqlx::FromRow)]
struct ConnectionRow {
    id: String,
    user_id: String,
    name: String,
    db_type: String,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    db_name: Option<String>,
    file_path: Option<String>,
    conn_string: String,
    is_active: bool,
    created_at: NaiveDateTime,
}

impl ConnectionRow {
    fn into_descriptor(self) -> AppResult<ConnectionDescriptor> {
        Ok(ConnectionDescriptor {
            db_type: self.db_type.parse()?,
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            host: self.host,
            port: self.port,
            username: self.username,
            db_name: self.db_name,
            file_path: self.file_path,
            encrypted_conn_string: self.conn_string,
            is_active: self.is_active,
            created_at: Utc.from_utc_datetime(&self.created_at),
        })
    }
}

/// Row from the `query_history` MySQL table.
#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: String,
    connection_id: String,
    user_id: String,
    query: String,
    db_name: Option<String>,
    row_count: u64,
    execution_time_ms: u64,
    success: bool,
    error: Option<String>,
    executed_at: NaiveDateTime,
}

impl From<HistoryRow> for QueryHistoryEntry {
    fn from(row: HistoryRow) -> Self {
        Self {
            id: row.id,
            connection_id: row.connection_id,
            user_id: row.user_id,
            query: row.query,
            db_name: row.db_name,
            row_count: row.row_count,
            execution_time_ms: row.execution_time_ms,
            success: row.success,
            error: row.error,
            executed_at: Utc.from_utc_datetime(&row.executed_at),
        }
    }
}

const SELECT_COLUMNS: &str = "SELECT `id`, `user_id`, `name`, `db_type`, `host`, `port`, `username`, \
     `db_name`, `file_path`, `conn_string`, `is_active`, `created_at` FROM `connections`";

fn store_error(context: &str) -> impl Fn(sqlx::Error) -> AppError + '_ {
    move |e| AppError::Store(format!("{context}: {e}"))
}

/// Descriptors persisted in a MySQL metadata database.
pub struct MySqlConnectionStore {
    pool: MySqlPool,
}

impl MySqlConnectionStore {
    /// Connects to `url` and ensures the metadata tables exist.
    pub async fn connect(url: &str) -> AppResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(store_error("failed to connect to metadata store"))?;
        let store = Self { pool };
        store.ensure_table().await?;
        Ok(store)
    }

    /// Creates the metadata tables if they do not exist.
    async fn ensure_table(&self) -> AppResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS `connections` (
                `id`          VARCHAR(64)   NOT NULL,
                `user_id`     VARCHAR(64)   NOT NULL,
                `name`        VARCHAR(100)  NOT NULL,
                `db_type`     VARCHAR(32)   NOT NULL,
                `host`        VARCHAR(255)  DEFAULT NULL,
                `port`        SMALLINT UNSIGNED DEFAULT NULL,
                `username`    VARCHAR(128)  DEFAULT NULL,
                `db_name`     VARCHAR(128)  DEFAULT NULL,
                `file_path`   VARCHAR(512)  DEFAULT NULL,
                `conn_string` TEXT          NOT NULL,
                `is_active`   BOOLEAN       NOT NULL DEFAULT FALSE,
                `created_at`  DATETIME      NOT NULL DEFAULT CURRENT_TIMESTAMP,
                `updated_at`  DATETIME      NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                PRIMARY KEY (`id`),
                KEY `idx_user_id` (`user_id`)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        )
        .execute(&self.pool)
        .await
        .map_err(store_error("failed to create connections table"))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS `query_history` (
                `id`                VARCHAR(64)   NOT NULL,
                `connection_id`     VARCHAR(64)   NOT NULL,
                `user_id`           VARCHAR(64)   NOT NULL,
                `query`             TEXT          NOT NULL,
                `db_name`           VARCHAR(128)  DEFAULT NULL,
                `row_count`         BIGINT UNSIGNED NOT NULL DEFAULT 0,
                `execution_time_ms` BIGINT UNSIGNED NOT NULL DEFAULT 0,
                `success`           BOOLEAN       NOT NULL,
                `error`             TEXT          DEFAULT NULL,
                `executed_at`       DATETIME(3)   NOT NULL,
                PRIMARY KEY (`id`),
                KEY `idx_connection_user` (`connection_id`, `user_id`, `executed_at`)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        )
        .execute(&self.pool)
        .await
        .map_err(store_error("failed to create query_history table"))?;

        tracing::info!("Metadata tables `connections`, `query_history` ensured");
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for MySqlConnectionStore {
    async fn insert(&self, d: &ConnectionDescriptor) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO `connections` (`id`, `user_id`, `name`, `db_type`, `host`, `port`, `username`, \
             `db_name`, `file_path`, `conn_string`, `is_active`, `created_at`)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&d.id)
        .bind(&d.user_id)
        .bind(&d.name)
        .bind(d.db_type.as_str())
        .bind(&d.host)
        .bind(d.port)
        .bind(&d.username)
        .bind(&d.db_name)
        .bind(&d.file_path)
        .bind(&d.encrypted_conn_string)
        .bind(d.is_active)
        .bind(d.created_at.naive_utc())
        .execute(&self.pool)
        .await
        .map_err(store_error("failed to save connection"))?;
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> AppResult<Vec<ConnectionDescriptor>> {
        let sql = format!("{SELECT_COLUMNS} WHERE `user_id` = ? ORDER BY `created_at` DESC");
        sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error("failed to list connections"))?
            .into_iter()
            .map(ConnectionRow::into_descriptor)
            .collect()
    }

    async fn get(&self, id: &str, user_id: &str) -> AppResult<ConnectionDescriptor> {
        let sql = format!("{SELECT_COLUMNS} WHERE `id` = ? AND `user_id` = ?");
        sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("failed to load connection"))?
            .ok_or_else(|| AppError::ConnectionNotFound(id.to_string()))?
            .into_descriptor()
    }

    async fn delete(&self, id: &str, user_id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM `connections` WHERE `id` = ? AND `user_id` = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(store_error("failed to delete connection"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::ConnectionNotFound(id.to_string()));
        }

        sqlx::query("DELETE FROM `query_history` WHERE `connection_id` = ? AND `user_id` = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(store_error("failed to delete query history"))?;
        Ok(())
    }

    async fn set_active(&self, id: &str, user_id: &str, active: bool) -> AppResult<()> {
        sqlx::query("UPDATE `connections` SET `is_active` = ? WHERE `id` = ? AND `user_id` = ?")
            .bind(active)
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(store_error("failed to update connection state"))?;
        Ok(())
    }

    async fn set_all_inactive_for_user(&self, user_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE `connections` SET `is_active` = FALSE WHERE `user_id` = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(store_error("failed to update connection state"))?;
        Ok(())
    }

    async fn set_all_inactive(&self) -> AppResult<()> {
        sqlx::query("UPDATE `connections` SET `is_active` = FALSE WHERE `is_active` = TRUE")
            .execute(&self.pool)
            .await
            .map_err(store_error("failed to update connection state"))?;
        Ok(())
    }

    async fn record_query(&self, e: &QueryHistoryEntry) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO `query_history` (`id`, `connection_id`, `user_id`, `query`, `db_name`, \
             `row_count`, `execution_time_ms`, `success`, `error`, `executed_at`)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&e.id)
        .bind(&e.connection_id)
        .bind(&e.user_id)
        .bind(&e.query)
        .bind(&e.db_name)
        .bind(e.row_count)
        .bind(e.execution_time_ms)
        .bind(e.success)
        .bind(&e.error)
        .bind(e.executed_at.naive_utc())
        .execute(&self.pool)
        .await
        .map_err(store_error("failed to save query history"))?;
        Ok(())
    }

    async fn list_query_history(
        &self,
        connection_id: &str,
        user_id: &str,
        limit: usize,
    ) -> AppResult<Vec<QueryHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT `id`, `connection_id`, `user_id`, `query`, `db_name`, `row_count`, \
             `execution_time_ms`, `success`, `error`, `executed_at` FROM `query_history` \
             WHERE `connection_id` = ? AND `user_id` = ? ORDER BY `executed_at` DESC LIMIT ?",
        )
        .bind(connection_id)
        .bind(user_id)
        .bind(limit as u64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("failed to load query history"))?;
        Ok(rows.into_iter().map(QueryHistoryEntry::from).collect())
    }
}

// ============== In-memory ==============

/// Process-local store.
#[derive(Default)]
pub struct InMemoryConnectionStore {
    connections: RwLock<HashMap<String, ConnectionDescriptor>>,
    history: RwLock<Vec<QueryHistoryEntry>>,
}

impl InMemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn insert(&self, descriptor: &ConnectionDescriptor) -> AppResult<()> {
        let mut connections = self.connections.write().await;
        if connections.contains_key(&descriptor.id) {
            return Err(AppError::Store(format!("duplicate id {}", descriptor.id)));
        }
        connections.insert(descriptor.id.clone(), descriptor.clone());
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> AppResult<Vec<ConnectionDescriptor>> {
        let mut list: Vec<_> = self
            .connections
            .read()
            .await
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn get(&self, id: &str, user_id: &str) -> AppResult<ConnectionDescriptor> {
        self.connections
            .read()
            .await
            .get(id)
            .filter(|d| d.user_id == user_id)
            .cloned()
            .ok_or_else(|| AppError::ConnectionNotFound(id.to_string()))
    }

    async fn delete(&self, id: &str, user_id: &str) -> AppResult<()> {
        let mut connections = self.connections.write().await;
        match connections.get(id) {
            Some(d) if d.user_id == user_id => {
                connections.remove(id);
                self.history
                    .write()
                    .await
                    .retain(|e| !(e.connection_id == id && e.user_id == user_id));
                Ok(())
            }
            _ => Err(AppError::ConnectionNotFound(id.to_string())),
        }
    }

    async fn set_active(&self, id: &str, user_id: &str, active: bool) -> AppResult<()> {
        if let Some(d) = self.connections.write().await.get_mut(id) {
            if d.user_id == user_id {
                d.is_active = active;
            }
        }
        Ok(())
    }

    async fn set_all_inactive_for_user(&self, user_id: &str) -> AppResult<()> {
        for d in self.connections.write().await.values_mut() {
            if d.user_id == user_id {
                d.is_active = false;
            }
        }
        Ok(())
    }

    async fn set_all_inactive(&self) -> AppResult<()> {
        for d in self.connections.write().await.values_mut() {
            d.is_active = false;
        }
        Ok(())
    }

    async fn record_query(&self, entry: &QueryHistoryEntry) -> AppResult<()> {
        self.history.write().await.push(entry.clone());
        Ok(())
    }

    async fn list_query_history(
        &self,
        connection_id: &str,
        user_id: &str,
        limit: usize,
    ) -> AppResult<Vec<QueryHistoryEntry>> {
        let history = self.history.read().await;
        Ok(history
            .iter()
            .rev()
            .filter(|e| e.connection_id == connection_id && e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
