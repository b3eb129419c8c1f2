//! 连接管理服务模块
//!
//! 连接的增删查、连接串解析与测试，以及通过连接池执行的表结构、记录和查询操作。
//! 所有操作都以调用者的用户 ID 为边界，其他用户的连接一律视为不存在。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use validator::Validate;

use common::errors::{AppError, AppResult};
use common::models::{
    ColumnSchema, ConnectionDescriptor, ConnectionForm, ConnectionItem, CreateConnectionRequest,
    DbType, ParseConnectionStringRequest, QueryHistoryEntry, QueryRequest, QueryResult, Record,
    TablesSchema, TablesSchemaRequest, TestConnectionRequest,
};
use common::utils::cipher::{self, EncryptionKey};
use common::utils::{conn_string, IdGenerator};

use crate::pool_manager::{ActivePool, PoolManager, PoolOpener};
use crate::store::ConnectionStore;

/// 每个连接返回的查询历史条数上限
const QUERY_HISTORY_LIMIT: usize = 100;

/// 连接服务 Trait
#[async_trait]
pub trait ConnectionServiceTrait: Send + Sync {
    /// 列出用户的所有连接
    async fn list(&self, user_id: &str) -> AppResult<Vec<ConnectionItem>>;

    /// 获取单个连接
    async fn get(&self, user_id: &str, id: &str) -> AppResult<ConnectionItem>;

    /// 创建新连接（连接串原样加密保存，表单则先生成连接串）
    async fn create(&self, user_id: &str, req: CreateConnectionRequest)
        -> AppResult<ConnectionItem>;

    /// 删除连接，先关闭其连接池
    async fn delete(&self, user_id: &str, id: &str) -> AppResult<()>;

    /// 测试连接（不保存），返回延迟毫秒数
    async fn test(&self, req: TestConnectionRequest) -> AppResult<u64>;

    /// 解析连接串
    async fn parse(&self, req: ParseConnectionStringRequest) -> AppResult<ConnectionForm>;

    /// 激活连接池
    async fn activate(&self, user_id: &str, id: &str, db_type: DbType) -> AppResult<()>;

    /// 关闭连接池
    async fn deactivate(&self, user_id: &str, id: &str) -> AppResult<()>;

    /// 关闭用户的所有连接池
    async fn deactivate_all(&self, user_id: &str) -> AppResult<usize>;

    /// 列出表（或集合）
    async fn list_tables(
        &self,
        user_id: &str,
        id: &str,
        db_name: Option<&str>,
    ) -> AppResult<Vec<String>>;

    /// 获取单表结构
    async fn table_schema(
        &self,
        user_id: &str,
        id: &str,
        table: &str,
        db_name: Option<&str>,
    ) -> AppResult<Vec<ColumnSchema>>;

    /// 批量获取表结构
    async fn tables_schema(
        &self,
        user_id: &str,
        id: &str,
        req: TablesSchemaRequest,
    ) -> AppResult<TablesSchema>;

    /// 获取表记录
    async fn table_records(
        &self,
        user_id: &str,
        id: &str,
        table: &str,
        db_name: Option<&str>,
    ) -> AppResult<Vec<Record>>;

    /// 执行查询
    async fn run_query(&self, user_id: &str, id: &str, req: QueryRequest)
        -> AppResult<QueryResult>;

    /// 查询历史（最新在前）
    async fn query_history(&self, user_id: &str, id: &str) -> AppResult<Vec<QueryHistoryEntry>>;
}

/// 数据库连接管理服务
pub struct ConnectionService {
    store: Arc<dyn ConnectionStore>,
    pool_manager: Arc<PoolManager>,
    opener: Arc<dyn PoolOpener>,
    encryption_key: EncryptionKey,
}

impl ConnectionService {
    /// 创建新的连接服务实例
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        pool_manager: Arc<PoolManager>,
        opener: Arc<dyn PoolOpener>,
        encryption_key: EncryptionKey,
    ) -> Self {
        Self {
            store,
            pool_manager,
            opener,
            encryption_key,
        }
    }

    /// 获取属于该用户的活跃连接池
    async fn owned_pool(&self, user_id: &str, id: &str) -> AppResult<ActivePool> {
        let active = self.pool_manager.get_pool(id).await?;
        if active.user_id != user_id {
            return Err(AppError::PoolNotFound(id.to_string()));
        }
        Ok(active)
    }
}

/// Connection string to seal plus the form describing it.
///
/// Exactly one of `text` and `form` must be present. Supplied text is kept
/// verbatim (trimmed) so parameters the form does not model survive; it is
/// only parsed to validate it and fill the descriptor's metadata.
fn resolve_connection(
    db_type: DbType,
    text: Option<&str>,
    form: Option<&ConnectionForm>,
) -> AppResult<(String, ConnectionForm)> {
    match (text.map(str::trim).filter(|t| !t.is_empty()), form) {
        (Some(text), None) => {
            let parsed = conn_string::parse(text, db_type)?;
            Ok((text.to_string(), conn_string::with_defaults(db_type, &parsed)))
        }
        (None, Some(form)) => {
            let filled = conn_string::with_defaults(db_type, form);
            let canonical = conn_string::build(db_type, &filled)?;
            Ok((canonical, filled))
        }
        (Some(_), Some(_)) => Err(AppError::Validation(
            "provide either conn_string or form, not both".into(),
        )),
        (None, None) => Err(AppError::Validation(
            "either conn_string or form is required".into(),
        )),
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

#[async_trait]
impl ConnectionServiceTrait for ConnectionService {
    async fn list(&self, user_id: &str) -> AppResult<Vec<ConnectionItem>> {
        Ok(self
            .store
            .list_by_user(user_id)
            .await?
            .into_iter()
            .map(ConnectionItem::from)
            .collect())
    }

    async fn get(&self, user_id: &str, id: &str) -> AppResult<ConnectionItem> {
        Ok(ConnectionItem::from(self.store.get(id, user_id).await?))
    }

    async fn create(
        &self,
        user_id: &str,
        req: CreateConnectionRequest,
    ) -> AppResult<ConnectionItem> {
        req.validate()?;
        let (conn_str, form) =
            resolve_connection(req.db_type, req.conn_string.as_deref(), req.form.as_ref())?;

        let sqlite = req.db_type == DbType::SQLite;
        let mut descriptor = ConnectionDescriptor {
            id: IdGenerator::connection_id(),
            user_id: user_id.to_string(),
            name: req.name.trim().to_string(),
            db_type: req.db_type,
            host: if sqlite { None } else { form.host.clone() },
            port: if sqlite { None } else { form.port },
            username: non_empty(&form.username),
            db_name: non_empty(&form.db_name),
            file_path: if sqlite { form.file_path.clone() } else { None },
            encrypted_conn_string: String::new(),
            is_active: false,
            created_at: Utc::now(),
        };

        if self.store.exists_duplicate(&descriptor).await? {
            return Err(AppError::DuplicateConnection(descriptor.name));
        }
        descriptor.encrypted_conn_string = cipher::encrypt(&conn_str, &self.encryption_key)?;
        self.store.insert(&descriptor).await?;

        tracing::info!(id = %descriptor.id, name = %descriptor.name, db_type = %descriptor.db_type, "连接已创建");
        Ok(ConnectionItem::from(descriptor))
    }

    async fn delete(&self, user_id: &str, id: &str) -> AppResult<()> {
        self.store.get(id, user_id).await?;
        self.pool_manager.deactivate(id).await;
        self.store.delete(id, user_id).await?;
        tracing::info!(id = %id, "连接已删除");
        Ok(())
    }

    async fn test(&self, req: TestConnectionRequest) -> AppResult<u64> {
        let (conn_str, _) =
            resolve_connection(req.db_type, req.conn_string.as_deref(), req.form.as_ref())?;

        let started = Instant::now();
        let pool = self.opener.open(req.db_type, &conn_str).await?;
        let latency = started.elapsed().as_millis() as u64;
        pool.close().await;

        tracing::debug!(db_type = %req.db_type, latency_ms = latency, "连接测试成功");
        Ok(latency)
    }

    async fn parse(&self, req: ParseConnectionStringRequest) -> AppResult<ConnectionForm> {
        req.validate()?;
        let form = conn_string::parse(&req.conn_string, req.db_type)?;
        Ok(conn_string::with_defaults(req.db_type, &form))
    }

    async fn activate(&self, user_id: &str, id: &str, db_type: DbType) -> AppResult<()> {
        self.pool_manager.activate(id, db_type, user_id).await
    }

    async fn deactivate(&self, user_id: &str, id: &str) -> AppResult<()> {
        self.store.get(id, user_id).await?;
        self.pool_manager.deactivate(id).await;
        Ok(())
    }

    async fn deactivate_all(&self, user_id: &str) -> AppResult<usize> {
        Ok(self.pool_manager.deactivate_user(user_id).await)
    }

    async fn list_tables(
        &self,
        user_id: &str,
        id: &str,
        db_name: Option<&str>,
    ) -> AppResult<Vec<String>> {
        self.owned_pool(user_id, id).await?.pool.list_tables(db_name).await
    }

    async fn table_schema(
        &self,
        user_id: &str,
        id: &str,
        table: &str,
        db_name: Option<&str>,
    ) -> AppResult<Vec<ColumnSchema>> {
        self.owned_pool(user_id, id)
            .await?
            .pool
            .get_table_schema(db_name, table)
            .await
    }

    async fn tables_schema(
        &self,
        user_id: &str,
        id: &str,
        req: TablesSchemaRequest,
    ) -> AppResult<TablesSchema> {
        self.owned_pool(user_id, id)
            .await?
            .pool
            .get_tables_schema(req.db_name.as_deref(), &req.tables)
            .await
    }

    async fn table_records(
        &self,
        user_id: &str,
        id: &str,
        table: &str,
        db_name: Option<&str>,
    ) -> AppResult<Vec<Record>> {
        self.owned_pool(user_id, id)
            .await?
            .pool
            .get_table_records(db_name, table)
            .await
    }

    async fn run_query(
        &self,
        user_id: &str,
        id: &str,
        req: QueryRequest,
    ) -> AppResult<QueryResult> {
        req.validate()?;
        let active = self.owned_pool(user_id, id).await?;

        let executed_at = Utc::now();
        let started = Instant::now();
        let outcome = active
            .pool
            .run_query(req.db_name.as_deref(), &req.query)
            .await;
        let elapsed = started.elapsed().as_millis() as u64;

        let entry = QueryHistoryEntry {
            id: IdGenerator::history_id(),
            connection_id: id.to_string(),
            user_id: user_id.to_string(),
            query: req.query.clone(),
            db_name: req.db_name.clone(),
            row_count: outcome.as_ref().map_or(0, |r| r.len() as u64),
            execution_time_ms: elapsed,
            success: outcome.is_ok(),
            error: outcome.as_ref().err().map(ToString::to_string),
            executed_at,
        };
        // 历史记录失败不影响查询结果
        if let Err(e) = self.store.record_query(&entry).await {
            tracing::warn!(id = %id, error = %e, "保存查询历史失败");
        }

        let records = outcome?;
        tracing::debug!(id = %id, db_type = %active.db_type, rows = records.len(), elapsed_ms = elapsed, "查询完成");
        Ok(QueryResult::new(records, elapsed))
    }

    async fn query_history(&self, user_id: &str, id: &str) -> AppResult<Vec<QueryHistoryEntry>> {
        self.store.get(id, user_id).await?;
        self.store
            .list_query_history(id, user_id, QUERY_HISTORY_LIMIT)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::config::PoolConfig;
    use tempfile::TempDir;

    use super::*;
    use crate::drivers::{DatabasePool, DriverOpener};
    use crate::store::InMemoryConnectionStore;

    fn service() -> (ConnectionService, Arc<PoolManager>) {
        let store: Arc<dyn ConnectionStore> = Arc::new(InMemoryConnectionStore::new());
        let opener: Arc<dyn PoolOpener> = Arc::new(DriverOpener::new(PoolConfig::default()));
        let key = EncryptionKey::from_bytes(&[3u8; 32]).unwrap();
        let manager = Arc::new(PoolManager::new(
            store.clone(),
            opener.clone(),
            key.clone(),
            Duration::from_secs(3600),
        ));
        (
            ConnectionService::new(store, manager.clone(), opener, key),
            manager,
        )
    }

    async fn sqlite_file(dir: &TempDir, stmts: &[&str]) -> String {
        let path = dir.path().join("app.db").to_str().unwrap().to_string();
        let pool = DatabasePool::open(DbType::SQLite, &path, &PoolConfig::default())
            .await
            .unwrap();
        if let DatabasePool::SQLite(p) = &pool {
            for stmt in stmts {
                sqlx::query(stmt).execute(p).await.unwrap();
            }
        }
        pool.close().await;
        path
    }

    fn sqlite_request(name: &str, path: &str) -> CreateConnectionRequest {
        CreateConnectionRequest {
            name: name.into(),
            db_type: DbType::SQLite,
            conn_string: Some(format!("sqlite://{path}")),
            form: None,
        }
    }

    #[tokio::test]
    async fn test_create_from_form_fills_defaults() {
        let (svc, _) = service();
        let item = svc
            .create(
                "u1",
                CreateConnectionRequest {
                    name: "pg".into(),
                    db_type: DbType::Postgres,
                    conn_string: None,
                    form: Some(ConnectionForm {
                        username: "app".into(),
                        password: "secret".into(),
                        db_name: "shop".into(),
                        ..Default::default()
                    }),
                },
            )
            .await
            .unwrap();

        assert_eq!(item.host.as_deref(), Some("localhost"));
        assert_eq!(item.port, Some(5432));
        assert_eq!(item.username.as_deref(), Some("app"));
        assert_eq!(item.db_name.as_deref(), Some("shop"));
        assert!(!item.is_active);
        assert_eq!(svc.list("u1").await.unwrap().len(), 1);
        assert!(svc.list("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_seals_supplied_string() {
        let (svc, _) = service();
        let item = svc
            .create(
                "u1",
                CreateConnectionRequest {
                    name: "pg".into(),
                    db_type: DbType::Postgres,
                    conn_string: Some("postgresql://app:pw@db:5433/shop".into()),
                    form: None,
                },
            )
            .await
            .unwrap();

        let sealed = svc.store.get_connection_string(&item.id, "u1").await.unwrap();
        assert!(!sealed.contains("pw"));
        let plain = cipher::decrypt(&sealed, &svc.encryption_key).unwrap();
        assert_eq!(plain, "postgresql://app:pw@db:5433/shop");
        assert_eq!(item.port, Some(5433));
    }

    #[tokio::test]
    async fn test_create_keeps_unmodelled_parameters() {
        let (svc, _) = service();
        for (name, db_type, text) in [
            (
                "pg",
                DbType::Postgres,
                "postgres://u:p@db.example.com:5432/shop?sslmode=verify-full&sslrootcert=/etc/ca.pem",
            ),
            (
                "mongo",
                DbType::MongoDB,
                "mongodb+srv://u:p@cluster0.example.net/app?authSource=admin&replicaSet=rs0",
            ),
        ] {
            let item = svc
                .create(
                    "u1",
                    CreateConnectionRequest {
                        name: name.into(),
                        db_type,
                        conn_string: Some(format!("  {text} ")),
                        form: None,
                    },
                )
                .await
                .unwrap();
            let sealed = svc.store.get_connection_string(&item.id, "u1").await.unwrap();
            assert_eq!(cipher::decrypt(&sealed, &svc.encryption_key).unwrap(), text);
        }
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_bad_input() {
        let (svc, _) = service();
        let dir = tempfile::tempdir().unwrap();
        let path = sqlite_file(&dir, &[]).await;

        svc.create("u1", sqlite_request("local", &path)).await.unwrap();
        assert!(matches!(
            svc.create("u1", sqlite_request("local", &path)).await,
            Err(AppError::DuplicateConnection(_))
        ));
        // Same target for another user is fine.
        svc.create("u2", sqlite_request("local", &path)).await.unwrap();

        assert!(matches!(
            svc.create("u1", sqlite_request("", &path)).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            svc.create("u1", sqlite_request("rel", "data/app.db")).await,
            Err(AppError::InvalidPath(_))
        ));

        let mut neither = sqlite_request("x", &path);
        neither.conn_string = None;
        assert!(matches!(
            svc.create("u1", neither).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_reports_success_and_malformed_input() {
        let (svc, _) = service();
        let dir = tempfile::tempdir().unwrap();
        let path = sqlite_file(&dir, &[]).await;

        let ok = svc
            .test(TestConnectionRequest {
                db_type: DbType::SQLite,
                conn_string: Some(path),
                form: None,
            })
            .await;
        assert!(ok.is_ok());

        let bad = svc
            .test(TestConnectionRequest {
                db_type: DbType::MySQL,
                conn_string: Some("no delimiters here".into()),
                form: None,
            })
            .await;
        assert!(matches!(bad, Err(AppError::MalformedConnectionString(_))));
    }

    #[tokio::test]
    async fn test_parse_fills_default_port() {
        let (svc, _) = service();
        let form = svc
            .parse(ParseConnectionStringRequest {
                db_type: DbType::MySQL,
                conn_string: "root:pw@tcp(db)/shop?tls=true".into(),
            })
            .await
            .unwrap();
        assert_eq!(form.host.as_deref(), Some("db"));
        assert_eq!(form.port, Some(3306));
        assert_eq!(form.db_name, "shop");
        assert!(form.ssl);
    }

    #[tokio::test]
    async fn test_pool_operations_are_scoped_to_owner() {
        let (svc, manager) = service();
        let dir = tempfile::tempdir().unwrap();
        let path = sqlite_file(
            &dir,
            &[
                "CREATE TABLE t (a INTEGER PRIMARY KEY, b TEXT)",
                "INSERT INTO t VALUES (1, 'x')",
            ],
        )
        .await;
        let item = svc.create("u1", sqlite_request("local", &path)).await.unwrap();

        assert!(matches!(
            svc.list_tables("u1", &item.id, None).await,
            Err(AppError::PoolNotFound(_))
        ));
        assert!(svc.activate("u2", &item.id, DbType::SQLite).await.is_err());

        svc.activate("u1", &item.id, DbType::SQLite).await.unwrap();
        assert_eq!(svc.list_tables("u1", &item.id, None).await.unwrap(), vec!["t"]);
        assert!(matches!(
            svc.list_tables("u2", &item.id, None).await,
            Err(AppError::PoolNotFound(_))
        ));

        let result = svc
            .run_query(
                "u1",
                &item.id,
                QueryRequest {
                    query: "SELECT b FROM t".into(),
                    db_name: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.records[0]["b"], "x");

        let schema = svc.table_schema("u1", &item.id, "t", None).await.unwrap();
        assert!(schema[0].is_primary_key);

        assert!(svc.deactivate("u2", &item.id).await.is_err());
        assert_eq!(manager.active_count().await, 1);

        svc.delete("u1", &item.id).await.unwrap();
        assert_eq!(manager.active_count().await, 0);
        assert!(svc.list("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_connection_by_id() {
        let (svc, _) = service();
        let dir = tempfile::tempdir().unwrap();
        let path = sqlite_file(&dir, &[]).await;
        let item = svc.create("u1", sqlite_request("local", &path)).await.unwrap();

        let fetched = svc.get("u1", &item.id).await.unwrap();
        assert_eq!(fetched.id, item.id);
        assert_eq!(fetched.name, "local");
        assert_eq!(fetched.file_path.as_deref(), Some(path.as_str()));
        assert!(matches!(
            svc.get("u2", &item.id).await,
            Err(AppError::ConnectionNotFound(_))
        ));
        assert!(matches!(
            svc.get("u1", "missing").await,
            Err(AppError::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_queries_are_recorded_in_history() {
        let (svc, _) = service();
        let dir = tempfile::tempdir().unwrap();
        let path = sqlite_file(
            &dir,
            &["CREATE TABLE t (a INTEGER)", "INSERT INTO t VALUES (1), (2)"],
        )
        .await;
        let item = svc.create("u1", sqlite_request("local", &path)).await.unwrap();
        svc.activate("u1", &item.id, DbType::SQLite).await.unwrap();

        let query = |text: &str| QueryRequest {
            query: text.into(),
            db_name: None,
        };
        svc.run_query("u1", &item.id, query("SELECT a FROM t")).await.unwrap();
        assert!(matches!(
            svc.run_query("u1", &item.id, query("SELEC nope")).await,
            Err(AppError::Query(_))
        ));

        let history = svc.query_history("u1", &item.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].query, "SELEC nope");
        assert!(!history[0].success);
        assert!(history[0].error.is_some());
        assert_eq!(history[1].query, "SELECT a FROM t");
        assert!(history[1].success);
        assert_eq!(history[1].row_count, 2);
        assert_eq!(history[1].connection_id, item.id);

        assert!(matches!(
            svc.query_history("u2", &item.id).await,
            Err(AppError::ConnectionNotFound(_))
        ));
    }
}
