//! Background sweep of expired pools.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::pool_manager::PoolManager;

/// Spawns the cleanup loop. It runs until the returned handle is aborted.
///
/// Each tick awaits its sweep before the next tick is polled, and missed
/// ticks are delayed rather than bursted, so sweeps never overlap.
pub fn spawn_cleanup(manager: Arc<PoolManager>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        tracing::info!(interval_secs = every.as_secs(), "pool cleanup scheduler started");
        loop {
            ticker.tick().await;
            let reclaimed = manager.sweep().await;
            if reclaimed > 0 {
                tracing::info!(reclaimed, "cleanup sweep finished");
            } else {
                tracing::debug!("cleanup sweep found nothing to reclaim");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use common::errors::AppResult;
    use common::models::{ConnectionDescriptor, DbType};
    use common::utils::cipher::{self, EncryptionKey};

    use super::*;
    use crate::drivers::DatabasePool;
    use crate::pool_manager::PoolOpener;
    use crate::store::{ConnectionStore, InMemoryConnectionStore};

    struct SqliteOpener;

    #[async_trait]
    impl PoolOpener for SqliteOpener {
        async fn open(&self, _: DbType, conn_str: &str) -> AppResult<DatabasePool> {
            DatabasePool::open(DbType::SQLite, conn_str, &Default::default()).await
        }
    }

    #[tokio::test]
    async fn test_scheduler_reclaims_expired_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.db").to_str().unwrap().to_string();
        let key = EncryptionKey::from_bytes(&[1u8; 32]).unwrap();

        let store = Arc::new(InMemoryConnectionStore::new());
        store
            .insert(&ConnectionDescriptor {
                id: "c1".into(),
                user_id: "u1".into(),
                name: "s".into(),
                db_type: DbType::SQLite,
                host: None,
                port: None,
                username: None,
                db_name: None,
                file_path: Some(path.clone()),
                encrypted_conn_string: cipher::encrypt(&path, &key).unwrap(),
                is_active: false,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let manager = Arc::new(PoolManager::new(
            store.clone(),
            Arc::new(SqliteOpener),
            key,
            Duration::from_millis(40),
        ));
        manager.activate("c1", DbType::SQLite, "u1").await.unwrap();
        let handle = manager.get_pool("c1").await.unwrap();

        let task = spawn_cleanup(manager.clone(), Duration::from_millis(25));
        tokio::time::sleep(Duration::from_millis(200)).await;
        task.abort();

        assert!(handle.pool.is_closed());
        assert!(!store.get("c1", "u1").await.unwrap().is_active);
    }
}
