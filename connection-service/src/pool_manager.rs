//! Pool registry.
//!
//! Maps connection ids to live [`DatabasePool`] entries with an expiry.
//! Reads take the shared lock only; every mutation (insert, deactivate,
//! sweep, shutdown) closes and removes handles while holding the write lock,
//! so a handle returned by [`PoolManager::get_pool`] was never closed at the
//! time it was read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use common::errors::{AppError, AppResult};
use common::models::DbType;
use common::utils::cipher::{self, EncryptionKey};

use crate::drivers::DatabasePool;
use crate::store::ConnectionStore;

/// Opens a probed pool for a decrypted connection string.
#[async_trait]
pub trait PoolOpener: Send + Sync {
    async fn open(&self, db_type: DbType, conn_str: &str) -> AppResult<DatabasePool>;
}

struct PoolEntry {
    pool: DatabasePool,
    expires_at: Instant,
    user_id: String,
    db_type: DbType,
}

impl PoolEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// A live pool handed out to callers.
#[derive(Clone)]
pub struct ActivePool {
    pub pool: DatabasePool,
    pub db_type: DbType,
    pub user_id: String,
}

/// Per-id activation lock and the number of activations referencing it.
#[derive(Default)]
struct Gate {
    lock: Arc<AsyncMutex<()>>,
    holders: usize,
}

/// Registration on an id's gate, released on drop.
///
/// Dropping happens on every exit path of an activation, including when the
/// caller's future is cancelled mid-open, so the gate map never leaks.
struct ActivationTicket<'a> {
    manager: &'a PoolManager,
    id: &'a str,
    lock: Arc<AsyncMutex<()>>,
}

impl<'a> ActivationTicket<'a> {
    fn new(manager: &'a PoolManager, id: &'a str) -> Self {
        let mut gates = manager.activations.lock().unwrap_or_else(PoisonError::into_inner);
        let gate = gates.entry(id.to_string()).or_default();
        gate.holders += 1;
        Self {
            manager,
            id,
            lock: gate.lock.clone(),
        }
    }
}

impl Drop for ActivationTicket<'_> {
    fn drop(&mut self) {
        let mut gates = self
            .manager
            .activations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(gate) = gates.get_mut(self.id) {
            gate.holders = gate.holders.saturating_sub(1);
            if gate.holders == 0 {
                gates.remove(self.id);
            }
        }
    }
}

/// Registry of activated pools.
pub struct PoolManager {
    pools: RwLock<HashMap<String, PoolEntry>>,
    /// Per-id gates held for the duration of an activation.
    activations: Mutex<HashMap<String, Gate>>,
    store: Arc<dyn ConnectionStore>,
    opener: Arc<dyn PoolOpener>,
    encryption_key: EncryptionKey,
    ttl: Duration,
}

impl PoolManager {
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        opener: Arc<dyn PoolOpener>,
        encryption_key: EncryptionKey,
        ttl: Duration,
    ) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            activations: Mutex::new(HashMap::new()),
            store,
            opener,
            encryption_key,
            ttl,
        }
    }

    /// Returns the live pool for `id`.
    ///
    /// An expired entry is reported as `PoolNotFound` even if the sweep has
    /// not removed it yet.
    pub async fn get_pool(&self, id: &str) -> AppResult<ActivePool> {
        let pools = self.pools.read().await;
        match pools.get(id) {
            Some(entry) if !entry.is_expired(Instant::now()) => Ok(ActivePool {
                pool: entry.pool.clone(),
                db_type: entry.db_type,
                user_id: entry.user_id.clone(),
            }),
            _ => Err(AppError::PoolNotFound(id.to_string())),
        }
    }

    /// Opens a pool for `id` unless a live one exists.
    ///
    /// Concurrent first-time activations of one id share a single open: the
    /// later callers wait on the id's gate and then find the live entry.
    /// A live entry owned by another user is reported as `ConnectionNotFound`,
    /// the same answer the store gives for a connection the caller cannot see.
    pub async fn activate(&self, id: &str, db_type: DbType, user_id: &str) -> AppResult<()> {
        if self.is_live_for(id, user_id).await? {
            tracing::debug!(id = %id, "pool already active");
            return Ok(());
        }

        let ticket = ActivationTicket::new(self, id);
        let _held = ticket.lock.lock().await;
        self.activate_gated(id, db_type, user_id).await
    }

    async fn activate_gated(&self, id: &str, db_type: DbType, user_id: &str) -> AppResult<()> {
        if self.is_live_for(id, user_id).await? {
            return Ok(());
        }

        let sealed = self.store.get_connection_string(id, user_id).await?;
        let conn_str = cipher::decrypt(&sealed, &self.encryption_key)?;
        let pool = self.opener.open(db_type, &conn_str).await?;

        {
            let mut pools = self.pools.write().await;
            let entry = PoolEntry {
                db_type: pool.db_type(),
                pool,
                expires_at: Instant::now() + self.ttl,
                user_id: user_id.to_string(),
            };
            // Only an expired, unswept entry can be replaced here.
            if let Some(stale) = pools.insert(id.to_string(), entry) {
                stale.pool.close().await;
            }
        }

        if let Err(e) = self.store.set_active(id, user_id, true).await {
            tracing::warn!(id = %id, error = %e, "failed to mark connection active");
        }
        tracing::info!(id = %id, db_type = %db_type, user_id = %user_id, "pool activated");
        Ok(())
    }

    /// Closes and removes the pool for `id`. Returns whether one existed.
    pub async fn deactivate(&self, id: &str) -> bool {
        let removed = {
            let mut pools = self.pools.write().await;
            let removed = pools.remove(id);
            if let Some(entry) = &removed {
                entry.pool.close().await;
            }
            removed
        };

        let Some(entry) = removed else {
            return false;
        };
        if let Err(e) = self.store.set_active(id, &entry.user_id, false).await {
            tracing::warn!(id = %id, error = %e, "failed to mark connection inactive");
        }
        tracing::info!(id = %id, "pool deactivated");
        true
    }

    /// Closes every pool owned by `user_id`. Returns how many were closed.
    pub async fn deactivate_user(&self, user_id: &str) -> usize {
        let closed = {
            let mut pools = self.pools.write().await;
            let ids: Vec<String> = pools
                .iter()
                .filter(|(_, e)| e.user_id == user_id)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                if let Some(entry) = pools.remove(id) {
                    entry.pool.close().await;
                }
            }
            ids.len()
        };

        if let Err(e) = self.store.set_all_inactive_for_user(user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "failed to mark connections inactive");
        }
        tracing::info!(user_id = %user_id, count = closed, "user pools deactivated");
        closed
    }

    /// Closes and removes expired entries. Returns how many were reclaimed.
    pub async fn sweep(&self) -> usize {
        let mut pools = self.pools.write().await;
        let now = Instant::now();
        let expired: Vec<String> = pools
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            let Some(entry) = pools.remove(id) else {
                continue;
            };
            if let Err(e) = self.store.set_active(id, &entry.user_id, false).await {
                tracing::warn!(id = %id, error = %e, "failed to mark expired connection inactive");
            }
            entry.pool.close().await;
            tracing::info!(id = %id, "expired pool closed");
        }
        expired.len()
    }

    /// Closes every pool regardless of expiry.
    pub async fn shutdown_all(&self) {
        let count = {
            let mut pools = self.pools.write().await;
            let count = pools.len();
            for (_, entry) in pools.drain() {
                entry.pool.close().await;
            }
            count
        };

        if let Err(e) = self.store.set_all_inactive().await {
            tracing::warn!(error = %e, "failed to mark connections inactive on shutdown");
        }
        tracing::info!(count, "all pools closed");
    }

    /// Number of live, unexpired entries.
    pub async fn active_count(&self) -> usize {
        let now = Instant::now();
        self.pools
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// Whether `id` has a live entry owned by `user_id`.
    async fn is_live_for(&self, id: &str, user_id: &str) -> AppResult<bool> {
        let pools = self.pools.read().await;
        match pools.get(id) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                if entry.user_id == user_id {
                    Ok(true)
                } else {
                    Err(AppError::ConnectionNotFound(id.to_string()))
                }
            }
            _ => Ok(false),
        }
    }

    #[cfg(test)]
    fn pending_gates(&self) -> usize {
        self.activations.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
