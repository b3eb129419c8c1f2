//! Application state for connection service.

use std::sync::Arc;

use common::config::AppConfig;

use crate::drivers::DriverOpener;
use crate::pool_manager::{PoolManager, PoolOpener};
use crate::service::{ConnectionService, ConnectionServiceTrait};
use crate::store::ConnectionStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pool_manager: Arc<PoolManager>,
    pub service: Arc<dyn ConnectionServiceTrait>,
}

impl AppState {
    /// Wires the pool registry and connection service over `store`.
    pub fn new(config: AppConfig, store: Arc<dyn ConnectionStore>) -> Self {
        let opener: Arc<dyn PoolOpener> = Arc::new(DriverOpener::new(config.pool.clone()));
        let pool_manager = Arc::new(PoolManager::new(
            store.clone(),
            opener.clone(),
            config.encryption_key.clone(),
            config.pool_ttl,
        ));
        let service = Arc::new(ConnectionService::new(
            store,
            pool_manager.clone(),
            opener,
            config.encryption_key.clone(),
        ));

        Self {
            config,
            pool_manager,
            service,
        }
    }
}
