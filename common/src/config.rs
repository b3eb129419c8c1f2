//! Service configuration.
//!
//! All settings come from environment variables. `load_with_service` is the
//! entry point used by binaries; `from_lookup` takes an arbitrary lookup
//! function so tests do not have to mutate the process environment.

use std::str::FromStr;
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::utils::cipher::EncryptionKey;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8081;
const DEFAULT_POOL_TTL_SECS: u64 = 3600;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Pool sizing knobs applied to every backend pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Max open connections (SQL) or max pool size (MongoDB).
    pub max_open_conns: u32,
    /// Connections kept warm; capped at `max_open_conns`.
    pub max_idle_conns: u32,
    pub conn_max_lifetime: Duration,
    pub conn_max_idle_time: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open_conns: 10,
            max_idle_conns: 5,
            conn_max_lifetime: Duration::from_secs(1800),
            conn_max_idle_time: Duration::from_secs(300),
        }
    }
}

impl PoolConfig {
    /// Minimum pool size derived from the idle setting.
    pub fn min_connections(&self) -> u32 {
        self.max_idle_conns.min(self.max_open_conns)
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub service_name: String,
    pub host: String,
    pub port: u16,
    /// MySQL URL of the connection metadata store. `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub encryption_key: EncryptionKey,
    pub pool: PoolConfig,
    /// Lifetime of an activated pool entry.
    pub pool_ttl: Duration,
    /// Period of the cleanup sweep.
    pub cleanup_interval: Duration,
}

impl AppConfig {
    /// Loads configuration for the named service from the process environment.
    ///
    /// # Errors
    /// Fails when `ENCRYPTION_KEY` is missing or not 32 bytes, or when a
    /// numeric variable cannot be parsed.
    pub fn load_with_service(service_name: &str) -> AppResult<Self> {
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(service_name: &str, lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key_b64 = lookup("ENCRYPTION_KEY")
            .ok_or_else(|| AppError::Config("ENCRYPTION_KEY is not set".into()))?;
        let encryption_key = EncryptionKey::from_base64(key_b64.trim())?;

        let defaults = PoolConfig::default();
        let pool = PoolConfig {
            max_open_conns: parse_or(&lookup, "DB_MAX_OPEN_CONNS", defaults.max_open_conns)?,
            max_idle_conns: parse_or(&lookup, "DB_MAX_IDLE_CONNS", defaults.max_idle_conns)?,
            conn_max_lifetime: secs_or(
                &lookup,
                "DB_CONN_MAX_LIFETIME_SECS",
                defaults.conn_max_lifetime.as_secs(),
            )?,
            conn_max_idle_time: secs_or(
                &lookup,
                "DB_CONN_MAX_IDLE_TIME_SECS",
                defaults.conn_max_idle_time.as_secs(),
            )?,
        };
        if pool.max_open_conns == 0 {
            return Err(AppError::Config("DB_MAX_OPEN_CONNS must be at least 1".into()));
        }

        let cleanup_interval =
            secs_or(&lookup, "CLEANUP_INTERVAL_SECS", DEFAULT_CLEANUP_INTERVAL_SECS)?;
        if cleanup_interval.is_zero() {
            return Err(AppError::Config("CLEANUP_INTERVAL_SECS must be positive".into()));
        }

        Ok(Self {
            service_name: service_name.to_string(),
            host: lookup("SERVER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&lookup, "SERVER_PORT", DEFAULT_PORT)?,
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            encryption_key,
            pool,
            pool_ttl: secs_or(&lookup, "POOL_TTL_SECS", DEFAULT_POOL_TTL_SECS)?,
            cleanup_interval,
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: u64) -> AppResult<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // base64 of 32 bytes of 0x2a
    const KEY: &str = "KioqKioqKioqKioqKioqKioqKioqKioqKioqKioqKio=";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::from_lookup("svc", lookup(&[("ENCRYPTION_KEY", KEY)])).unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(config.pool_ttl, Duration::from_secs(3600));
        assert_eq!(config.pool.max_open_conns, 10);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_missing_key_fails_fast() {
        let err = AppConfig::from_lookup("svc", lookup(&[])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_short_key_rejected() {
        let err = AppConfig::from_lookup("svc", lookup(&[("ENCRYPTION_KEY", "c2hvcnQ=")]))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidEncryptionKey(_)));
    }

    #[test]
    fn test_bad_number_is_error() {
        let err = AppConfig::from_lookup(
            "svc",
            lookup(&[("ENCRYPTION_KEY", KEY), ("POOL_TTL_SECS", "soon")]),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_min_connections_capped() {
        let pool = PoolConfig {
            max_open_conns: 2,
            max_idle_conns: 8,
            ..Default::default()
        };
        assert_eq!(pool.min_connections(), 2);
    }
}
