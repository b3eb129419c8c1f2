//! Connection models.
//!
//! Contains the backend tag, the structured connection form understood by the
//! connection string codec, and the persisted connection descriptor.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::errors::AppError;

/// Supported database backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub enum DbType {
    /// PostgreSQL database.
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgres,
    /// MySQL database.
    #[serde(rename = "mysql")]
    MySQL,
    /// SQLite database file.
    #[serde(rename = "sqlite")]
    SQLite,
    /// MongoDB deployment.
    #[serde(rename = "mongodb")]
    MongoDB,
}

impl DbType {
    /// Returns the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            DbType::Postgres => Some(5432),
            DbType::MySQL => Some(3306),
            DbType::SQLite => None,
            DbType::MongoDB => Some(27017),
        }
    }

    /// Canonical tag stored alongside persisted connections.
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Postgres => "postgresql",
            DbType::MySQL => "mysql",
            DbType::SQLite => "sqlite",
            DbType::MongoDB => "mongodb",
        }
    }
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DbType::Postgres),
            "mysql" => Ok(DbType::MySQL),
            "sqlite" => Ok(DbType::SQLite),
            "mongodb" => Ok(DbType::MongoDB),
            other => Err(AppError::UnsupportedDbType(other.to_string())),
        }
    }
}

/// Structured connection details, the input and output of the codec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ConnectionForm {
    /// Server host; defaults to `localhost`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Server port; defaults to the backend's standard port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub username: String,
    /// Never serialized back to clients.
    #[serde(skip_serializing)]
    pub password: String,
    pub db_name: String,
    /// TLS requested (`sslmode=require`, `tls=true`, `ssl=true`).
    pub ssl: bool,
    /// Absolute path of a SQLite file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Use a `mongodb+srv://` seed list.
    pub is_srv: bool,
}

/// Request body for creating a new connection.
///
/// Exactly one of `conn_string` and `form` must be given.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateConnectionRequest {
    /// Connection display name.
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    /// Database type.
    pub db_type: DbType,
    /// Free-text connection string.
    pub conn_string: Option<String>,
    /// Structured connection details.
    pub form: Option<ConnectionForm>,
}

/// Request body for testing a connection without saving it.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TestConnectionRequest {
    pub db_type: DbType,
    pub conn_string: Option<String>,
    pub form: Option<ConnectionForm>,
}

/// Request body for parsing a connection string into its form.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ParseConnectionStringRequest {
    pub db_type: DbType,
    #[validate(length(min = 1, message = "Connection string is required"))]
    pub conn_string: String,
}

/// Query parameters for activation.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ActivateParams {
    pub db_type: DbType,
}

/// Persisted connection record.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub db_type: DbType,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub db_name: Option<String>,
    pub file_path: Option<String>,
    /// Canonical connection string sealed with the credential cipher.
    pub encrypted_conn_string: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ConnectionDescriptor {
    /// Whether `other` points at the same target under the same name.
    pub fn is_duplicate_of(&self, other: &ConnectionDescriptor) -> bool {
        if self.user_id != other.user_id
            || self.name != other.name
            || self.db_type != other.db_type
        {
            return false;
        }
        match self.db_type {
            DbType::SQLite => self.file_path == other.file_path,
            _ => {
                self.host == other.host
                    && self.port == other.port
                    && self.username == other.username
            }
        }
    }
}

/// Connection item for API responses (excludes sensitive data).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionItem {
    /// Unique connection identifier.
    pub id: String,
    /// Connection display name.
    pub name: String,
    /// Database type.
    pub db_type: DbType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Whether a pool is (or was last) active for this connection.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<ConnectionDescriptor> for ConnectionItem {
    fn from(d: ConnectionDescriptor) -> Self {
        Self {
            id: d.id,
            name: d.name,
            db_type: d.db_type,
            host: d.host,
            port: d.port,
            username: d.username,
            db_name: d.db_name,
            file_path: d.file_path,
            is_active: d.is_active,
            created_at: d.created_at,
        }
    }
}
