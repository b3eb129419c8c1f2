//! Application error types.
//!
//! Every fallible operation in the workspace returns [`AppResult`]. The
//! HTTP status mapping lives here as well so handlers can use `?` directly.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::response::ApiResponse;

/// Result alias used across all crates.
pub type AppResult<T> = Result<T, AppError>;

/// Application error taxonomy.
#[derive(Debug, Error)]
pub enum AppError {
    /// The backend tag is not one of postgresql, mysql, sqlite, mongodb.
    #[error("unsupported database type: {0}")]
    UnsupportedDbType(String),

    /// A required delimiter or component is missing from a connection string.
    #[error("malformed connection string: {0}")]
    MalformedConnectionString(String),

    /// SQLite file path is empty or relative.
    #[error("invalid sqlite file path: {0}")]
    InvalidPath(String),

    /// Pool could not be opened or failed its liveness probe.
    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    /// No live, unexpired pool for the connection id.
    #[error("no active pool for connection {0}")]
    PoolNotFound(String),

    /// Ciphertext could not be decoded or failed authentication.
    #[error("failed to decrypt credentials")]
    DecryptFailed,

    /// Key material is not exactly 32 bytes or not valid base64.
    #[error("invalid encryption key: {0}")]
    InvalidEncryptionKey(String),

    /// An operation exceeded its deadline.
    #[error("operation timed out after {0}s")]
    Timeout(u64),

    /// A catalog query failed for one table.
    #[error("catalog query failed for table {table}: {message}")]
    CatalogQueryFailed { table: String, message: String },

    /// A user query or record listing failed.
    #[error("query failed: {0}")]
    Query(String),

    /// A table or collection name is not in the fetched table list.
    #[error("unknown table or collection: {0}")]
    InvalidIdentifier(String),

    /// The persisted connection does not exist for this user.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// A connection with the same name and target already exists.
    #[error("connection already exists: {0}")]
    DuplicateConnection(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("missing or invalid caller identity")]
    Unauthorized,

    /// Metadata store failure.
    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::UnsupportedDbType(_) => "UNSUPPORTED_DB_TYPE",
            AppError::MalformedConnectionString(_) => "MALFORMED_CONNECTION_STRING",
            AppError::InvalidPath(_) => "INVALID_PATH",
            AppError::ConnectFailed(_) => "CONNECT_FAILED",
            AppError::PoolNotFound(_) => "POOL_NOT_FOUND",
            AppError::DecryptFailed => "DECRYPT_FAILED",
            AppError::InvalidEncryptionKey(_) => "INVALID_ENCRYPTION_KEY",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::CatalogQueryFailed { .. } => "CATALOG_QUERY_FAILED",
            AppError::Query(_) => "QUERY_FAILED",
            AppError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            AppError::ConnectionNotFound(_) => "CONNECTION_NOT_FOUND",
            AppError::DuplicateConnection(_) => "DUPLICATE_CONNECTION",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::UnsupportedDbType(_)
            | AppError::MalformedConnectionString(_)
            | AppError::InvalidPath(_)
            | AppError::InvalidIdentifier(_)
            | AppError::Validation(_)
            | AppError::Query(_) => StatusCode::BAD_REQUEST,
            AppError::PoolNotFound(_) | AppError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateConnection(_) => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::ConnectFailed(_) | AppError::CatalogQueryFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::DecryptFailed
            | AppError::InvalidEncryptionKey(_)
            | AppError::Store(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }
        (status, Json(ApiResponse::err(self.code(), self.to_string()))).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}
