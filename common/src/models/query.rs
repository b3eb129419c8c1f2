//! Query and record models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// One row or document, keyed by column or field name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Request body for executing a query.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct QueryRequest {
    /// SQL text, or a collection name for MongoDB.
    #[validate(length(min = 1, message = "Query text is required"))]
    pub query: String,

    /// Database to use (MongoDB only; defaults to the connection's database).
    #[serde(default)]
    pub db_name: Option<String>,
}

/// Optional database name for table/collection operations.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct DbNameParams {
    pub db_name: Option<String>,
}

/// Rows or documents returned by a record listing or query.
#[derive(Debug, Serialize, ToSchema)]
pub struct QueryResult {
    #[schema(value_type = Vec<Object>)]
    pub records: Vec<Record>,

    /// Number of records returned.
    pub row_count: usize,

    /// Execution time in milliseconds.
    pub execution_time_ms: u64,
}

/// One executed query, kept per connection.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryHistoryEntry {
    pub id: String,
    pub connection_id: String,
    pub user_id: String,
    /// Query text as submitted.
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    /// Rows returned; zero for failed queries.
    pub row_count: u64,
    pub execution_time_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl QueryResult {
    pub fn new(records: Vec<Record>, execution_time_ms: u64) -> Self {
        Self {
            row_count: records.len(),
            records,
            execution_time_ms,
        }
    }
}
