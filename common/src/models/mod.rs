//! Shared data models.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{
    ActivateParams, ConnectionDescriptor, ConnectionForm, ConnectionItem,
    CreateConnectionRequest, DbType, ParseConnectionStringRequest, TestConnectionRequest,
};
pub use query::{DbNameParams, QueryHistoryEntry, QueryRequest, QueryResult, Record};
pub use schema::{ColumnSchema, TablesSchema, TablesSchemaRequest};
