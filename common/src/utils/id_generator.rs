//! Unique ID generator.

use uuid::Uuid;

/// Generates unique identifiers for persisted entities.
pub struct IdGenerator;

impl IdGenerator {
    /// Generates a unique connection ID.
    pub fn connection_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Generates a query history entry ID.
    pub fn history_id() -> String {
        Uuid::new_v4().simple().to_string()
    }
}
