//! Table schema models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One column as reported by the catalog queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_key_table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_key_column: Option<String>,
    pub is_unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub indexes: Vec<String>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            ..Default::default()
        }
    }
}

/// Request body for the bulk schema listing. An empty list means every table.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct TablesSchemaRequest {
    pub tables: Vec<String>,
    pub db_name: Option<String>,
}

/// Bulk schema listing result.
///
/// Tables whose catalog queries failed are reported in `failures` and do not
/// affect the others.
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct TablesSchema {
    pub tables: BTreeMap<String, Vec<ColumnSchema>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
}
