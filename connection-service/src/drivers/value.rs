//! Row and document conversion to JSON records.
//!
//! Values are decoded by the column's type name. Anything without a natural
//! JSON representation is rendered as text; 16-byte binaries are tried as
//! UUIDs first.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use mongodb::bson::{Bson, Document};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};
use uuid::Uuid;

use common::models::Record;

const ISO_DATETIME: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Decodes a nullable column, treating decode failures as NULL.
fn decode<'r, R, T>(row: &'r R, index: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(index).ok().flatten()
}

fn int<T: Into<i64>>(v: T) -> Value {
    Value::from(v.into())
}

fn float<T: Into<f64>>(v: T) -> Value {
    Value::from(v.into())
}

/// Renders bytes as UUID text when exactly 16 long, base64 otherwise.
pub fn bytes_value(bytes: &[u8]) -> Value {
    match Uuid::from_slice(bytes) {
        Ok(uuid) => Value::String(uuid.to_string()),
        Err(_) => Value::String(STANDARD.encode(bytes)),
    }
}

// ============== PostgreSQL ==============

pub fn pg_row_to_record(row: &PgRow) -> Record {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| (col.name().to_string(), pg_value(row, i, col.type_info().name())))
        .collect()
}

fn pg_value(row: &PgRow, i: usize, type_name: &str) -> Value {
    let value = match type_name {
        "BOOL" => decode::<_, bool>(row, i).map(Value::Bool),
        "INT2" => decode::<_, i16>(row, i).map(int),
        "INT4" => decode::<_, i32>(row, i).map(int),
        "INT8" => decode::<_, i64>(row, i).map(int),
        "OID" => decode::<_, sqlx::postgres::types::Oid>(row, i).map(|v| int(v.0)),
        "FLOAT4" => decode::<_, f32>(row, i).map(float),
        "FLOAT8" => decode::<_, f64>(row, i).map(float),
        "NUMERIC" => decode::<_, Decimal>(row, i).map(|v| Value::String(v.to_string())),
        "UUID" => decode::<_, Uuid>(row, i).map(|v| Value::String(v.to_string())),
        "JSON" | "JSONB" => decode::<_, Value>(row, i),
        "TIMESTAMPTZ" => decode::<_, DateTime<Utc>>(row, i).map(|v| Value::String(v.to_rfc3339())),
        "TIMESTAMP" => decode::<_, NaiveDateTime>(row, i)
            .map(|v| Value::String(v.format(ISO_DATETIME).to_string())),
        "DATE" => decode::<_, NaiveDate>(row, i).map(|v| Value::String(v.to_string())),
        "TIME" => decode::<_, NaiveTime>(row, i).map(|v| Value::String(v.to_string())),
        "BYTEA" => decode::<_, Vec<u8>>(row, i).map(|v| bytes_value(&v)),
        "TEXT[]" | "VARCHAR[]" => decode::<_, Vec<String>>(row, i)
            .map(|v| Value::Array(v.into_iter().map(Value::String).collect())),
        "INT4[]" => decode::<_, Vec<i32>>(row, i)
            .map(|v| Value::Array(v.into_iter().map(int).collect())),
        "INT8[]" => decode::<_, Vec<i64>>(row, i)
            .map(|v| Value::Array(v.into_iter().map(int).collect())),
        _ => text_fallback(row, i),
    };
    value.unwrap_or(Value::Null)
}

// ============== MySQL ==============

pub fn mysql_row_to_record(row: &MySqlRow) -> Record {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| (col.name().to_string(), mysql_value(row, i, col.type_info().name())))
        .collect()
}

fn mysql_value(row: &MySqlRow, i: usize, type_name: &str) -> Value {
    let value = match type_name {
        "BOOLEAN" | "BOOL" => decode::<_, bool>(row, i).map(Value::Bool),
        "TINYINT" => decode::<_, i8>(row, i).map(int),
        "TINYINT UNSIGNED" => decode::<_, u8>(row, i).map(int),
        "SMALLINT" => decode::<_, i16>(row, i).map(int),
        "SMALLINT UNSIGNED" => decode::<_, u16>(row, i).map(int),
        "MEDIUMINT" | "INT" | "INTEGER" => decode::<_, i32>(row, i).map(int),
        "MEDIUMINT UNSIGNED" | "INT UNSIGNED" | "INTEGER UNSIGNED" => {
            decode::<_, u32>(row, i).map(int)
        }
        "BIGINT" => decode::<_, i64>(row, i).map(int),
        "BIGINT UNSIGNED" => decode::<_, u64>(row, i).map(Value::from),
        "FLOAT" => decode::<_, f32>(row, i).map(float),
        "DOUBLE" | "DOUBLE PRECISION" | "REAL" => decode::<_, f64>(row, i).map(float),
        "DECIMAL" | "NUMERIC" => decode::<_, Decimal>(row, i).map(|v| Value::String(v.to_string())),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            decode::<_, Vec<u8>>(row, i).map(|v| bytes_value(&v))
        }
        "DATE" => decode::<_, NaiveDate>(row, i).map(|v| Value::String(v.to_string())),
        "TIME" => decode::<_, NaiveTime>(row, i).map(|v| Value::String(v.to_string())),
        "DATETIME" => decode::<_, NaiveDateTime>(row, i)
            .map(|v| Value::String(v.format(ISO_DATETIME).to_string())),
        "TIMESTAMP" => decode::<_, DateTime<Utc>>(row, i).map(|v| Value::String(v.to_rfc3339())),
        "YEAR" => decode::<_, u16>(row, i)
            .map(int)
            .or_else(|| text_fallback(row, i)),
        "JSON" => decode::<_, Value>(row, i),
        _ => text_fallback(row, i),
    };
    value.unwrap_or(Value::Null)
}

// ============== SQLite ==============

pub fn sqlite_row_to_record(row: &SqliteRow) -> Record {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| (col.name().to_string(), sqlite_value(row, i)))
        .collect()
}

/// SQLite is dynamically typed, so the stored value's class decides.
fn sqlite_value(row: &SqliteRow, i: usize) -> Value {
    let storage = match row.try_get_raw(i) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };
    let value = match storage.as_str() {
        "INTEGER" => decode::<_, i64>(row, i).map(int),
        "REAL" => decode::<_, f64>(row, i).map(float),
        "BLOB" => decode::<_, Vec<u8>>(row, i).map(|v| bytes_value(&v)),
        _ => text_fallback(row, i),
    };
    value.unwrap_or(Value::Null)
}

/// Last resort: the checked string decode, then an unchecked one for
/// text-encoded types the driver does not know about (enums, domains).
fn text_fallback<R>(row: &R, i: usize) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> String: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<String>, _>(i)
        .or_else(|_| row.try_get_unchecked::<Option<String>, _>(i))
        .ok()
        .flatten()
        .map(Value::String)
}

// ============== MongoDB ==============

pub fn document_to_record(doc: Document) -> Record {
    doc.into_iter().map(|(k, v)| (k, bson_to_json(v))).collect()
}

pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(v) => int(v),
        Bson::Int64(v) => int(v),
        Bson::Double(v) => float(v),
        Bson::String(s) => Value::String(s),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::Binary(bin) if bin.bytes.len() == 16 => bytes_value(&bin.bytes),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .map(Value::String)
            .unwrap_or_else(|_| int(dt.timestamp_millis())),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Document(doc) => Value::Object(document_to_record(doc)),
        other => other.into_relaxed_extjson(),
    }
}

/// BSON type name used when inferring collection schemas.
pub fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Null | Bson::Undefined => "null",
        Bson::Boolean(_) => "bool",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Double(_) => "double",
        Bson::Decimal128(_) => "decimal",
        Bson::String(_) => "string",
        Bson::ObjectId(_) => "objectId",
        Bson::Binary(_) => "binData",
        Bson::DateTime(_) => "date",
        Bson::Timestamp(_) => "timestamp",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::RegularExpression(_) => "regex",
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => "javascript",
        Bson::Symbol(_) => "symbol",
        Bson::MaxKey => "maxKey",
        Bson::MinKey => "minKey",
        Bson::DbPointer(_) => "dbPointer",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId, spec::BinarySubtype, Binary};

    #[test]
    fn test_sixteen_bytes_render_as_uuid() {
        let uuid = Uuid::new_v4();
        assert_eq!(bytes_value(uuid.as_bytes()), Value::String(uuid.to_string()));
        assert_eq!(bytes_value(b"abc"), Value::String("YWJj".to_string()));
    }

    #[test]
    fn test_document_conversion() {
        let oid = ObjectId::new();
        let uuid = Uuid::new_v4();
        let record = document_to_record(doc! {
            "_id": oid,
            "n": 3_i32,
            "ok": true,
            "tags": ["a", "b"],
            "ref": Binary { subtype: BinarySubtype::Uuid, bytes: uuid.as_bytes().to_vec() },
            "nested": { "x": 1.5 },
        });
        assert_eq!(record["_id"], Value::String(oid.to_hex()));
        assert_eq!(record["n"], Value::from(3));
        assert_eq!(record["ok"], Value::Bool(true));
        assert_eq!(record["tags"], serde_json::json!(["a", "b"]));
        assert_eq!(record["ref"], Value::String(uuid.to_string()));
        assert_eq!(record["nested"]["x"], Value::from(1.5));
    }

    #[test]
    fn test_bson_type_names() {
        assert_eq!(bson_type_name(&Bson::String("x".into())), "string");
        assert_eq!(bson_type_name(&Bson::ObjectId(ObjectId::new())), "objectId");
    }
}
