//! Row decoding into JSON records.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Backend-specific decoders pick the Rust type sqlx can decode for that category
//!
//! Decoding is lossless where JSON allows: exact decimals stay strings, binary data
//! becomes UTF-8 text when possible and base64 otherwise.

use crate::models::{DatabaseType, Row as JsonRow};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Uuid,
    Text,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity stores integers and reals, never exact decimals
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // varchar, text, char, date, time, enum ...
    TypeCategory::Text
}

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Binary column value: UTF-8 text when it decodes cleanly, base64 otherwise.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

/// Trait for converting database rows to JSON records.
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .map(|col| {
                let category = categorize_type(col.type_info().name(), DatabaseType::MySQL);
                let value = mysql::decode_column(self, col.ordinal(), category);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .map(|col| {
                let category = categorize_type(col.type_info().name(), DatabaseType::PostgreSQL);
                let value = postgres::decode_column(self, col.ordinal(), category);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .map(|col| {
                let idx = col.ordinal();
                // Expression columns (COUNT(*), literals) carry no declared type;
                // fall back to the storage class of the value itself.
                let declared = col.type_info();
                let type_name = if declared.is_null() {
                    self.try_get_raw(idx)
                        .map(|v| v.type_info().name().to_string())
                        .unwrap_or_default()
                } else {
                    declared.name().to_string()
                };
                let category = categorize_type(&type_name, DatabaseType::SQLite);
                (col.name().to_string(), sqlite::decode_column(self, idx, category))
            })
            .collect()
    }
}

// =============================================================================
// Shared decoders
// =============================================================================

fn get_opt<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn decode_boolean<R>(row: &R, idx: usize) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> bool: Decode<'r, R::Database> + Type<R::Database>,
{
    get_opt::<R, bool>(row, idx)
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn decode_float<R>(row: &R, idx: usize) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> f64: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> f32: Decode<'r, R::Database> + Type<R::Database>,
{
    if let Some(v) = get_opt::<R, f64>(row, idx) {
        return float_value(v);
    }
    get_opt::<R, f32>(row, idx)
        .map(|v| float_value(v as f64))
        .unwrap_or(JsonValue::Null)
}

fn decode_binary<R>(row: &R, idx: usize) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
{
    get_opt::<R, Vec<u8>>(row, idx)
        .map(|v| decode_binary_value(&v))
        .unwrap_or(JsonValue::Null)
}

fn decode_text<R>(row: &R, idx: usize) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> String: Decode<'r, R::Database> + Type<R::Database>,
{
    get_opt::<R, String>(row, idx)
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}

fn decode_json<R>(row: &R, idx: usize) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> JsonValue: Decode<'r, R::Database> + Type<R::Database>,
{
    get_opt::<R, JsonValue>(row, idx).unwrap_or(JsonValue::Null)
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            // Text-typed values may arrive as VARBINARY depending on the charset
            _ => match decode_text(row, idx) {
                JsonValue::Null => decode_binary(row, idx),
                v => v,
            },
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Some(v) = get_opt::<_, i64>(row, idx) {
            return v.into();
        }
        if let Some(v) = get_opt::<_, u64>(row, idx) {
            return v.into();
        }
        if let Some(v) = get_opt::<_, i32>(row, idx) {
            return v.into();
        }
        if let Some(v) = get_opt::<_, u32>(row, idx) {
            return v.into();
        }
        if let Some(v) = get_opt::<_, i16>(row, idx) {
            return v.into();
        }
        if let Some(v) = get_opt::<_, u16>(row, idx) {
            return v.into();
        }
        if let Some(v) = get_opt::<_, i8>(row, idx) {
            return v.into();
        }
        get_opt::<_, u8>(row, idx)
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid | TypeCategory::Text => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Some(v) = get_opt::<_, i64>(row, idx) {
            return v.into();
        }
        if let Some(v) = get_opt::<_, i32>(row, idx) {
            return v.into();
        }
        get_opt::<_, i16>(row, idx)
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Integer => get_opt::<_, i64>(row, idx)
                .map(JsonValue::from)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => match decode_text(row, idx) {
                JsonValue::String(s) => serde_json::from_str(&s).unwrap_or(JsonValue::String(s)),
                other => other,
            },
            TypeCategory::Uuid | TypeCategory::Text => decode_text(row, idx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INTEGER", DatabaseType::SQLite),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_fallbacks() {
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("BLOB", DatabaseType::SQLite),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("timestamptz", DatabaseType::PostgreSQL),
            TypeCategory::Text
        );
    }

    #[test]
    fn test_decode_binary_value() {
        assert_eq!(
            decode_binary_value(b"hello world"),
            JsonValue::String("hello world".to_string())
        );
        assert_eq!(
            decode_binary_value(&[0xFF, 0xFE, 0x00, 0x01]),
            JsonValue::String("//4AAQ==".to_string())
        );
    }

    #[tokio::test]
    async fn test_sqlite_rows_to_json() {
        use sqlx::Executor;

        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        pool.execute("CREATE TABLE t (id INTEGER, name TEXT, score REAL, data BLOB)")
            .await
            .unwrap();
        pool.execute("INSERT INTO t VALUES (1, 'a', 1.5, x'6869'), (2, NULL, NULL, NULL)")
            .await
            .unwrap();

        let rows = pool.fetch_all("SELECT * FROM t ORDER BY id").await.unwrap();
        let first = rows[0].to_json_map();
        assert_eq!(first["id"], 1);
        assert_eq!(first["name"], "a");
        assert_eq!(first["score"], 1.5);
        assert_eq!(first["data"], "hi");
        let second = rows[1].to_json_map();
        assert_eq!(second["name"], JsonValue::Null);

        let count = pool.fetch_one("SELECT COUNT(*) AS n FROM t").await.unwrap();
        assert_eq!(count.to_json_map()["n"], 2);
    }
}
