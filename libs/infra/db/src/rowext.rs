//! Small helpers for pulling typed values out of a `libsql::Row` by column
//! index, since libSQL hands back `Value` rather than implementing `FromSql`
//! for our domain types directly.

use chrono::{DateTime, Utc};
use libsql::Row;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::errors::DbError;

pub fn get_str(row: &Row, idx: i32) -> Result<String, DbError> {
    row.get::<String>(idx).map_err(|e| DbError::Mapping(e.to_string()))
}

pub fn get_opt_str(row: &Row, idx: i32) -> Result<Option<String>, DbError> {
    row.get::<Option<String>>(idx).map_err(|e| DbError::Mapping(e.to_string()))
}

pub fn get_uuid(row: &Row, idx: i32) -> Result<Uuid, DbError> {
    let raw = get_str(row, idx)?;
    Uuid::parse_str(&raw).map_err(|e| DbError::Mapping(format!("invalid uuid {raw}: {e}")))
}

pub fn get_opt_uuid(row: &Row, idx: i32) -> Result<Option<Uuid>, DbError> {
    match get_opt_str(row, idx)? {
        Some(raw) => Uuid::parse_str(&raw)
            .map(Some)
            .map_err(|e| DbError::Mapping(format!("invalid uuid {raw}: {e}"))),
        None => Ok(None),
    }
}

pub fn get_datetime(row: &Row, idx: i32) -> Result<DateTime<Utc>, DbError> {
    let raw = get_str(row, idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Mapping(format!("invalid timestamp {raw}: {e}")))
}

pub fn get_opt_datetime(row: &Row, idx: i32) -> Result<Option<DateTime<Utc>>, DbError> {
    match get_opt_str(row, idx)? {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| DbError::Mapping(format!("invalid timestamp {raw}: {e}"))),
        None => Ok(None),
    }
}

pub fn get_json<T: DeserializeOwned>(row: &Row, idx: i32) -> Result<T, DbError> {
    let raw = get_str(row, idx)?;
    serde_json::from_str(&raw).map_err(|e| DbError::Mapping(format!("invalid json: {e}")))
}

pub fn get_i64(row: &Row, idx: i32) -> Result<i64, DbError> {
    row.get::<i64>(idx).map_err(|e| DbError::Mapping(e.to_string()))
}

pub fn get_opt_i64(row: &Row, idx: i32) -> Result<Option<i64>, DbError> {
    row.get::<Option<i64>>(idx).map_err(|e| DbError::Mapping(e.to_string()))
}

pub fn get_bool(row: &Row, idx: i32) -> Result<bool, DbError> {
    Ok(get_i64(row, idx)? != 0)
}

pub fn to_json(value: &impl serde::Serialize) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}
