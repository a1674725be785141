use crate::models::ParseEnumError;
use chrono::{DateTime, Utc};
use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};
use rusqlite::types::Type;
use rusqlite::Row;
use thiserror::Error;

pub mod articles_db_operations;
pub mod audit_db_operations;
pub mod users_db_operations;

/// Errors from the article and activity-log stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redb database error: {0}")]
    RedbDatabase(#[from] DatabaseError),
    #[error("Redb storage error: {0}")]
    RedbStorage(#[from] StorageError),
    #[error("Redb transaction error: {0}")]
    RedbTransaction(#[from] TransactionError),
    #[error("Redb table error: {0}")]
    RedbTable(#[from] TableError),
    #[error("Redb commit error: {0}")]
    RedbCommit(#[from] CommitError),
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("R2D2 Pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("UUID parse error: {0}")]
    Uuid(#[from] uuid::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Reads a TEXT column holding one of the model enums.
pub(crate) fn parse_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = ParseEnumError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Reads an RFC 3339 TEXT column.
pub(crate) fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
