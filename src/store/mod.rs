//! Record-level access to the relational store.
//!
//! Commands talk to the store only through [`Store`]: select / insert / upsert /
//! update by filter. Records travel as JSON objects so optional columns can be
//! omitted instead of written as empty values.

use serde_json::{Map, Value};
use thiserror::Error;

mod sqlite;
#[cfg(test)]
pub mod testing;
#[cfg(test)]
mod tests;

pub use sqlite::SqliteStore;

pub const TOPIC_TABLE: &str = "topic";
pub const VERSION_TABLE: &str = "esrs_version";
pub const QUESTION_TABLE: &str = "disclosure_question";

pub type Record = Map<String, Value>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated on {table}: {message}")]
    UniqueViolation { table: String, message: String },

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("empty record for table {0}")]
    EmptyRecord(String),

    #[error("store operation on {table} failed: {source}")]
    Backend {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }

    /// Classifies a backend error; unique and primary-key conflicts become
    /// [`StoreError::UniqueViolation`].
    pub(crate) fn from_backend(table: &str, source: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &source {
            let code = failure.extended_code;
            if code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            {
                return Self::UniqueViolation {
                    table: table.to_string(),
                    message: message.clone().unwrap_or_else(|| failure.to_string()),
                };
            }
        }

        Self::Backend {
            table: table.to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::Eq(column.to_string(), value.into())
    }

    pub fn neq(column: &str, value: impl Into<Value>) -> Self {
        Self::Neq(column.to_string(), value.into())
    }

    pub fn is_in<I, V>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        )
    }

    pub fn column(&self) -> &str {
        match self {
            Self::Eq(column, _) | Self::Neq(column, _) | Self::In(column, _) => column,
        }
    }
}

/// One `update(patch, filters)` call of a multi-step write.
#[derive(Debug, Clone)]
pub struct UpdateStep {
    pub patch: Record,
    pub filters: Vec<Filter>,
}

impl UpdateStep {
    pub fn new(patch: Record, filters: Vec<Filter>) -> Self {
        Self { patch, filters }
    }
}

pub trait Store {
    fn select(&self, table: &str, filters: &[Filter]) -> StoreResult<Vec<Record>>;

    /// Inserts all records as one unit and returns the stored rows.
    fn insert(&self, table: &str, records: &[Record]) -> StoreResult<Vec<Record>>;

    /// Inserts, or updates the supplied columns of the row already holding the
    /// same `conflict_columns` values.
    fn upsert(
        &self,
        table: &str,
        records: &[Record],
        conflict_columns: &[&str],
    ) -> StoreResult<Vec<Record>>;

    fn update(&self, table: &str, patch: &Record, filters: &[Filter])
    -> StoreResult<Vec<Record>>;

    /// Applies the steps in order. This default issues them one after another,
    /// so a reader can observe the state between two steps and a failure
    /// leaves the earlier steps applied. Stores with transactions override it.
    fn update_many(&self, table: &str, steps: &[UpdateStep]) -> StoreResult<Vec<Vec<Record>>> {
        steps
            .iter()
            .map(|step| self.update(table, &step.patch, &step.filters))
            .collect()
    }
}

pub fn record_str<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}

/// Reads a flag column; SQLite hands booleans back as integers.
pub fn record_bool(record: &Record, key: &str) -> Option<bool> {
    match record.get(key)? {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_i64().map(|value| value != 0),
        _ => None,
    }
}

/// Builds a [`Record`] from `key => value` pairs.
#[macro_export]
macro_rules! record {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut record = $crate::store::Record::new();
        $(record.insert(($key).to_string(), ::serde_json::Value::from($value));)*
        record
    }};
}
