use std::cell::Cell;
use std::path::Path;

use super::{Filter, Record, SqliteStore, Store, StoreError, StoreResult};

/// Wraps a real store and fails inserts into one table, either with a
/// non-unique backend error or always. Updates go through the trait's
/// sequential `update_many`.
pub struct FlakyStore {
    pub inner: SqliteStore,
    pub failing_table: Option<&'static str>,
    pub failed_inserts: Cell<usize>,
}

impl FlakyStore {
    pub fn open(db_path: &Path, failing_table: Option<&'static str>) -> Self {
        Self {
            inner: SqliteStore::open(db_path).expect("store should open"),
            failing_table,
            failed_inserts: Cell::new(0),
        }
    }

    fn injected_failure(&self, table: &str) -> Option<StoreError> {
        if self.failing_table != Some(table) {
            return None;
        }
        self.failed_inserts.set(self.failed_inserts.get() + 1);
        Some(StoreError::Backend {
            table: table.to_string(),
            source: rusqlite::Error::InvalidQuery,
        })
    }
}

impl Store for FlakyStore {
    fn select(&self, table: &str, filters: &[Filter]) -> StoreResult<Vec<Record>> {
        self.inner.select(table, filters)
    }

    fn insert(&self, table: &str, records: &[Record]) -> StoreResult<Vec<Record>> {
        match self.injected_failure(table) {
            Some(err) => Err(err),
            None => self.inner.insert(table, records),
        }
    }

    fn upsert(
        &self,
        table: &str,
        records: &[Record],
        conflict_columns: &[&str],
    ) -> StoreResult<Vec<Record>> {
        match self.injected_failure(table) {
            Some(err) => Err(err),
            None => self.inner.upsert(table, records, conflict_columns),
        }
    }

    fn update(
        &self,
        table: &str,
        patch: &Record,
        filters: &[Filter],
    ) -> StoreResult<Vec<Record>> {
        self.inner.update(table, patch, filters)
    }
}
