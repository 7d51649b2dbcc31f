use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, Statement, params_from_iter};
use serde_json::{Number, Value};
use tracing::debug;
use uuid::Uuid;

use super::{Filter, Record, Store, StoreError, StoreResult, UpdateStep};
use crate::util::now_utc_string;

const DB_SCHEMA_VERSION: &str = "0.1.0";

#[derive(Debug)]
pub struct SqliteStore {
    connection: Connection,
    identifier: Regex,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        configure_connection(&connection)?;
        ensure_schema(&connection)?;

        Ok(Self {
            connection,
            identifier: Regex::new(r"^[a-z_][a-z0-9_]*$")
                .context("failed to compile identifier regex")?,
        })
    }

    fn check_identifier(&self, name: &str) -> StoreResult<()> {
        if self.identifier.is_match(name) {
            Ok(())
        } else {
            Err(StoreError::InvalidIdentifier(name.to_string()))
        }
    }

    fn where_clause(&self, filters: &[Filter], params: &mut Vec<SqlValue>) -> StoreResult<String> {
        if filters.is_empty() {
            return Ok(String::new());
        }

        let mut conditions = Vec::with_capacity(filters.len());
        for filter in filters {
            self.check_identifier(filter.column())?;
            match filter {
                Filter::Eq(column, value) => {
                    conditions.push(format!("{column} = ?"));
                    params.push(to_sql_value(value));
                }
                Filter::Neq(column, value) => {
                    conditions.push(format!("{column} != ?"));
                    params.push(to_sql_value(value));
                }
                Filter::In(_, values) if values.is_empty() => conditions.push("0 = 1".to_string()),
                Filter::In(column, values) => {
                    let placeholders = vec!["?"; values.len()].join(", ");
                    conditions.push(format!("{column} IN ({placeholders})"));
                    params.extend(values.iter().map(to_sql_value));
                }
            }
        }

        Ok(format!(" WHERE {}", conditions.join(" AND ")))
    }

    fn insert_rows(
        &self,
        table: &str,
        records: &[Record],
        conflict_columns: Option<&[&str]>,
    ) -> StoreResult<Vec<Record>> {
        self.check_identifier(table)?;
        if let Some(columns) = conflict_columns {
            for column in columns {
                self.check_identifier(column)?;
            }
        }

        let tx = self
            .connection
            .unchecked_transaction()
            .map_err(|err| StoreError::from_backend(table, err))?;

        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            if record.is_empty() {
                return Err(StoreError::EmptyRecord(table.to_string()));
            }

            let mut row = record.clone();
            if !row.contains_key("id") {
                row.insert("id".to_string(), Value::from(Uuid::new_v4().to_string()));
            }

            let columns = row.keys().cloned().collect::<Vec<String>>();
            for column in &columns {
                self.check_identifier(column)?;
            }

            let placeholders = vec!["?"; columns.len()].join(", ");
            let mut sql = format!(
                "INSERT INTO {table} ({}) VALUES ({placeholders})",
                columns.join(", ")
            );
            if let Some(conflict) = conflict_columns {
                let assignments = columns
                    .iter()
                    .filter(|column| column.as_str() != "id" && !conflict.contains(&column.as_str()))
                    .map(|column| format!("{column} = excluded.{column}"))
                    .collect::<Vec<String>>();
                if assignments.is_empty() {
                    sql.push_str(&format!(" ON CONFLICT({}) DO NOTHING", conflict.join(", ")));
                } else {
                    sql.push_str(&format!(
                        " ON CONFLICT({}) DO UPDATE SET {}",
                        conflict.join(", "),
                        assignments.join(", ")
                    ));
                }
            }
            sql.push_str(" RETURNING *");

            let params = row.values().map(to_sql_value).collect::<Vec<SqlValue>>();
            let mut statement = tx
                .prepare_cached(&sql)
                .map_err(|err| StoreError::from_backend(table, err))?;
            let rows = read_records(&mut statement, &params)
                .map_err(|err| StoreError::from_backend(table, err))?;
            stored.extend(rows);
        }

        tx.commit()
            .map_err(|err| StoreError::from_backend(table, err))?;
        debug!(table, rows = stored.len(), "stored records");

        Ok(stored)
    }

    fn update_rows(
        &self,
        connection: &Connection,
        table: &str,
        patch: &Record,
        filters: &[Filter],
    ) -> StoreResult<Vec<Record>> {
        self.check_identifier(table)?;
        if patch.is_empty() {
            return Err(StoreError::EmptyRecord(table.to_string()));
        }

        let mut params = Vec::with_capacity(patch.len() + filters.len());
        let mut assignments = Vec::with_capacity(patch.len());
        for (column, value) in patch {
            self.check_identifier(column)?;
            assignments.push(format!("{column} = ?"));
            params.push(to_sql_value(value));
        }

        let where_clause = self.where_clause(filters, &mut params)?;
        let sql = format!(
            "UPDATE {table} SET {}{where_clause} RETURNING *",
            assignments.join(", ")
        );

        let mut statement = connection
            .prepare(&sql)
            .map_err(|err| StoreError::from_backend(table, err))?;
        read_records(&mut statement, &params).map_err(|err| StoreError::from_backend(table, err))
    }
}

impl Store for SqliteStore {
    fn select(&self, table: &str, filters: &[Filter]) -> StoreResult<Vec<Record>> {
        self.check_identifier(table)?;

        let mut params = Vec::new();
        let where_clause = self.where_clause(filters, &mut params)?;
        let sql = format!("SELECT * FROM {table}{where_clause} ORDER BY rowid");

        let mut statement = self
            .connection
            .prepare(&sql)
            .map_err(|err| StoreError::from_backend(table, err))?;
        read_records(&mut statement, &params).map_err(|err| StoreError::from_backend(table, err))
    }

    fn insert(&self, table: &str, records: &[Record]) -> StoreResult<Vec<Record>> {
        self.insert_rows(table, records, None)
    }

    fn upsert(
        &self,
        table: &str,
        records: &[Record],
        conflict_columns: &[&str],
    ) -> StoreResult<Vec<Record>> {
        self.insert_rows(table, records, Some(conflict_columns))
    }

    fn update(
        &self,
        table: &str,
        patch: &Record,
        filters: &[Filter],
    ) -> StoreResult<Vec<Record>> {
        self.update_rows(&self.connection, table, patch, filters)
    }

    /// Runs every step inside one transaction, so no intermediate state is
    /// visible and a failing step rolls back the earlier ones.
    fn update_many(&self, table: &str, steps: &[UpdateStep]) -> StoreResult<Vec<Vec<Record>>> {
        let tx = self
            .connection
            .unchecked_transaction()
            .map_err(|err| StoreError::from_backend(table, err))?;

        let mut results = Vec::with_capacity(steps.len());
        for step in steps {
            results.push(self.update_rows(&tx, table, &step.patch, &step.filters)?);
        }

        tx.commit()
            .map_err(|err| StoreError::from_backend(table, err))?;
        Ok(results)
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS topic (
              id TEXT PRIMARY KEY,
              code TEXT NOT NULL UNIQUE,
              name TEXT NOT NULL,
              category TEXT
            );

            CREATE TABLE IF NOT EXISTS esrs_version (
              id TEXT PRIMARY KEY,
              version_code TEXT NOT NULL UNIQUE,
              version_name TEXT NOT NULL,
              effective_date TEXT NOT NULL,
              is_active INTEGER NOT NULL DEFAULT 0,
              description TEXT,
              source_url TEXT,
              created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS disclosure_question (
              id TEXT PRIMARY KEY,
              topic_id TEXT NOT NULL,
              version_id TEXT NOT NULL,
              code TEXT NOT NULL,
              datapoint_id TEXT,
              question_text TEXT NOT NULL,
              answer_type TEXT NOT NULL,
              data_type TEXT NOT NULL,
              is_mandatory INTEGER NOT NULL DEFAULT 1,
              is_conditional INTEGER,
              disclosure_requirement TEXT,
              esrs_paragraph TEXT,
              esrs_section TEXT,
              related_ar TEXT,
              valid_from TEXT,
              created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
              updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
              UNIQUE(version_id, code),
              FOREIGN KEY(topic_id) REFERENCES topic(id),
              FOREIGN KEY(version_id) REFERENCES esrs_version(id)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_esrs_version_single_active
              ON esrs_version(is_active) WHERE is_active = 1;
            CREATE INDEX IF NOT EXISTS idx_question_version_topic
              ON disclosure_question(version_id, topic_id);
            ",
        )
        .context("failed to initialize schema")?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now_utc_string()],
    )?;

    Ok(())
}

fn read_records(statement: &mut Statement<'_>, params: &[SqlValue]) -> rusqlite::Result<Vec<Record>> {
    let columns = statement
        .column_names()
        .into_iter()
        .map(str::to_owned)
        .collect::<Vec<String>>();

    let mut rows = statement.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (index, column) in columns.iter().enumerate() {
            record.insert(column.clone(), from_sql_value(row.get_ref(index)?));
        }
        out.push(record);
    }

    Ok(out)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => SqlValue::Integer(integer),
            None => number.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(integer) => Value::from(integer),
        ValueRef::Real(real) => Number::from_f64(real).map_or(Value::Null, Value::Number),
        ValueRef::Text(text) => Value::from(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Value::from(blob.to_vec()),
    }
}
