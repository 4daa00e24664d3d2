//! Connection capability set used by the undo log.
//!
//! `SqliteConnection` is the tracked handle: every statement issued through
//! `execute`, `run`, `get_single` and `get_all` is traced and, when an audit
//! table is configured, recorded there. Audit rows are written through the
//! raw rusqlite handle, which has no tracking attached, so an audit write is
//! never audited or captured itself.

use std::cell::RefCell;
use std::panic::Location;
use std::path::Path;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{OptionalExtension, Row, ToSql};
use tracing::{trace, warn};
use undolog_core::{SqlValue, codec};

use crate::catalog::quote_identifier;
use crate::error::StorageError;

/// Named parameters, e.g. `&[(":id", &id)]`.
pub type Params<'a> = [(&'a str, &'a dyn ToSql)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    pub last_insert_id: i64,
    pub rows_affected: usize,
}

pub struct SqliteConnection {
    conn: rusqlite::Connection,
    audit_table: RefCell<Option<String>>,
}

impl SqliteConnection {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::from_raw(rusqlite::Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_raw(rusqlite::Connection::open_in_memory()?)
    }

    pub fn from_raw(conn: rusqlite::Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn,
            audit_table: RefCell::new(None),
        })
    }

    /// The untracked handle. Writes through it are never audited.
    pub fn raw(&self) -> &rusqlite::Connection {
        &self.conn
    }

    /// Route the audit trail of every tracked statement into `table`, or stop
    /// auditing with `None`. The table must have `query`, `parameters` and
    /// `location` columns.
    pub fn set_audit_table(&self, table: Option<String>) {
        *self.audit_table.borrow_mut() = table;
    }

    pub fn audit_table(&self) -> Option<String> {
        self.audit_table.borrow().clone()
    }

    pub fn escape_string(&self, value: &str) -> String {
        codec::quote_text(value)
    }

    #[track_caller]
    pub fn execute(&self, sql: &str) -> Result<(), StorageError> {
        self.track(sql, &[], Location::caller())?;
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    #[track_caller]
    pub fn run(&self, sql: &str, params: &Params<'_>) -> Result<RunResult, StorageError> {
        self.track(sql, params, Location::caller())?;
        let rows_affected = self.conn.execute(sql, params)?;
        Ok(RunResult {
            last_insert_id: self.conn.last_insert_rowid(),
            rows_affected,
        })
    }

    #[track_caller]
    pub fn get_single<T, F>(
        &self,
        sql: &str,
        params: &Params<'_>,
        map: F,
    ) -> Result<Option<T>, StorageError>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.track(sql, params, Location::caller())?;
        let mut stmt = self.conn.prepare(sql)?;
        Ok(stmt.query_row(params, map).optional()?)
    }

    #[track_caller]
    pub fn get_all<T, F>(
        &self,
        sql: &str,
        params: &Params<'_>,
        map: F,
    ) -> Result<Vec<T>, StorageError>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.track(sql, params, Location::caller())?;
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, map)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Run `f` inside a savepoint, rolling back to it when `f` fails.
    /// Savepoints nest, so this is safe inside an application transaction.
    #[track_caller]
    pub fn savepoint<T, E, F>(&self, name: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<StorageError>,
    {
        let name = quote_identifier(name);
        self.execute(&format!("SAVEPOINT {name}"))?;
        match f() {
            Ok(value) => {
                self.execute(&format!("RELEASE {name}"))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.execute(&format!("ROLLBACK TO {name}; RELEASE {name}")) {
                    warn!(error = %rollback, savepoint = %name, "rollback failed");
                }
                Err(e)
            }
        }
    }

    fn track(
        &self,
        sql: &str,
        params: &Params<'_>,
        location: &Location<'_>,
    ) -> Result<(), StorageError> {
        trace!(sql = sql.trim(), params = params.len(), %location, "query");
        let Some(table) = self.audit_table.borrow().clone() else {
            return Ok(());
        };
        let mut parameters = serde_json::Map::new();
        for (name, value) in params {
            parameters.insert((*name).to_string(), param_to_json(*value)?);
        }
        self.conn.execute(
            &format!(
                "INSERT INTO {} (query, parameters, location) VALUES (?1, ?2, ?3)",
                quote_identifier(&table)
            ),
            rusqlite::params![
                sql,
                serde_json::Value::Object(parameters).to_string(),
                location.to_string(),
            ],
        )?;
        Ok(())
    }
}

fn param_to_json(value: &dyn ToSql) -> Result<serde_json::Value, StorageError> {
    let value = match value.to_sql()? {
        ToSqlOutput::Borrowed(v) => from_value_ref(v),
        ToSqlOutput::Owned(v) => from_value(v),
        _ => SqlValue::Null,
    };
    Ok(match value {
        SqlValue::Null => serde_json::Value::Null,
        SqlValue::Integer(n) => n.into(),
        SqlValue::Real(n) => n.into(),
        SqlValue::Text(s) => s.into(),
        blob @ SqlValue::Blob(_) => codec::quote(&blob).into(),
    })
}

pub fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(n) => SqlValue::Integer(n),
        ValueRef::Real(n) => SqlValue::Real(n),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

pub fn from_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(n) => SqlValue::Integer(n),
        Value::Real(n) => SqlValue::Real(n),
        Value::Text(t) => SqlValue::Text(t),
        Value::Blob(b) => SqlValue::Blob(b),
    }
}

pub fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(n) => Value::Integer(*n),
        SqlValue::Real(n) => Value::Real(*n),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Blob(b) => Value::Blob(b.clone()),
    }
}
