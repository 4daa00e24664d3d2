use std::collections::BTreeMap;
use std::path::PathBuf;

use rusqlite::ToSql;
use rusqlite::types::Value;
use tempfile::TempDir;
use undolog_core::{ColumnType, RowId, SqlValue};
use undolog_engine::{EngineError, UndoLog, UndoLogOptions};
use undolog_storage::catalog::create_table;
use undolog_storage::connection::{from_value_ref, to_value};
use undolog_storage::{ColumnDefinition, SqliteConnection, StorageError, TableDefinition, quote_identifier};

pub type Row = BTreeMap<String, SqlValue>;

/// `all_types(id INTEGER PRIMARY KEY, name TEXT, num NUMERIC, blob BLOB, zero REAL)`
pub struct AllTypes;

impl AllTypes {
    pub const NAME: &'static str = "all_types";

    pub fn definition() -> TableDefinition {
        TableDefinition::new(Self::NAME)
            .id("id")
            .column(ColumnDefinition::new("name", ColumnType::Text))
            .column(ColumnDefinition::new("num", ColumnType::Numeric))
            .column(ColumnDefinition::new("blob", ColumnType::Blob))
            .column(ColumnDefinition::new("zero", ColumnType::Real))
    }

    pub fn row() -> Vec<(&'static str, SqlValue)> {
        vec![
            ("id", SqlValue::Integer(1)),
            ("name", "one".into()),
            ("num", SqlValue::Integer(1)),
            ("blob", b"juan".to_vec().into()),
            ("zero", SqlValue::Integer(0)),
        ]
    }

    /// The row as SQLite stores it after column affinity is applied.
    pub fn stored_row() -> Row {
        Row::from([
            ("id".to_string(), SqlValue::Integer(1)),
            ("name".to_string(), "one".into()),
            ("num".to_string(), SqlValue::Integer(1)),
            ("blob".to_string(), b"juan".to_vec().into()),
            ("zero".to_string(), SqlValue::Real(0.0)),
        ])
    }
}

/// An undo log over a scratch database.
pub struct TestDb {
    pub log: UndoLog,
    dir: Option<TempDir>,
}

impl TestDb {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_options(UndoLogOptions::default())
    }

    pub fn with_options(options: UndoLogOptions) -> Result<Self, EngineError> {
        Ok(Self {
            log: UndoLog::open_in_memory(options)?,
            dir: None,
        })
    }

    /// File-backed database inside a temporary directory that lives as long
    /// as the fixture.
    pub fn on_disk(options: UndoLogOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let log = UndoLog::open(dir.path().join("undo.sqlite3"), options)?;
        Ok(Self {
            log,
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.path().join("undo.sqlite3"))
    }

    pub fn conn(&self) -> &SqliteConnection {
        self.log.conn()
    }

    /// Create an application table (no prefix).
    pub fn create_table(&self, definition: &TableDefinition) -> Result<(), StorageError> {
        create_table(self.conn(), definition, "")
    }

    pub fn insert(&self, table: &str, row: &[(&str, SqlValue)]) -> Result<RowId, StorageError> {
        insert_row(self.conn(), table, row)
    }

    pub fn update(&self, table: &str, row_id: RowId, row: &[(&str, SqlValue)]) -> Result<usize, StorageError> {
        update_row(self.conn(), table, row_id, row)
    }

    pub fn delete(&self, table: &str, row_id: RowId) -> Result<usize, StorageError> {
        delete_row(self.conn(), table, row_id)
    }

    pub fn rows(&self, table: &str) -> Result<Vec<Row>, StorageError> {
        select_rows(self.conn(), table)
    }
}

fn bind(row: &[(&str, SqlValue)]) -> Vec<(String, Value)> {
    row.iter()
        .enumerate()
        .map(|(i, (_, value))| (format!(":p{i}"), to_value(value)))
        .collect()
}

fn as_params(bound: &[(String, Value)]) -> Vec<(&str, &dyn ToSql)> {
    bound
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

pub fn insert_row(
    conn: &SqliteConnection,
    table: &str,
    row: &[(&str, SqlValue)],
) -> Result<RowId, StorageError> {
    let bound = bind(row);
    let columns: Vec<String> = row.iter().map(|(c, _)| quote_identifier(c)).collect();
    let placeholders: Vec<&str> = bound.iter().map(|(n, _)| n.as_str()).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(table),
        columns.join(", "),
        placeholders.join(", ")
    );
    Ok(conn.run(&sql, &as_params(&bound))?.last_insert_id)
}

pub fn update_row(
    conn: &SqliteConnection,
    table: &str,
    row_id: RowId,
    row: &[(&str, SqlValue)],
) -> Result<usize, StorageError> {
    let mut bound = bind(row);
    let assignments: Vec<String> = row
        .iter()
        .zip(&bound)
        .map(|((c, _), (name, _))| format!("{} = {name}", quote_identifier(c)))
        .collect();
    bound.push((":row_id".to_string(), Value::Integer(row_id)));
    let sql = format!(
        "UPDATE {} SET {} WHERE rowid = :row_id",
        quote_identifier(table),
        assignments.join(", ")
    );
    Ok(conn.run(&sql, &as_params(&bound))?.rows_affected)
}

pub fn delete_row(conn: &SqliteConnection, table: &str, row_id: RowId) -> Result<usize, StorageError> {
    let sql = format!("DELETE FROM {} WHERE rowid = :row_id", quote_identifier(table));
    Ok(conn.run(&sql, &[(":row_id", &row_id)])?.rows_affected)
}

/// Every row of `table` in rowid order, keyed by column name.
pub fn select_rows(conn: &SqliteConnection, table: &str) -> Result<Vec<Row>, StorageError> {
    conn.get_all(
        &format!("SELECT * FROM {} ORDER BY rowid", quote_identifier(table)),
        &[],
        |row| {
            let statement = row.as_ref();
            let mut values = Row::new();
            for i in 0..statement.column_count() {
                values.insert(statement.column_name(i)?.to_string(), from_value_ref(row.get_ref(i)?));
            }
            Ok(values)
        },
    )
}
