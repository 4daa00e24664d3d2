//! Undo and redo replay.
//!
//! Undo walks an action's changes newest first and applies each inverse;
//! redo walks them oldest first and applies them forward:
//!
//! | change | undo                          | redo                          |
//! |--------|-------------------------------|-------------------------------|
//! | INSERT | delete `new_row_id`           | insert the new values         |
//! | DELETE | insert the old values         | delete `old_row_id`           |
//! | UPDATE | write old values `new_row_id` | write new values `old_row_id` |

use std::collections::BTreeMap;

use rusqlite::ToSql;
use rusqlite::types::Value;
use serde::Serialize;
use tracing::{debug, info};
use undolog_core::{ChannelId, RowId, SqlValue, codec};
use undolog_storage::catalog::{rowid_alias, table_info};
use undolog_storage::connection::to_value;
use undolog_storage::{
    ChangeRecord, ChangeType, ChannelStatus, LogStorage, OldOrNew, SqliteLogStorage, TrackedTable,
    quote_identifier,
};

use crate::channel::with_status;
use crate::error::EngineError;

/// One write applied to an application table by undo or redo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delta {
    /// The operation that was applied, not the one that was recorded.
    pub change_type: ChangeType,
    pub table_name: String,
    pub row_id: RowId,
    pub values: BTreeMap<String, SqlValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    Undo,
    Redo,
}

pub struct UndoRedoEngine<'a> {
    storage: &'a SqliteLogStorage,
}

impl<'a> UndoRedoEngine<'a> {
    pub fn new(storage: &'a SqliteLogStorage) -> Self {
        Self { storage }
    }

    pub fn undo(&self, channel: ChannelId) -> Result<Vec<Delta>, EngineError> {
        self.storage.get_or_create_ready_channel(channel)?;
        let action = self
            .storage
            .last_undoable_action(channel)?
            .ok_or(EngineError::BottomOfStack(channel))?;
        with_status(self.storage, channel, ChannelStatus::Undoing, || -> Result<_, EngineError> {
            let mut changes = self.storage.changes_of_action(action.id)?;
            changes.reverse();
            let deltas = self.replay(&changes, Replay::Undo)?;
            self.storage.set_action_undone(action.id, true)?;
            info!(%channel, action = %action.id, deltas = deltas.len(), "undone");
            Ok(deltas)
        })
    }

    pub fn redo(&self, channel: ChannelId) -> Result<Vec<Delta>, EngineError> {
        self.storage.get_or_create_ready_channel(channel)?;
        let action = self
            .storage
            .first_redoable_action(channel)?
            .ok_or(EngineError::TopOfStack(channel))?;
        with_status(self.storage, channel, ChannelStatus::Redoing, || -> Result<_, EngineError> {
            let changes = self.storage.changes_of_action(action.id)?;
            let deltas = self.replay(&changes, Replay::Redo)?;
            self.storage.set_action_undone(action.id, false)?;
            info!(%channel, action = %action.id, deltas = deltas.len(), "redone");
            Ok(deltas)
        })
    }

    fn replay(&self, changes: &[ChangeRecord], replay: Replay) -> Result<Vec<Delta>, EngineError> {
        let mut deltas = Vec::with_capacity(changes.len());
        for change in changes {
            let table = self
                .storage
                .tracked_table_by_id(change.table_id)?
                .ok_or(EngineError::UnknownTrackedTable(change.table_id))?;
            debug!(change = %change.id, table = %table.name, kind = change.change_type.as_str(), ?replay, "replaying");
            if let Some(delta) = self.apply(&table, change, replay)? {
                deltas.push(delta);
            }
        }
        Ok(deltas)
    }

    fn apply(
        &self,
        table: &TrackedTable,
        change: &ChangeRecord,
        replay: Replay,
    ) -> Result<Option<Delta>, EngineError> {
        let delta = match (change.change_type, replay) {
            (ChangeType::Insert, Replay::Undo) => {
                self.delete_row(table, required(change.new_row_id, change, "delete")?)?
            }
            (ChangeType::Delete, Replay::Redo) => {
                self.delete_row(table, required(change.old_row_id, change, "delete")?)?
            }
            (ChangeType::Insert, Replay::Redo) => {
                self.insert_row(table, change.new_row_id, self.values(change, OldOrNew::New)?)?
            }
            (ChangeType::Delete, Replay::Undo) => {
                self.insert_row(table, change.old_row_id, self.values(change, OldOrNew::Old)?)?
            }
            (ChangeType::Update, Replay::Undo) => {
                let row_id = required(change.new_row_id, change, "update")?;
                return self.update_row(table, row_id, self.values(change, OldOrNew::Old)?);
            }
            (ChangeType::Update, Replay::Redo) => {
                let row_id = required(change.old_row_id, change, "update")?;
                return self.update_row(table, row_id, self.values(change, OldOrNew::New)?);
            }
        };
        Ok(Some(delta))
    }

    fn values(
        &self,
        change: &ChangeRecord,
        side: OldOrNew,
    ) -> Result<BTreeMap<String, SqlValue>, EngineError> {
        let literals = self.storage.column_literals(change.id, side)?;
        Ok(codec::unquote(&literals)?)
    }

    fn delete_row(&self, table: &TrackedTable, row_id: RowId) -> Result<Delta, EngineError> {
        let result = self.storage.conn().run(
            &format!("DELETE FROM {} WHERE rowid = :row_id", quote_identifier(&table.name)),
            &[(":row_id", &row_id)],
        )?;
        if result.rows_affected == 0 {
            return Err(EngineError::RowVanished {
                table: table.name.clone(),
                row_id,
                operation: "delete",
            });
        }
        Ok(Delta {
            change_type: ChangeType::Delete,
            table_name: table.name.clone(),
            row_id,
            values: BTreeMap::new(),
        })
    }

    /// Re-insert a captured row. Tables without an INTEGER PRIMARY KEY get
    /// their rowid back explicitly so later changes still address the row.
    fn insert_row(
        &self,
        table: &TrackedTable,
        row_id: Option<RowId>,
        values: BTreeMap<String, SqlValue>,
    ) -> Result<Delta, EngineError> {
        let conn = self.storage.conn();
        let restore_rowid = match row_id {
            Some(row_id) if rowid_alias(&table_info(conn, &table.name)?).is_none() => Some(row_id),
            _ => None,
        };

        let mut columns = Vec::with_capacity(values.len() + 1);
        let mut bound: Vec<(String, Value)> = Vec::with_capacity(values.len() + 1);
        for (i, (column, value)) in values.iter().enumerate() {
            columns.push(quote_identifier(column));
            bound.push((format!(":v{i}"), to_value(value)));
        }
        if let Some(row_id) = restore_rowid {
            columns.push("rowid".to_string());
            bound.push((":rowid".to_string(), Value::Integer(row_id)));
        }
        let placeholders: Vec<&str> = bound.iter().map(|(name, _)| name.as_str()).collect();
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_identifier(&table.name))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_identifier(&table.name),
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        let params: Vec<(&str, &dyn ToSql)> = bound
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();
        let result = conn.run(&sql, &params)?;

        Ok(Delta {
            change_type: ChangeType::Insert,
            table_name: table.name.clone(),
            row_id: result.last_insert_id,
            values,
        })
    }

    /// Write only the given columns; every other column keeps its value.
    fn update_row(
        &self,
        table: &TrackedTable,
        row_id: RowId,
        values: BTreeMap<String, SqlValue>,
    ) -> Result<Option<Delta>, EngineError> {
        if values.is_empty() {
            debug!(table = %table.name, row_id, "update without changed columns, skipped");
            return Ok(None);
        }

        let mut assignments = Vec::with_capacity(values.len());
        let mut bound: Vec<(String, Value)> = Vec::with_capacity(values.len() + 1);
        for (i, (column, value)) in values.iter().enumerate() {
            assignments.push(format!("{} = :v{i}", quote_identifier(column)));
            bound.push((format!(":v{i}"), to_value(value)));
        }
        bound.push((":row_id".to_string(), Value::Integer(row_id)));
        let sql = format!(
            "UPDATE {} SET {} WHERE rowid = :row_id",
            quote_identifier(&table.name),
            assignments.join(", ")
        );
        let params: Vec<(&str, &dyn ToSql)> = bound
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();
        let result = self.storage.conn().run(&sql, &params)?;
        if result.rows_affected == 0 {
            return Err(EngineError::RowVanished {
                table: table.name.clone(),
                row_id,
                operation: "update",
            });
        }

        Ok(Some(Delta {
            change_type: ChangeType::Update,
            table_name: table.name.clone(),
            row_id,
            values,
        }))
    }
}

fn required(
    row_id: Option<RowId>,
    change: &ChangeRecord,
    operation: &'static str,
) -> Result<RowId, EngineError> {
    row_id.ok_or(EngineError::MissingRowId {
        change: change.id,
        operation,
    })
}
