use std::collections::BTreeMap;

use rusqlite::types::Type;
use undolog_core::{
    ActionId, CategoryId, ChangeId, ChannelId, ColumnId, ColumnLiteral, TableId, TaskId,
};

use crate::catalog::quote_identifier;
use crate::connection::SqliteConnection;
use crate::error::StorageError;
use crate::schema::{ACTIONS, CATEGORIES, CHANGES, CHANNELS, CLEAN_UP_TASKS, COLUMNS, CONFIGS, TABLES, VALUES};
use crate::traits::{
    ActionRecord, ChangeRecord, ChangeType, ChannelRecord, ChannelStatus, CleanUpTask,
    CleanUpTaskType, LogStorage, OldOrNew, TrackedColumn, TrackedTable,
};

/// Surface a parse failure of a stored enum as a conversion error of `column`.
fn parsed<T>(column: usize, result: Result<T, StorageError>) -> rusqlite::Result<T> {
    result.map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn read_action(row: &rusqlite::Row) -> rusqlite::Result<ActionRecord> {
    Ok(ActionRecord {
        id: ActionId::new(row.get(0)?),
        created_at: row.get(1)?,
        order_index: row.get(2)?,
        undone: row.get(3)?,
        category_id: row.get::<_, Option<i64>>(4)?.map(CategoryId::new),
        channel_id: ChannelId::new(row.get(5)?),
    })
}

const ACTION_COLUMNS: &str = "id, created_at, order_index, undone, category_id, channel_id";

fn read_change(row: &rusqlite::Row) -> rusqlite::Result<ChangeRecord> {
    let change_type: String = row.get(6)?;
    Ok(ChangeRecord {
        id: ChangeId::new(row.get(0)?),
        table_id: TableId::new(row.get(1)?),
        old_row_id: row.get(2)?,
        new_row_id: row.get(3)?,
        action_id: ActionId::new(row.get(4)?),
        order_index: row.get(5)?,
        change_type: parsed(6, ChangeType::parse(&change_type))?,
    })
}

fn read_table(row: &rusqlite::Row) -> rusqlite::Result<TrackedTable> {
    Ok(TrackedTable {
        id: TableId::new(row.get(0)?),
        name: row.get(1)?,
        channel_id: ChannelId::new(row.get(2)?),
    })
}

fn read_task(row: &rusqlite::Row) -> rusqlite::Result<CleanUpTask> {
    let task_type: String = row.get(1)?;
    Ok(CleanUpTask {
        id: TaskId::new(row.get(0)?),
        task_type: parsed(1, CleanUpTaskType::parse(&task_type))?,
        name: row.get(2)?,
        ref_table_name: row.get(3)?,
    })
}

/// `LogStorage` over a tracked SQLite connection.
pub struct SqliteLogStorage {
    conn: SqliteConnection,
    prefix: String,
}

impl SqliteLogStorage {
    pub fn new(conn: SqliteConnection, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    pub fn conn(&self) -> &SqliteConnection {
        &self.conn
    }

    /// Quoted physical name of a log table.
    fn t(&self, name: &str) -> String {
        quote_identifier(&self.log_table(name))
    }

    fn get_action(&self, id: ActionId) -> Result<Option<ActionRecord>, StorageError> {
        self.conn.get_single(
            &format!("SELECT {ACTION_COLUMNS} FROM {} WHERE id = :id", self.t(ACTIONS)),
            &[(":id", &id.get())],
            read_action,
        )
    }
}

impl LogStorage for SqliteLogStorage {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn get_channel(&self, channel: ChannelId) -> Result<Option<ChannelRecord>, StorageError> {
        self.conn.get_single(
            &format!("SELECT id, status FROM {} WHERE id = :id", self.t(CHANNELS)),
            &[(":id", &channel.get())],
            |row| {
                let status: String = row.get(1)?;
                Ok(ChannelRecord {
                    id: ChannelId::new(row.get(0)?),
                    status: parsed(1, ChannelStatus::parse(&status))?,
                })
            },
        )
    }

    fn get_or_create_ready_channel(&self, channel: ChannelId) -> Result<ChannelRecord, StorageError> {
        self.conn.run(
            &format!(
                "INSERT OR IGNORE INTO {} (id, status) VALUES (:id, 'READY')",
                self.t(CHANNELS)
            ),
            &[(":id", &channel.get())],
        )?;
        let record = self
            .get_channel(channel)?
            .ok_or(StorageError::ChannelNotFound(channel))?;
        if record.status != ChannelStatus::Ready {
            return Err(StorageError::ChannelNotReady {
                channel,
                status: record.status.as_str().to_string(),
            });
        }
        Ok(record)
    }

    fn set_channel_status(&self, channel: ChannelId, status: ChannelStatus) -> Result<(), StorageError> {
        let result = self.conn.run(
            &format!("UPDATE {} SET status = :status WHERE id = :id", self.t(CHANNELS)),
            &[(":status", &status.as_str()), (":id", &channel.get())],
        )?;
        if result.rows_affected == 0 {
            return Err(StorageError::ChannelNotFound(channel));
        }
        Ok(())
    }

    fn get_or_create_category(&self, name: &str) -> Result<CategoryId, StorageError> {
        let table = self.t(CATEGORIES);
        self.conn.run(
            &format!("INSERT OR IGNORE INTO {table} (name) VALUES (:name)"),
            &[(":name", &name)],
        )?;
        self.conn
            .get_single(
                &format!("SELECT id FROM {table} WHERE name = :name"),
                &[(":name", &name)],
                |row| row.get(0).map(CategoryId::new),
            )?
            .ok_or_else(|| StorageError::Serialization(format!("category '{name}' was not stored")))
    }

    fn create_action(
        &self,
        channel: ChannelId,
        category: Option<CategoryId>,
    ) -> Result<ActionRecord, StorageError> {
        let table = self.t(ACTIONS);
        let result = self.conn.run(
            &format!(
                "INSERT INTO {table} (created_at, order_index, undone, category_id, channel_id) \
                 VALUES (CAST(unixepoch('subsec') * 1000 AS INTEGER), \
                 (SELECT IFNULL(MAX(order_index), 0) + 1 FROM {table} WHERE channel_id = :channel), \
                 0, :category, :channel)"
            ),
            &[
                (":category", &category.map(|c| c.get())),
                (":channel", &channel.get()),
            ],
        )?;
        let id = ActionId::new(result.last_insert_id);
        self.get_action(id)?
            .ok_or_else(|| StorageError::Serialization(format!("action {id} was not stored")))
    }

    fn last_undoable_action(&self, channel: ChannelId) -> Result<Option<ActionRecord>, StorageError> {
        self.conn.get_single(
            &format!(
                "SELECT {ACTION_COLUMNS} FROM {} WHERE channel_id = :channel AND undone = 0 \
                 ORDER BY order_index DESC LIMIT 1",
                self.t(ACTIONS)
            ),
            &[(":channel", &channel.get())],
            read_action,
        )
    }

    fn first_redoable_action(&self, channel: ChannelId) -> Result<Option<ActionRecord>, StorageError> {
        self.conn.get_single(
            &format!(
                "SELECT {ACTION_COLUMNS} FROM {} WHERE channel_id = :channel AND undone = 1 \
                 ORDER BY order_index ASC LIMIT 1",
                self.t(ACTIONS)
            ),
            &[(":channel", &channel.get())],
            read_action,
        )
    }

    fn set_action_undone(&self, action: ActionId, undone: bool) -> Result<(), StorageError> {
        self.conn.run(
            &format!("UPDATE {} SET undone = :undone WHERE id = :id", self.t(ACTIONS)),
            &[(":undone", &undone), (":id", &action.get())],
        )?;
        Ok(())
    }

    fn count_actions(&self, channel: ChannelId, undone: bool) -> Result<u64, StorageError> {
        let count: Option<i64> = self.conn.get_single(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE channel_id = :channel AND undone = :undone",
                self.t(ACTIONS)
            ),
            &[(":channel", &channel.get()), (":undone", &undone)],
            |row| row.get(0),
        )?;
        Ok(count.unwrap_or(0) as u64)
    }

    fn actions_of_channel(&self, channel: ChannelId) -> Result<Vec<ActionRecord>, StorageError> {
        self.conn.get_all(
            &format!(
                "SELECT {ACTION_COLUMNS} FROM {} WHERE channel_id = :channel ORDER BY order_index",
                self.t(ACTIONS)
            ),
            &[(":channel", &channel.get())],
            read_action,
        )
    }

    fn changes_of_action(&self, action: ActionId) -> Result<Vec<ChangeRecord>, StorageError> {
        self.conn.get_all(
            &format!(
                "SELECT id, table_id, old_row_id, new_row_id, action_id, order_index, type \
                 FROM {} WHERE action_id = :action ORDER BY order_index",
                self.t(CHANGES)
            ),
            &[(":action", &action.get())],
            read_change,
        )
    }

    fn column_literals(
        &self,
        change: ChangeId,
        side: OldOrNew,
    ) -> Result<BTreeMap<String, ColumnLiteral>, StorageError> {
        let rows = self.conn.get_all(
            &format!(
                "SELECT c.name, c.type, v.{} FROM {} v INNER JOIN {} c ON c.id = v.column_id \
                 WHERE v.change_id = :change ORDER BY c.id",
                side.column(),
                self.t(VALUES),
                self.t(COLUMNS)
            ),
            &[(":change", &change.get())],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ColumnLiteral::new(row.get(2)?, row.get::<_, String>(1)?),
                ))
            },
        )?;
        Ok(rows.into_iter().collect())
    }

    fn insert_tracked_table(&self, name: &str, channel: ChannelId) -> Result<TableId, StorageError> {
        let result = self.conn.run(
            &format!(
                "INSERT INTO {} (name, channel_id) VALUES (:name, :channel)",
                self.t(TABLES)
            ),
            &[(":name", &name), (":channel", &channel.get())],
        );
        match result {
            Ok(run) => Ok(TableId::new(run.last_insert_id)),
            Err(StorageError::Sqlite(rusqlite::Error::SqliteFailure(err, _)))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(StorageError::TableAlreadyTracked(name.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn tracked_table(&self, name: &str) -> Result<Option<TrackedTable>, StorageError> {
        self.conn.get_single(
            &format!("SELECT id, name, channel_id FROM {} WHERE name = :name", self.t(TABLES)),
            &[(":name", &name)],
            read_table,
        )
    }

    fn tracked_table_by_id(&self, id: TableId) -> Result<Option<TrackedTable>, StorageError> {
        self.conn.get_single(
            &format!("SELECT id, name, channel_id FROM {} WHERE id = :id", self.t(TABLES)),
            &[(":id", &id.get())],
            read_table,
        )
    }

    fn tracked_tables(&self) -> Result<Vec<TrackedTable>, StorageError> {
        self.conn.get_all(
            &format!("SELECT id, name, channel_id FROM {} ORDER BY id", self.t(TABLES)),
            &[],
            read_table,
        )
    }

    fn delete_tracked_table(&self, id: TableId) -> Result<(), StorageError> {
        self.conn.run(
            &format!("DELETE FROM {} WHERE id = :id", self.t(TABLES)),
            &[(":id", &id.get())],
        )?;
        Ok(())
    }

    fn insert_tracked_column(
        &self,
        table: TableId,
        name: &str,
        column_type: &str,
    ) -> Result<ColumnId, StorageError> {
        let result = self.conn.run(
            &format!(
                "INSERT INTO {} (name, type, table_id) VALUES (:name, :type, :table)",
                self.t(COLUMNS)
            ),
            &[(":name", &name), (":type", &column_type), (":table", &table.get())],
        )?;
        Ok(ColumnId::new(result.last_insert_id))
    }

    fn tracked_columns(&self, table: TableId) -> Result<Vec<TrackedColumn>, StorageError> {
        self.conn.get_all(
            &format!(
                "SELECT id, name, type, table_id FROM {} WHERE table_id = :table ORDER BY id",
                self.t(COLUMNS)
            ),
            &[(":table", &table.get())],
            |row| {
                Ok(TrackedColumn {
                    id: ColumnId::new(row.get(0)?),
                    name: row.get(1)?,
                    column_type: row.get(2)?,
                    table_id: TableId::new(row.get(3)?),
                })
            },
        )
    }

    fn record_clean_up_task(
        &self,
        task_type: CleanUpTaskType,
        name: &str,
        ref_table_name: Option<&str>,
    ) -> Result<TaskId, StorageError> {
        let result = self.conn.run(
            &format!(
                "INSERT INTO {} (type, name, ref_table_name) VALUES (:type, :name, :ref)",
                self.t(CLEAN_UP_TASKS)
            ),
            &[
                (":type", &task_type.as_str()),
                (":name", &name),
                (":ref", &ref_table_name),
            ],
        )?;
        Ok(TaskId::new(result.last_insert_id))
    }

    fn clean_up_tasks(&self, task_type: CleanUpTaskType) -> Result<Vec<CleanUpTask>, StorageError> {
        self.conn.get_all(
            &format!(
                "SELECT id, type, name, ref_table_name FROM {} WHERE type = :type ORDER BY id",
                self.t(CLEAN_UP_TASKS)
            ),
            &[(":type", &task_type.as_str())],
            read_task,
        )
    }

    fn clean_up_tasks_for_table(&self, table: &str) -> Result<Vec<CleanUpTask>, StorageError> {
        self.conn.get_all(
            &format!(
                "SELECT id, type, name, ref_table_name FROM {} WHERE ref_table_name = :table ORDER BY id",
                self.t(CLEAN_UP_TASKS)
            ),
            &[(":table", &table)],
            read_task,
        )
    }

    fn delete_clean_up_task(&self, id: TaskId) -> Result<(), StorageError> {
        self.conn.run(
            &format!("DELETE FROM {} WHERE id = :id", self.t(CLEAN_UP_TASKS)),
            &[(":id", &id.get())],
        )?;
        Ok(())
    }

    fn get_config(&self, name: &str) -> Result<i64, StorageError> {
        let value: Option<i64> = self.conn.get_single(
            &format!("SELECT value FROM {} WHERE name = :name", self.t(CONFIGS)),
            &[(":name", &name)],
            |row| row.get(0),
        )?;
        Ok(value.unwrap_or(0))
    }

    fn set_config(&self, name: &str, value: i64) -> Result<(), StorageError> {
        self.conn.run(
            &format!(
                "INSERT OR REPLACE INTO {} (name, value) VALUES (:name, :value)",
                self.t(CONFIGS)
            ),
            &[(":name", &name), (":value", &value)],
        )?;
        Ok(())
    }
}
