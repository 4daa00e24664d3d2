//! Install and teardown of the log schema and of per-table capture.
//!
//! Every schema object created here is recorded as a clean-up task, so
//! `uninstall` and `remove_table` drop exactly what was created.

use tracing::{debug, info};
use undolog_core::{ChannelId, ColumnType, TableId};
use undolog_storage::catalog::{create_table, table_exists, table_info};
use undolog_storage::schema::{LOG_TABLES, LOGS_TABLE, log_table_names};
use undolog_storage::{
    CleanUpTaskType, LogStorage, SqliteLogStorage, StorageError, quote_identifier,
};

use crate::error::EngineError;
use crate::triggers::TriggerGenerator;

pub const DEBUG_MODE_CONFIG: &str = "debug_mode";

pub struct UndoLogSetup<'a> {
    storage: &'a SqliteLogStorage,
}

impl<'a> UndoLogSetup<'a> {
    pub fn new(storage: &'a SqliteLogStorage) -> Self {
        Self { storage }
    }

    /// Create whichever log tables are missing. Returns the physical names
    /// of all log tables, the audit table included.
    pub fn install(&self) -> Result<Vec<String>, EngineError> {
        let conn = self.storage.conn();
        let prefix = self.storage.prefix();
        conn.savepoint("undolog_install", || -> Result<(), EngineError> {
            let mut created = Vec::new();
            for (position, definition) in LOG_TABLES.iter().enumerate() {
                let name = definition.physical_name(prefix);
                if table_exists(conn, &name)? {
                    continue;
                }
                create_table(conn, definition, prefix)?;
                created.push((position, name));
            }
            for (position, name) in &created {
                let task_type = if *position == 0 {
                    CleanUpTaskType::Root
                } else {
                    CleanUpTaskType::Table
                };
                self.storage.record_clean_up_task(task_type, name, None)?;
            }
            if !created.is_empty() {
                info!(prefix, created = created.len(), "installed log tables");
            }
            Ok(())
        })?;

        if self.storage.get_config(DEBUG_MODE_CONFIG)? != 0 {
            self.attach_audit_table()?;
        }
        Ok(log_table_names(prefix))
    }

    /// True once every log table exists.
    pub fn is_installed(&self) -> Result<bool, EngineError> {
        let prefix = self.storage.prefix();
        for definition in LOG_TABLES.iter() {
            if !table_exists(self.storage.conn(), &definition.physical_name(prefix))? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Drop everything recorded as a clean-up task: triggers first, then
    /// tables newest first, then the task table itself.
    pub fn uninstall(&self) -> Result<(), EngineError> {
        let conn = self.storage.conn();
        let root = LOG_TABLES[0].physical_name(self.storage.prefix());
        if !table_exists(conn, &root)? {
            return Ok(());
        }
        conn.set_audit_table(None);

        let triggers = self.storage.clean_up_tasks(CleanUpTaskType::Trigger)?;
        let tables = self.storage.clean_up_tasks(CleanUpTaskType::Table)?;
        let roots = self.storage.clean_up_tasks(CleanUpTaskType::Root)?;

        for task in &triggers {
            conn.execute(&format!("DROP TRIGGER IF EXISTS {}", quote_identifier(&task.name)))?;
        }
        for task in tables.iter().rev() {
            conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_identifier(&task.name)))?;
        }
        for task in &roots {
            conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_identifier(&task.name)))?;
        }
        info!(
            triggers = triggers.len(),
            tables = tables.len() + roots.len(),
            "uninstalled undo log"
        );
        Ok(())
    }

    /// Track `table` under `channel`: snapshot its columns and install the
    /// capture triggers. The channel is created if needed and must be READY.
    pub fn add_table(&self, table: &str, channel: ChannelId) -> Result<TableId, EngineError> {
        let conn = self.storage.conn();
        self.storage.get_or_create_ready_channel(channel)?;
        let columns = table_info(conn, table)?;
        if columns.is_empty() {
            return Err(StorageError::UnknownTable(table.to_string()).into());
        }
        for column in &columns {
            ColumnType::parse(&column.declared_type)?;
        }

        conn.savepoint("undolog_add_table", || -> Result<TableId, EngineError> {
            let table_id = self.storage.insert_tracked_table(table, channel)?;
            for column in &columns {
                self.storage
                    .insert_tracked_column(table_id, &column.name, &column.declared_type)?;
            }
            let tracked = self.storage.tracked_columns(table_id)?;
            let generator = TriggerGenerator::new(self.storage.prefix(), table, &tracked);
            for trigger in generator.triggers() {
                conn.execute(&trigger.sql)?;
                self.storage
                    .record_clean_up_task(CleanUpTaskType::Trigger, &trigger.name, Some(table))?;
            }
            info!(table, %channel, columns = tracked.len(), "tracking table");
            Ok(table_id)
        })
    }

    /// Stop tracking `table`: drop its triggers and its log rows.
    pub fn remove_table(&self, table: &str) -> Result<(), EngineError> {
        let conn = self.storage.conn();
        let tracked = self
            .storage
            .tracked_table(table)?
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;

        conn.savepoint("undolog_remove_table", || -> Result<(), EngineError> {
            for task in self.storage.clean_up_tasks_for_table(table)? {
                if task.task_type == CleanUpTaskType::Trigger {
                    conn.execute(&format!("DROP TRIGGER IF EXISTS {}", quote_identifier(&task.name)))?;
                }
                self.storage.delete_clean_up_task(task.id)?;
            }
            self.storage.delete_tracked_table(tracked.id)?;
            info!(table, "stopped tracking table");
            Ok(())
        })
    }

    pub fn get_config(&self, name: &str) -> Result<i64, EngineError> {
        Ok(self.storage.get_config(name)?)
    }

    pub fn set_config(&self, name: &str, value: i64) -> Result<(), EngineError> {
        Ok(self.storage.set_config(name, value)?)
    }

    /// Persist the debug flag. Enabling creates the audit table on first use
    /// and starts recording every statement into it.
    pub fn enable_debug_mode(&self, enabled: bool) -> Result<(), EngineError> {
        self.storage.set_config(DEBUG_MODE_CONFIG, i64::from(enabled))?;
        if enabled {
            self.attach_audit_table()?;
        } else {
            self.storage.conn().set_audit_table(None);
        }
        debug!(enabled, "debug mode");
        Ok(())
    }

    fn attach_audit_table(&self) -> Result<(), EngineError> {
        let conn = self.storage.conn();
        let prefix = self.storage.prefix();
        let logs = LOGS_TABLE.physical_name(prefix);
        if !table_exists(conn, &logs)? {
            create_table(conn, &LOGS_TABLE, prefix)?;
            self.storage
                .record_clean_up_task(CleanUpTaskType::Table, &logs, None)?;
        }
        conn.set_audit_table(Some(logs));
        Ok(())
    }
}
