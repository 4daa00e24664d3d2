pub mod channel;
pub mod error;
pub mod setup;
pub mod triggers;
pub mod undo;

pub use channel::{ChannelStateMachine, ChannelStatusReport};
pub use error::EngineError;
pub use setup::{DEBUG_MODE_CONFIG, UndoLogSetup};
pub use triggers::{CaptureTrigger, TriggerGenerator, trigger_name};
pub use undo::{Delta, UndoRedoEngine};

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;
use undolog_core::{ActionId, ChangeId, ChannelId, SqlValue, TableId, codec};
use undolog_storage::catalog::all_table_names;
use undolog_storage::schema::DEFAULT_TABLE_PREFIX;
use undolog_storage::{
    ActionRecord, ChangeRecord, ChannelStatus, LogStorage, OldOrNew, SqliteConnection,
    SqliteLogStorage, TrackedTable,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoLogOptions {
    /// Prepended to every log table and trigger name.
    pub table_prefix: String,
    /// Record every statement into the audit table.
    pub debug_mode: bool,
}

impl Default for UndoLogOptions {
    fn default() -> Self {
        Self {
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            debug_mode: false,
        }
    }
}

impl UndoLogOptions {
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }
}

/// Undo log over one database connection. Owns the connection and hands out
/// the setup, channel and replay components over it.
pub struct UndoLog {
    storage: SqliteLogStorage,
    options: UndoLogOptions,
}

impl UndoLog {
    pub fn new(conn: SqliteConnection, options: UndoLogOptions) -> Self {
        let storage = SqliteLogStorage::new(conn, options.table_prefix.clone());
        Self { storage, options }
    }

    pub fn open(path: impl AsRef<Path>, options: UndoLogOptions) -> Result<Self, EngineError> {
        Ok(Self::new(SqliteConnection::open(path)?, options))
    }

    pub fn open_in_memory(options: UndoLogOptions) -> Result<Self, EngineError> {
        Ok(Self::new(SqliteConnection::open_in_memory()?, options))
    }

    pub fn options(&self) -> &UndoLogOptions {
        &self.options
    }

    pub fn storage(&self) -> &SqliteLogStorage {
        &self.storage
    }

    pub fn conn(&self) -> &SqliteConnection {
        self.storage.conn()
    }

    pub fn setup(&self) -> UndoLogSetup<'_> {
        UndoLogSetup::new(&self.storage)
    }

    pub fn channels(&self) -> ChannelStateMachine<'_> {
        ChannelStateMachine::new(&self.storage)
    }

    pub fn replay(&self) -> UndoRedoEngine<'_> {
        UndoRedoEngine::new(&self.storage)
    }

    // ========================================================================
    // Setup
    // ========================================================================

    pub fn install(&self) -> Result<Vec<String>, EngineError> {
        let log_tables = self.setup().install()?;
        if self.options.debug_mode {
            self.setup().enable_debug_mode(true)?;
        }
        Ok(log_tables)
    }

    pub fn uninstall(&self) -> Result<(), EngineError> {
        self.setup().uninstall()
    }

    pub fn add_table(&self, table: &str, channel: ChannelId) -> Result<TableId, EngineError> {
        self.setup().add_table(table, channel)
    }

    pub fn remove_table(&self, table: &str) -> Result<(), EngineError> {
        self.setup().remove_table(table)
    }

    pub fn enable_debug_mode(&self, enabled: bool) -> Result<(), EngineError> {
        self.setup().enable_debug_mode(enabled)
    }

    pub fn get_config(&self, name: &str) -> Result<i64, EngineError> {
        self.setup().get_config(name)
    }

    pub fn set_config(&self, name: &str, value: i64) -> Result<(), EngineError> {
        self.setup().set_config(name, value)
    }

    /// Install, then track every application table that is not tracked yet
    /// under `channel`.
    pub fn initialize(&self, channel: ChannelId) -> Result<ChannelLog<'_>, EngineError> {
        let log_tables = self.install()?;
        self.channels().get_or_create_ready_channel(channel)?;
        for table in all_table_names(self.conn())? {
            self.track_if_untracked(&table, channel, &log_tables)?;
        }
        Ok(self.channel(channel))
    }

    /// Install, then track the named tables under their channel. Log tables
    /// and tables that are already tracked are skipped.
    pub fn initialize_multiple(
        &self,
        tables: &BTreeMap<ChannelId, Vec<String>>,
    ) -> Result<BTreeMap<ChannelId, ChannelLog<'_>>, EngineError> {
        let log_tables = self.install()?;
        let mut logs = BTreeMap::new();
        for (&channel, names) in tables {
            self.channels().get_or_create_ready_channel(channel)?;
            for table in names {
                self.track_if_untracked(table, channel, &log_tables)?;
            }
            logs.insert(channel, self.channel(channel));
        }
        Ok(logs)
    }

    fn track_if_untracked(
        &self,
        table: &str,
        channel: ChannelId,
        log_tables: &[String],
    ) -> Result<(), EngineError> {
        if log_tables.iter().any(|t| t == table) {
            return Ok(());
        }
        if self.storage.tracked_table(table)?.is_some() {
            debug!(table, "already tracked");
            return Ok(());
        }
        self.add_table(table, channel)?;
        Ok(())
    }

    pub fn channel(&self, channel: ChannelId) -> ChannelLog<'_> {
        ChannelLog {
            log: self,
            channel,
        }
    }

    // ========================================================================
    // Channels
    // ========================================================================

    pub fn start_tracking(
        &self,
        channel: ChannelId,
        category: Option<&str>,
    ) -> Result<ActionRecord, EngineError> {
        self.channels().start_tracking(channel, category)
    }

    pub fn stop_tracking(&self, channel: ChannelId) -> Result<(), EngineError> {
        self.channels().stop_tracking(channel)
    }

    pub fn track_within<T, E, F>(
        &self,
        channel: ChannelId,
        category: Option<&str>,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&SqliteConnection) -> Result<T, E>,
        E: From<EngineError>,
    {
        self.channels().track_within(channel, category, work)
    }

    pub fn status(&self, channel: ChannelId) -> Result<ChannelStatusReport, EngineError> {
        self.channels().status(channel)
    }

    pub fn undo(&self, channel: ChannelId) -> Result<Vec<Delta>, EngineError> {
        self.replay().undo(channel)
    }

    pub fn redo(&self, channel: ChannelId) -> Result<Vec<Delta>, EngineError> {
        self.replay().redo(channel)
    }

    // ========================================================================
    // Log introspection
    // ========================================================================

    pub fn actions_of_channel(&self, channel: ChannelId) -> Result<Vec<ActionRecord>, EngineError> {
        Ok(self.storage.actions_of_channel(channel)?)
    }

    pub fn changes_of_action(
        &self,
        action: ActionId,
    ) -> Result<Vec<ChangeRecord>, EngineError> {
        Ok(self.storage.changes_of_action(action)?)
    }

    /// Decoded values of one side of a change, keyed by column name.
    pub fn values_of_change(
        &self,
        change: ChangeId,
        side: OldOrNew,
    ) -> Result<BTreeMap<String, SqlValue>, EngineError> {
        let literals = self.storage.column_literals(change, side)?;
        Ok(codec::unquote(&literals)?)
    }

    pub fn tracked_tables(&self) -> Result<Vec<TrackedTable>, EngineError> {
        Ok(self.storage.tracked_tables()?)
    }
}

/// Undo log handle bound to one channel.
#[derive(Clone, Copy)]
pub struct ChannelLog<'a> {
    log: &'a UndoLog,
    channel: ChannelId,
}

impl<'a> ChannelLog<'a> {
    pub fn channel_id(&self) -> ChannelId {
        self.channel
    }

    pub fn undo_log(&self) -> &'a UndoLog {
        self.log
    }

    pub fn track_within<T, E, F>(&self, category: Option<&str>, work: F) -> Result<T, E>
    where
        F: FnOnce(&SqliteConnection) -> Result<T, E>,
        E: From<EngineError>,
    {
        self.log.track_within(self.channel, category, work)
    }

    pub fn can_undo(&self) -> Result<bool, EngineError> {
        let status = self.status()?;
        Ok(status.status == ChannelStatus::Ready && status.undos > 0)
    }

    pub fn can_redo(&self) -> Result<bool, EngineError> {
        let status = self.status()?;
        Ok(status.status == ChannelStatus::Ready && status.redos > 0)
    }

    pub fn undo(&self) -> Result<Vec<Delta>, EngineError> {
        self.log.undo(self.channel)
    }

    pub fn redo(&self) -> Result<Vec<Delta>, EngineError> {
        self.log.redo(self.channel)
    }

    pub fn status(&self) -> Result<ChannelStatusReport, EngineError> {
        self.log.status(self.channel)
    }
}

impl std::fmt::Debug for ChannelLog<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLog")
            .field("channel", &self.channel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_and_setters() {
        let options = UndoLogOptions::default();
        assert_eq!(options.table_prefix, "undo_");
        assert!(!options.debug_mode);
        let options = options.with_table_prefix("hist_").with_debug_mode(true);
        assert_eq!(options.table_prefix, "hist_");
        assert!(options.debug_mode);
    }

    #[test]
    fn custom_prefix_is_applied_to_log_tables() {
        let log = UndoLog::open_in_memory(UndoLogOptions::default().with_table_prefix("hist_")).unwrap();
        let names = log.install().unwrap();
        assert!(names.iter().all(|n| n.starts_with("hist_")));
        assert!(log.setup().is_installed().unwrap());
        assert!(all_table_names(log.conn()).unwrap().contains(&"hist_changes".to_string()));
    }

    #[test]
    fn delta_serializes_for_callers() {
        let delta = Delta {
            change_type: undolog_storage::ChangeType::Delete,
            table_name: "test".into(),
            row_id: 3,
            values: BTreeMap::new(),
        };
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["change_type"], "DELETE");
        assert_eq!(json["row_id"], 3);
    }
}
