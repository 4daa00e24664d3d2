use std::collections::BTreeMap;

use serde::Serialize;
use undolog_core::{
    ActionId, CategoryId, ChangeId, ChannelId, ColumnId, ColumnLiteral, RowId, TableId, TaskId,
};

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelStatus {
    Ready,
    Recording,
    Undoing,
    Redoing,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Recording => "RECORDING",
            Self::Undoing => "UNDOING",
            Self::Redoing => "REDOING",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "READY" => Ok(Self::Ready),
            "RECORDING" => Ok(Self::Recording),
            "UNDOING" => Ok(Self::Undoing),
            "REDOING" => Ok(Self::Redoing),
            _ => Err(StorageError::Serialization(format!("unknown channel status: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl ChangeType {
    pub const ALL: [ChangeType; 3] = [Self::Insert, Self::Update, Self::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(StorageError::Serialization(format!("unknown change type: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanUpTaskType {
    Root,
    Table,
    Trigger,
}

impl CleanUpTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "ROOT",
            Self::Table => "TABLE",
            Self::Trigger => "TRIGGER",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "ROOT" => Ok(Self::Root),
            "TABLE" => Ok(Self::Table),
            "TRIGGER" => Ok(Self::Trigger),
            _ => Err(StorageError::Serialization(format!("unknown clean-up task type: {s}"))),
        }
    }
}

/// Which side of a captured value to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OldOrNew {
    Old,
    New,
}

impl OldOrNew {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Old => "old_value",
            Self::New => "new_value",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub id: ChannelId,
    pub status: ChannelStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub id: ActionId,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub order_index: i64,
    pub undone: bool,
    pub category_id: Option<CategoryId>,
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedTable {
    pub id: TableId,
    pub name: String,
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedColumn {
    pub id: ColumnId,
    pub name: String,
    pub column_type: String,
    pub table_id: TableId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub id: ChangeId,
    pub table_id: TableId,
    pub old_row_id: Option<RowId>,
    pub new_row_id: Option<RowId>,
    pub action_id: ActionId,
    pub order_index: i64,
    pub change_type: ChangeType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanUpTask {
    pub id: TaskId,
    pub task_type: CleanUpTaskType,
    pub name: String,
    pub ref_table_name: Option<String>,
}

/// Bookkeeping over the prefixed log tables.
pub trait LogStorage {
    fn prefix(&self) -> &str;

    /// Physical name of a log table.
    fn log_table(&self, name: &str) -> String {
        format!("{}{name}", self.prefix())
    }

    // Channels

    fn get_channel(&self, channel: ChannelId) -> Result<Option<ChannelRecord>, StorageError>;

    /// Create the channel with status READY, or return it if it exists and
    /// is READY. Any other status is `ChannelNotReady`.
    fn get_or_create_ready_channel(&self, channel: ChannelId) -> Result<ChannelRecord, StorageError>;

    fn set_channel_status(&self, channel: ChannelId, status: ChannelStatus) -> Result<(), StorageError>;

    // Categories and actions

    fn get_or_create_category(&self, name: &str) -> Result<CategoryId, StorageError>;

    fn create_action(
        &self,
        channel: ChannelId,
        category: Option<CategoryId>,
    ) -> Result<ActionRecord, StorageError>;

    /// The action with the highest order index that is not undone.
    fn last_undoable_action(&self, channel: ChannelId) -> Result<Option<ActionRecord>, StorageError>;

    /// The undone action with the lowest order index.
    fn first_redoable_action(&self, channel: ChannelId) -> Result<Option<ActionRecord>, StorageError>;

    fn set_action_undone(&self, action: ActionId, undone: bool) -> Result<(), StorageError>;

    fn count_actions(&self, channel: ChannelId, undone: bool) -> Result<u64, StorageError>;

    fn actions_of_channel(&self, channel: ChannelId) -> Result<Vec<ActionRecord>, StorageError>;

    // Changes and values

    /// Changes of an action, ascending by order index.
    fn changes_of_action(&self, action: ActionId) -> Result<Vec<ChangeRecord>, StorageError>;

    /// Captured literals of one side of a change keyed by column name. Only
    /// columns with a value row are present.
    fn column_literals(
        &self,
        change: ChangeId,
        side: OldOrNew,
    ) -> Result<BTreeMap<String, ColumnLiteral>, StorageError>;

    // Tracked tables

    fn insert_tracked_table(&self, name: &str, channel: ChannelId) -> Result<TableId, StorageError>;

    fn tracked_table(&self, name: &str) -> Result<Option<TrackedTable>, StorageError>;

    fn tracked_table_by_id(&self, id: TableId) -> Result<Option<TrackedTable>, StorageError>;

    fn tracked_tables(&self) -> Result<Vec<TrackedTable>, StorageError>;

    fn delete_tracked_table(&self, id: TableId) -> Result<(), StorageError>;

    fn insert_tracked_column(
        &self,
        table: TableId,
        name: &str,
        column_type: &str,
    ) -> Result<ColumnId, StorageError>;

    fn tracked_columns(&self, table: TableId) -> Result<Vec<TrackedColumn>, StorageError>;

    // Clean-up tasks

    fn record_clean_up_task(
        &self,
        task_type: CleanUpTaskType,
        name: &str,
        ref_table_name: Option<&str>,
    ) -> Result<TaskId, StorageError>;

    /// Tasks of one type, ascending by id.
    fn clean_up_tasks(&self, task_type: CleanUpTaskType) -> Result<Vec<CleanUpTask>, StorageError>;

    fn clean_up_tasks_for_table(&self, table: &str) -> Result<Vec<CleanUpTask>, StorageError>;

    fn delete_clean_up_task(&self, id: TaskId) -> Result<(), StorageError>;

    // Configs

    /// Stored value, 0 when the config was never set.
    fn get_config(&self, name: &str) -> Result<i64, StorageError>;

    fn set_config(&self, name: &str, value: i64) -> Result<(), StorageError>;
}
