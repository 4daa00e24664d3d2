use thiserror::Error;
use undolog_core::{ChangeId, ChannelId, CoreError, RowId, TableId};
use undolog_storage::StorageError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("nothing to undo on channel '{0}'")]
    BottomOfStack(ChannelId),

    #[error("nothing to redo on channel '{0}'")]
    TopOfStack(ChannelId),

    #[error("unable to {operation} rowid={row_id} in table '{table}'")]
    RowVanished {
        table: String,
        row_id: RowId,
        operation: &'static str,
    },

    #[error("change {change} has no row id to {operation}")]
    MissingRowId {
        change: ChangeId,
        operation: &'static str,
    },

    #[error("tracked table {0} not found")]
    UnknownTrackedTable(TableId),
}
