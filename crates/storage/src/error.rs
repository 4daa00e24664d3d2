use thiserror::Error;
use undolog_core::ChannelId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("expected channel '{channel}' to have status 'READY', but was '{status}'")]
    ChannelNotReady { channel: ChannelId, status: String },

    #[error("unable to create or get channel '{0}'")]
    ChannelNotFound(ChannelId),

    #[error("table '{0}' is already tracked")]
    TableAlreadyTracked(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),
}
