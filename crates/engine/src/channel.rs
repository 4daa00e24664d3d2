//! Channel state machine.
//!
//! READY is the only resting state. RECORDING, UNDOING and REDOING each last
//! for exactly one operation and fall back to READY on every exit path.

use serde::Serialize;
use tracing::{debug, error};
use undolog_core::ChannelId;
use undolog_storage::{
    ActionRecord, ChannelRecord, ChannelStatus, LogStorage, SqliteConnection, SqliteLogStorage,
    StorageError,
};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelStatusReport {
    pub status: ChannelStatus,
    pub undos: u64,
    pub redos: u64,
}

/// Puts the channel back to READY if dropped while armed, which only
/// happens when the guarded operation panicked.
struct ReadyGuard<'a> {
    storage: &'a SqliteLogStorage,
    channel: ChannelId,
    armed: bool,
}

impl<'a> ReadyGuard<'a> {
    fn new(storage: &'a SqliteLogStorage, channel: ChannelId) -> Self {
        Self {
            storage,
            channel,
            armed: true,
        }
    }

    fn release(mut self) -> Result<(), StorageError> {
        self.armed = false;
        self.storage.set_channel_status(self.channel, ChannelStatus::Ready)
    }
}

impl Drop for ReadyGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.storage.set_channel_status(self.channel, ChannelStatus::Ready) {
                error!(channel = %self.channel, error = %e, "failed to reset channel to READY");
            }
        }
    }
}

/// Run `f` with the channel in `status`, resetting it to READY afterwards.
/// An error from `f` wins over an error from the reset.
pub(crate) fn with_status<T, E, F>(
    storage: &SqliteLogStorage,
    channel: ChannelId,
    status: ChannelStatus,
    f: F,
) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: From<EngineError>,
{
    storage
        .set_channel_status(channel, status)
        .map_err(EngineError::from)?;
    let guard = ReadyGuard::new(storage, channel);
    let result = f();
    let reset = guard.release();
    let value = result?;
    reset.map_err(EngineError::from)?;
    Ok(value)
}

pub struct ChannelStateMachine<'a> {
    storage: &'a SqliteLogStorage,
}

impl<'a> ChannelStateMachine<'a> {
    pub fn new(storage: &'a SqliteLogStorage) -> Self {
        Self { storage }
    }

    pub fn get_or_create_ready_channel(&self, channel: ChannelId) -> Result<ChannelRecord, EngineError> {
        Ok(self.storage.get_or_create_ready_channel(channel)?)
    }

    /// Open a new action on a READY channel. Its order index is above every
    /// action the channel has had, undone ones included.
    fn open_action(&self, channel: ChannelId, category: Option<&str>) -> Result<ActionRecord, EngineError> {
        self.storage.get_or_create_ready_channel(channel)?;
        let category = category
            .map(|name| self.storage.get_or_create_category(name))
            .transpose()?;
        let action = self.storage.create_action(channel, category)?;
        debug!(%channel, action = %action.id, order_index = action.order_index, "opened action");
        Ok(action)
    }

    pub fn start_tracking(&self, channel: ChannelId, category: Option<&str>) -> Result<ActionRecord, EngineError> {
        let action = self.open_action(channel, category)?;
        self.storage.set_channel_status(channel, ChannelStatus::Recording)?;
        Ok(action)
    }

    pub fn stop_tracking(&self, channel: ChannelId) -> Result<(), EngineError> {
        self.storage.set_channel_status(channel, ChannelStatus::Ready)?;
        Ok(())
    }

    /// Record every write `work` makes to tracked tables of this channel as
    /// one action.
    pub fn track_within<T, E, F>(&self, channel: ChannelId, category: Option<&str>, work: F) -> Result<T, E>
    where
        F: FnOnce(&SqliteConnection) -> Result<T, E>,
        E: From<EngineError>,
    {
        self.open_action(channel, category)?;
        with_status(self.storage, channel, ChannelStatus::Recording, || {
            work(self.storage.conn())
        })
    }

    pub fn status(&self, channel: ChannelId) -> Result<ChannelStatusReport, EngineError> {
        let record = self
            .storage
            .get_channel(channel)?
            .ok_or(StorageError::ChannelNotFound(channel))?;
        Ok(ChannelStatusReport {
            status: record.status,
            undos: self.storage.count_actions(channel, false)?,
            redos: self.storage.count_actions(channel, true)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use undolog_storage::catalog::create_table;
    use undolog_storage::schema::{DEFAULT_TABLE_PREFIX, LOG_TABLES};

    fn storage() -> SqliteLogStorage {
        let conn = SqliteConnection::open_in_memory().unwrap();
        for table in LOG_TABLES.iter() {
            create_table(&conn, table, DEFAULT_TABLE_PREFIX).unwrap();
        }
        SqliteLogStorage::new(conn, DEFAULT_TABLE_PREFIX)
    }

    #[test]
    fn start_and_stop_tracking() {
        let storage = storage();
        let channels = ChannelStateMachine::new(&storage);
        let channel = ChannelId::new(0);
        let action = channels.start_tracking(channel, Some("edit")).unwrap();
        assert_eq!(action.order_index, 1);
        assert_eq!(channels.status(channel).unwrap().status, ChannelStatus::Recording);
        assert!(matches!(
            channels.start_tracking(channel, None),
            Err(EngineError::Storage(StorageError::ChannelNotReady { .. }))
        ));
        channels.stop_tracking(channel).unwrap();
        let report = channels.status(channel).unwrap();
        assert_eq!(report.status, ChannelStatus::Ready);
        assert_eq!(report.undos, 1);
        assert_eq!(report.redos, 0);
    }

    #[test]
    fn failing_work_leaves_channel_ready() {
        let storage = storage();
        let channels = ChannelStateMachine::new(&storage);
        let channel = ChannelId::new(4);
        let result: Result<(), EngineError> = channels.track_within(channel, None, |_| {
            Err(EngineError::BottomOfStack(channel))
        });
        assert!(matches!(result, Err(EngineError::BottomOfStack(_))));
        assert_eq!(channels.status(channel).unwrap().status, ChannelStatus::Ready);
    }

    #[test]
    fn panicking_work_leaves_channel_ready() {
        let storage = storage();
        let channels = ChannelStateMachine::new(&storage);
        let channel = ChannelId::new(5);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), EngineError> = channels.track_within(channel, None, |_| panic!("boom"));
        }));
        assert!(outcome.is_err());
        assert_eq!(channels.status(channel).unwrap().status, ChannelStatus::Ready);
    }

    #[test]
    fn status_of_unknown_channel_fails() {
        let storage = storage();
        let channels = ChannelStateMachine::new(&storage);
        assert!(matches!(
            channels.status(ChannelId::new(42)),
            Err(EngineError::Storage(StorageError::ChannelNotFound(_)))
        ));
    }
}
