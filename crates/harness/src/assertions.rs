//! Assertions over the log tables. They panic on mismatch, like `assert!`,
//! and return the inspected records so tests can keep drilling down.

use undolog_core::{ActionId, ChangeId, ChannelId, SqlValue, codec};
use undolog_engine::{ChannelStatusReport, EngineError, UndoLog};
use undolog_storage::catalog::table_exists;
use undolog_storage::{ActionRecord, ChangeRecord, ChannelStatus, OldOrNew};

pub fn assert_channel_in_status(
    log: &UndoLog,
    channel: ChannelId,
    status: ChannelStatus,
) -> Result<ChannelStatusReport, EngineError> {
    let report = log.status(channel)?;
    assert_eq!(report.status, status, "status of channel {channel}");
    Ok(report)
}

pub fn assert_channel_has_actions(
    log: &UndoLog,
    channel: ChannelId,
    count: usize,
) -> Result<Vec<ActionRecord>, EngineError> {
    let actions = log.actions_of_channel(channel)?;
    assert_eq!(actions.len(), count, "actions of channel {channel}");
    Ok(actions)
}

pub fn assert_action_has_changes(
    log: &UndoLog,
    action: ActionId,
    count: usize,
) -> Result<Vec<ChangeRecord>, EngineError> {
    let changes = log.changes_of_action(action)?;
    assert_eq!(changes.len(), count, "changes of action {action}");
    Ok(changes)
}

/// The captured `side` of `change` holds exactly `expected`, compared loosely
/// so an INTEGER 1 matches a NUMERIC 1.0.
pub fn assert_change_has_values(
    log: &UndoLog,
    change: ChangeId,
    side: OldOrNew,
    expected: &[(&str, SqlValue)],
) -> Result<(), EngineError> {
    let actual = log.values_of_change(change, side)?;
    let mut columns: Vec<&str> = expected.iter().map(|(c, _)| *c).collect();
    columns.sort_unstable();
    assert_eq!(
        actual.keys().map(String::as_str).collect::<Vec<_>>(),
        columns,
        "columns captured for change {change}"
    );
    for (column, value) in expected {
        let captured = &actual[*column];
        assert!(
            codec::equals(captured, value),
            "column '{column}' of change {change}: captured {captured:?}, expected {value:?}"
        );
    }
    Ok(())
}

pub fn assert_table_exists(log: &UndoLog, table: &str, exists: bool) -> Result<(), EngineError> {
    assert_eq!(table_exists(log.conn(), table)?, exists, "existence of table '{table}'");
    Ok(())
}
