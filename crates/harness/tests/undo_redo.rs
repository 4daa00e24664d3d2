use undolog_core::{ChannelId, SqlValue};
use undolog_engine::{EngineError, UndoLog};
use undolog_harness::*;
use undolog_storage::{ChangeType, ChannelStatus, OldOrNew};

const CHANNEL: ChannelId = ChannelId::new(0);

fn all_types_db() -> Result<TestDb, Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    db.create_table(&AllTypes::definition())?;
    db.log.initialize(CHANNEL)?;
    Ok(db)
}

fn record<F>(log: &UndoLog, work: F) -> Result<(), EngineError>
where
    F: FnOnce(&undolog_storage::SqliteConnection) -> Result<(), EngineError>,
{
    log.track_within(CHANNEL, None, work)
}

fn names(db: &TestDb) -> Result<Vec<SqlValue>, Box<dyn std::error::Error>> {
    Ok(db
        .rows(AllTypes::NAME)?
        .into_iter()
        .map(|mut row| row.remove("name").unwrap_or(SqlValue::Null))
        .collect())
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn all_types_insert_undo_redo() -> Result<(), Box<dyn std::error::Error>> {
    let db = all_types_db()?;
    let log = db.log.channel(CHANNEL);
    log.track_within(None, |conn| -> Result<(), EngineError> {
        insert_row(conn, AllTypes::NAME, &AllTypes::row())?;
        Ok(())
    })?;
    assert_eq!(db.rows(AllTypes::NAME)?, vec![AllTypes::stored_row()]);

    let undone = log.undo()?;
    assert!(db.rows(AllTypes::NAME)?.is_empty());
    assert_eq!(undone.len(), 1);
    assert_eq!(undone[0].change_type, ChangeType::Delete);
    assert_eq!(undone[0].table_name, AllTypes::NAME);
    assert_eq!(undone[0].row_id, 1);
    assert_channel_in_status(&db.log, CHANNEL, ChannelStatus::Ready)?;

    let redone = log.redo()?;
    assert_eq!(db.rows(AllTypes::NAME)?, vec![AllTypes::stored_row()]);
    assert_eq!(redone.len(), 1);
    assert_eq!(redone[0].change_type, ChangeType::Insert);
    assert_eq!(redone[0].row_id, 1);
    assert_eq!(redone[0].values["name"], SqlValue::from("one"));
    assert_eq!(redone[0].values["blob"], SqlValue::from(b"juan".to_vec()));

    let report = assert_channel_in_status(&db.log, CHANNEL, ChannelStatus::Ready)?;
    assert_eq!((report.undos, report.redos), (1, 0));
    Ok(())
}

#[test]
fn insert_then_update_in_separate_actions() -> Result<(), Box<dyn std::error::Error>> {
    let db = all_types_db()?;
    let log = db.log.channel(CHANNEL);
    record(&db.log, |conn| {
        insert_row(conn, AllTypes::NAME, &AllTypes::row())?;
        Ok(())
    })?;
    record(&db.log, |conn| {
        update_row(conn, AllTypes::NAME, 1, &[("name", "two".into())])?;
        Ok(())
    })?;
    assert_eq!(names(&db)?, vec![SqlValue::from("two")]);

    let deltas = log.undo()?;
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].change_type, ChangeType::Update);
    assert_eq!(names(&db)?, vec![SqlValue::from("one")]);
    assert!(log.can_undo()?);

    log.undo()?;
    assert!(db.rows(AllTypes::NAME)?.is_empty());
    assert!(!log.can_undo()?);
    assert!(log.can_redo()?);

    assert!(matches!(log.undo(), Err(EngineError::BottomOfStack(c)) if c == CHANNEL));
    assert_channel_in_status(&db.log, CHANNEL, ChannelStatus::Ready)?;
    Ok(())
}

#[test]
fn redo_replays_in_recorded_order() -> Result<(), Box<dyn std::error::Error>> {
    let db = all_types_db()?;
    let log = db.log.channel(CHANNEL);
    record(&db.log, |conn| {
        insert_row(conn, AllTypes::NAME, &AllTypes::row())?;
        update_row(conn, AllTypes::NAME, 1, &[("name", "two".into())])?;
        update_row(conn, AllTypes::NAME, 1, &[("name", "three".into())])?;
        Ok(())
    })?;

    // Newest change first, so the updates are reverted before the row goes.
    let undone = log.undo()?;
    let kinds: Vec<ChangeType> = undone.iter().map(|d| d.change_type).collect();
    assert_eq!(kinds, vec![ChangeType::Update, ChangeType::Update, ChangeType::Delete]);
    assert!(db.rows(AllTypes::NAME)?.is_empty());

    let redone = log.redo()?;
    let kinds: Vec<ChangeType> = redone.iter().map(|d| d.change_type).collect();
    assert_eq!(kinds, vec![ChangeType::Insert, ChangeType::Update, ChangeType::Update]);
    assert_eq!(names(&db)?, vec![SqlValue::from("three")]);

    assert!(matches!(log.redo(), Err(EngineError::TopOfStack(_))));
    Ok(())
}

#[test]
fn undo_delete_restores_the_exact_row() -> Result<(), Box<dyn std::error::Error>> {
    let db = all_types_db()?;
    db.insert(AllTypes::NAME, &AllTypes::row())?;
    record(&db.log, |conn| {
        delete_row(conn, AllTypes::NAME, 1)?;
        Ok(())
    })?;
    assert!(db.rows(AllTypes::NAME)?.is_empty());

    let deltas = db.log.undo(CHANNEL)?;
    assert_eq!(deltas[0].change_type, ChangeType::Insert);
    assert_eq!(db.rows(AllTypes::NAME)?, vec![AllTypes::stored_row()]);

    db.log.redo(CHANNEL)?;
    assert!(db.rows(AllTypes::NAME)?.is_empty());
    Ok(())
}

#[test]
fn quotes_and_binary_survive_a_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let db = all_types_db()?;
    let row = vec![
        ("id", SqlValue::Integer(9)),
        ("name", "it's ''quoted''".into()),
        ("num", SqlValue::Real(2.5)),
        ("blob", vec![0u8, 39, 255, 10].into()),
        ("zero", SqlValue::Real(-0.125)),
    ];
    db.insert(AllTypes::NAME, &row)?;
    let before = db.rows(AllTypes::NAME)?;

    record(&db.log, |conn| {
        delete_row(conn, AllTypes::NAME, 9)?;
        Ok(())
    })?;
    db.log.undo(CHANNEL)?;
    assert_eq!(db.rows(AllTypes::NAME)?, before);
    Ok(())
}

// ============================================================================
// Update targets
// ============================================================================

#[test]
fn partial_update_undo_leaves_other_columns_untouched() -> Result<(), Box<dyn std::error::Error>> {
    let db = all_types_db()?;
    db.insert(AllTypes::NAME, &AllTypes::row())?;
    record(&db.log, |conn| {
        update_row(conn, AllTypes::NAME, 1, &[("name", "uno".into())])?;
        Ok(())
    })?;
    // Not recorded: the channel is READY.
    db.update(AllTypes::NAME, 1, &[("num", SqlValue::Integer(7))])?;

    let deltas = db.log.undo(CHANNEL)?;
    assert_eq!(deltas[0].values.keys().collect::<Vec<_>>(), vec!["name"]);
    let rows = db.rows(AllTypes::NAME)?;
    assert_eq!(rows[0]["name"], SqlValue::from("one"));
    assert_eq!(rows[0]["num"], SqlValue::Integer(7));

    db.log.redo(CHANNEL)?;
    let rows = db.rows(AllTypes::NAME)?;
    assert_eq!(rows[0]["name"], SqlValue::from("uno"));
    assert_eq!(rows[0]["num"], SqlValue::Integer(7));
    Ok(())
}

#[test]
fn update_of_primary_key_undo_and_redo_target_the_right_row() -> Result<(), Box<dyn std::error::Error>> {
    let db = all_types_db()?;
    db.insert(AllTypes::NAME, &AllTypes::row())?;
    record(&db.log, |conn| {
        update_row(conn, AllTypes::NAME, 1, &[("id", SqlValue::Integer(5))])?;
        Ok(())
    })?;

    let actions = assert_channel_has_actions(&db.log, CHANNEL, 1)?;
    let changes = assert_action_has_changes(&db.log, actions[0].id, 1)?;
    assert_eq!((changes[0].old_row_id, changes[0].new_row_id), (Some(1), Some(5)));
    assert_change_has_values(&db.log, changes[0].id, OldOrNew::Old, &[("id", SqlValue::Integer(1))])?;

    // Undo addresses the row by its new id...
    let undone = db.log.undo(CHANNEL)?;
    assert_eq!(undone[0].row_id, 5);
    assert_eq!(db.rows(AllTypes::NAME)?[0]["id"], SqlValue::Integer(1));

    // ...and redo by the old one it was restored to.
    let redone = db.log.redo(CHANNEL)?;
    assert_eq!(redone[0].row_id, 1);
    assert_eq!(db.rows(AllTypes::NAME)?[0]["id"], SqlValue::Integer(5));
    Ok(())
}

#[test]
fn large_numeric_integers_survive_a_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let db = all_types_db()?;
    let big = SqlValue::Integer(9_007_199_254_740_993);
    db.insert(AllTypes::NAME, &[("id", SqlValue::Integer(1)), ("num", big.clone())])?;

    record(&db.log, |conn| {
        delete_row(conn, AllTypes::NAME, 1)?;
        Ok(())
    })?;
    let deltas = db.log.undo(CHANNEL)?;
    assert_eq!(deltas[0].values["num"], big);
    assert_eq!(db.rows(AllTypes::NAME)?[0]["num"], big);
    Ok(())
}

#[test]
fn table_with_plain_integer_id_round_trips() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    db.conn().execute(
        "CREATE TABLE all_types (id INTEGER, name TEXT, num NUMERIC, blob BLOB, zero REAL)",
    )?;
    db.log.initialize(CHANNEL)?;
    let log = db.log.channel(CHANNEL);

    record(&db.log, |conn| {
        insert_row(conn, AllTypes::NAME, &AllTypes::row())?;
        Ok(())
    })?;
    assert_eq!(db.rows(AllTypes::NAME)?, vec![AllTypes::stored_row()]);

    log.undo()?;
    assert!(db.rows(AllTypes::NAME)?.is_empty());
    log.redo()?;
    assert_eq!(db.rows(AllTypes::NAME)?, vec![AllTypes::stored_row()]);
    Ok(())
}

// ============================================================================
// Stack behavior
// ============================================================================

#[test]
fn recording_after_undo_keeps_undone_actions_redoable() -> Result<(), Box<dyn std::error::Error>> {
    let db = all_types_db()?;
    let log = db.log.channel(CHANNEL);
    record(&db.log, |conn| {
        insert_row(conn, AllTypes::NAME, &AllTypes::row())?;
        Ok(())
    })?;
    record(&db.log, |conn| {
        insert_row(conn, AllTypes::NAME, &[("id", SqlValue::Integer(3)), ("name", "three".into())])?;
        Ok(())
    })?;
    log.undo()?;
    assert_eq!(log.status()?.redos, 1);

    record(&db.log, |conn| {
        insert_row(conn, AllTypes::NAME, &[("id", SqlValue::Integer(2)), ("name", "other".into())])?;
        Ok(())
    })?;
    let report = log.status()?;
    assert_eq!((report.undos, report.redos), (2, 1));

    // Order indexes are never handed out twice.
    let actions = assert_channel_has_actions(&db.log, CHANNEL, 3)?;
    let indexes: Vec<_> = actions.iter().map(|a| a.order_index).collect();
    assert_eq!(indexes, vec![1, 2, 3]);
    assert!(actions[1].undone);

    let redone = log.redo()?;
    assert_eq!(redone.len(), 1);
    assert_eq!(redone[0].values["name"], SqlValue::from("three"));
    assert_eq!(
        names(&db)?,
        vec![SqlValue::from("one"), SqlValue::from("other"), SqlValue::from("three")]
    );
    assert!(!log.can_redo()?);
    Ok(())
}

#[test]
fn failing_recording_leaves_redo_stack_intact() -> Result<(), Box<dyn std::error::Error>> {
    let db = all_types_db()?;
    let log = db.log.channel(CHANNEL);
    record(&db.log, |conn| {
        insert_row(conn, AllTypes::NAME, &AllTypes::row())?;
        Ok(())
    })?;
    log.undo()?;

    let result = record(&db.log, |_| Err(EngineError::BottomOfStack(CHANNEL)));
    assert!(result.is_err());
    assert!(log.can_redo()?);
    log.redo()?;
    assert_eq!(names(&db)?, vec![SqlValue::from("one")]);
    Ok(())
}

#[test]
fn vanished_row_is_an_error_and_channel_stays_usable() -> Result<(), Box<dyn std::error::Error>> {
    let db = all_types_db()?;
    let log = db.log.channel(CHANNEL);
    record(&db.log, |conn| {
        insert_row(conn, AllTypes::NAME, &AllTypes::row())?;
        Ok(())
    })?;
    // Deleted behind the log's back.
    db.delete(AllTypes::NAME, 1)?;

    let err = log.undo().unwrap_err();
    assert!(matches!(
        err,
        EngineError::RowVanished { ref table, row_id: 1, operation: "delete" } if table == AllTypes::NAME
    ));
    assert_channel_in_status(&db.log, CHANNEL, ChannelStatus::Ready)?;
    // The action was not marked undone.
    assert!(log.can_undo()?);
    assert!(!log.can_redo()?);
    Ok(())
}

#[test]
fn rowid_is_restored_for_tables_without_integer_key() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    db.conn().execute("CREATE TABLE notes (title TEXT, body TEXT)")?;
    let log = db.log.initialize(CHANNEL)?;

    log.track_within(None, |conn| -> Result<(), EngineError> {
        insert_row(conn, "notes", &[("title", "a".into()), ("body", "first".into())])?;
        insert_row(conn, "notes", &[("title", "b".into()), ("body", "second".into())])?;
        Ok(())
    })?;
    log.track_within(None, |conn| -> Result<(), EngineError> {
        delete_row(conn, "notes", 1)?;
        Ok(())
    })?;

    let deltas = log.undo()?;
    assert_eq!(deltas[0].row_id, 1);
    let rowids: Vec<(i64, String)> = db.conn().get_all(
        "SELECT rowid, title FROM notes ORDER BY rowid",
        &[],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    assert_eq!(rowids, vec![(1, "a".to_string()), (2, "b".to_string())]);

    // The insert action still addresses both rows.
    log.undo()?;
    assert!(db.rows("notes")?.is_empty());
    Ok(())
}

#[test]
fn channels_keep_separate_stacks() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    db.conn().execute("CREATE TABLE left_side (v TEXT); CREATE TABLE right_side (v TEXT);")?;
    let tables = [
        (ChannelId::new(1), vec!["left_side".to_string()]),
        (ChannelId::new(2), vec!["right_side".to_string()]),
    ]
    .into_iter()
    .collect();
    let logs = db.log.initialize_multiple(&tables)?;
    let (left, right) = (logs[&ChannelId::new(1)], logs[&ChannelId::new(2)]);

    left.track_within(None, |conn| -> Result<(), EngineError> {
        insert_row(conn, "left_side", &[("v", "l".into())])?;
        // Belongs to the other channel, which is not recording.
        insert_row(conn, "right_side", &[("v", "r".into())])?;
        Ok(())
    })?;
    assert!(left.can_undo()?);
    assert!(!right.can_undo()?);

    left.undo()?;
    assert!(db.rows("left_side")?.is_empty());
    assert_eq!(db.rows("right_side")?.len(), 1);
    Ok(())
}

#[test]
fn deltas_serialize_for_callers() -> Result<(), Box<dyn std::error::Error>> {
    let db = all_types_db()?;
    let log = db.log.channel(CHANNEL);
    record(&db.log, |conn| {
        insert_row(conn, AllTypes::NAME, &AllTypes::row())?;
        Ok(())
    })?;
    log.undo()?;
    let deltas = log.redo()?;

    let json = serde_json::to_value(&deltas)?;
    assert_eq!(json[0]["change_type"], "INSERT");
    assert_eq!(json[0]["table_name"], "all_types");
    assert_eq!(json[0]["values"]["name"], "one");
    assert_eq!(json[0]["values"]["id"], 1);

    let status = serde_json::to_value(log.status()?)?;
    assert_eq!(status["status"], "READY");
    assert_eq!(status["undos"], 1);
    Ok(())
}
