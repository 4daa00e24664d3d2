//! The fixed set of log tables. Names are unprefixed; the installer applies
//! the configured prefix.

use std::sync::LazyLock;

use undolog_core::ColumnType;

use crate::catalog::{ColumnDefinition, OnDelete, TableDefinition};

pub const DEFAULT_TABLE_PREFIX: &str = "undo_";

pub const CLEAN_UP_TASKS: &str = "clean_up_tasks";
pub const CHANNELS: &str = "channels";
pub const CATEGORIES: &str = "categories";
pub const ACTIONS: &str = "actions";
pub const TABLES: &str = "tables";
pub const COLUMNS: &str = "columns";
pub const CHANGES: &str = "changes";
pub const VALUES: &str = "values";
pub const CONFIGS: &str = "configs";
pub const LOGS: &str = "logs";

/// Log tables in creation order. The first entry holds the clean-up tasks
/// and is the last object dropped on teardown.
pub static LOG_TABLES: LazyLock<Vec<TableDefinition>> = LazyLock::new(|| {
    vec![
        TableDefinition::new(CLEAN_UP_TASKS)
            .id("id")
            .column(
                ColumnDefinition::new("type", ColumnType::Text)
                    .not_null()
                    .check("type IN ('ROOT', 'TABLE', 'TRIGGER')"),
            )
            .column(ColumnDefinition::new("name", ColumnType::Text).not_null())
            .column(ColumnDefinition::new("ref_table_name", ColumnType::Text)),
        TableDefinition::new(CHANNELS).id("id").column(
            ColumnDefinition::new("status", ColumnType::Text)
                .not_null()
                .check("status IN ('READY', 'RECORDING', 'UNDOING', 'REDOING')"),
        ),
        TableDefinition::new(CATEGORIES)
            .id("id")
            .column(ColumnDefinition::new("name", ColumnType::Text).not_null())
            .unique(&["name"]),
        TableDefinition::new(ACTIONS)
            .id("id")
            .column(ColumnDefinition::new("created_at", ColumnType::Integer).not_null())
            .column(ColumnDefinition::new("order_index", ColumnType::Integer).not_null())
            .column(
                ColumnDefinition::new("undone", ColumnType::Integer)
                    .not_null()
                    .check("undone IN (0, 1)"),
            )
            .column(ColumnDefinition::new("category_id", ColumnType::Integer))
            .column(ColumnDefinition::new("channel_id", ColumnType::Integer).not_null())
            .foreign_key("category_id", CATEGORIES, OnDelete::SetNull)
            .foreign_key("channel_id", CHANNELS, OnDelete::Cascade)
            .unique(&["channel_id", "order_index"]),
        TableDefinition::new(TABLES)
            .id("id")
            .column(ColumnDefinition::new("name", ColumnType::Text).not_null())
            .column(ColumnDefinition::new("channel_id", ColumnType::Integer).not_null())
            .foreign_key("channel_id", CHANNELS, OnDelete::Cascade)
            .unique(&["name"]),
        TableDefinition::new(COLUMNS)
            .id("id")
            .column(ColumnDefinition::new("name", ColumnType::Text).not_null())
            .column(ColumnDefinition::new("type", ColumnType::Text).not_null())
            .column(ColumnDefinition::new("table_id", ColumnType::Integer).not_null())
            .foreign_key("table_id", TABLES, OnDelete::Cascade)
            .unique(&["table_id", "name"]),
        TableDefinition::new(CHANGES)
            .id("id")
            .column(ColumnDefinition::new("table_id", ColumnType::Integer).not_null())
            .column(ColumnDefinition::new("old_row_id", ColumnType::Integer))
            .column(ColumnDefinition::new("new_row_id", ColumnType::Integer))
            .column(ColumnDefinition::new("action_id", ColumnType::Integer).not_null())
            .column(ColumnDefinition::new("order_index", ColumnType::Integer).not_null())
            .column(
                ColumnDefinition::new("type", ColumnType::Text)
                    .not_null()
                    .check("type IN ('INSERT', 'UPDATE', 'DELETE')"),
            )
            .foreign_key("table_id", TABLES, OnDelete::Cascade)
            .foreign_key("action_id", ACTIONS, OnDelete::Cascade),
        TableDefinition::new(VALUES)
            .id("id")
            .column(ColumnDefinition::new("column_id", ColumnType::Integer).not_null())
            .column(ColumnDefinition::new("change_id", ColumnType::Integer).not_null())
            .column(ColumnDefinition::new("old_value", ColumnType::Text))
            .column(ColumnDefinition::new("new_value", ColumnType::Text))
            .foreign_key("column_id", COLUMNS, OnDelete::Cascade)
            .foreign_key("change_id", CHANGES, OnDelete::Cascade),
        TableDefinition::new(CONFIGS)
            .id("id")
            .column(ColumnDefinition::new("name", ColumnType::Text).not_null())
            .column(ColumnDefinition::new("value", ColumnType::Integer).not_null())
            .unique(&["name"]),
    ]
});

/// Audit trail of issued statements, only created in debug mode.
pub static LOGS_TABLE: LazyLock<TableDefinition> = LazyLock::new(|| {
    TableDefinition::new(LOGS)
        .id("id")
        .column(ColumnDefinition::new("query", ColumnType::Text).not_null())
        .column(ColumnDefinition::new("parameters", ColumnType::Text))
        .column(ColumnDefinition::new("location", ColumnType::Text))
});

/// Physical names of every log table, the audit table included.
pub fn log_table_names(prefix: &str) -> Vec<String> {
    LOG_TABLES
        .iter()
        .chain(std::iter::once(&*LOGS_TABLE))
        .map(|t| t.physical_name(prefix))
        .collect()
}
