//! Capture trigger generation.
//!
//! Triggers are generated once per tracked table. Each fires only while the
//! table's channel is RECORDING, appends one change to the channel's newest
//! action and one value row per relevant column.

use undolog_core::codec::quote_text;
use undolog_storage::schema::{ACTIONS, CHANGES, CHANNELS, TABLES, VALUES};
use undolog_storage::{ChangeType, TrackedColumn, quote_identifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTrigger {
    pub change_type: ChangeType,
    pub name: String,
    pub sql: String,
}

pub fn trigger_name(prefix: &str, change_type: ChangeType, table: &str) -> String {
    format!(
        "{prefix}{}_{table}_trigger",
        change_type.as_str().to_ascii_lowercase()
    )
}

/// Builds the INSERT, UPDATE and DELETE capture triggers of one table.
pub struct TriggerGenerator<'a> {
    prefix: &'a str,
    table: &'a str,
    columns: &'a [TrackedColumn],
}

impl<'a> TriggerGenerator<'a> {
    pub fn new(prefix: &'a str, table: &'a str, columns: &'a [TrackedColumn]) -> Self {
        Self {
            prefix,
            table,
            columns,
        }
    }

    pub fn triggers(&self) -> Vec<CaptureTrigger> {
        ChangeType::ALL
            .into_iter()
            .map(|change_type| CaptureTrigger {
                change_type,
                name: trigger_name(self.prefix, change_type, self.table),
                sql: self.trigger_sql(change_type),
            })
            .collect()
    }

    fn log(&self, name: &str) -> String {
        quote_identifier(&format!("{}{name}", self.prefix))
    }

    pub fn trigger_sql(&self, change_type: ChangeType) -> String {
        let (timing, old_row_id, new_row_id) = match change_type {
            ChangeType::Insert => ("AFTER", "NULL", "NEW.rowid"),
            ChangeType::Update => ("AFTER", "OLD.rowid", "NEW.rowid"),
            // Before the fact, so the row is still readable.
            ChangeType::Delete => ("BEFORE", "OLD.rowid", "NULL"),
        };
        let table_literal = quote_text(self.table);
        let mut body = format!(
            "INSERT INTO {changes} (table_id, old_row_id, new_row_id, action_id, order_index, type) \
             SELECT t.id, {old_row_id}, {new_row_id}, a.id, \
             (SELECT IFNULL(MAX(c.order_index), 0) + 1 FROM {changes} c WHERE c.action_id = a.id), '{kind}' \
             FROM {tables} t INNER JOIN {actions} a ON a.channel_id = t.channel_id \
             WHERE t.name = {table_literal} ORDER BY a.order_index DESC LIMIT 1;",
            changes = self.log(CHANGES),
            tables = self.log(TABLES),
            actions = self.log(ACTIONS),
            kind = change_type.as_str(),
        );
        if let Some(values) = self.values_sql(change_type) {
            body.push('\n');
            body.push_str(&values);
        }

        format!(
            "CREATE TRIGGER {name} {timing} {kind} ON {table} FOR EACH ROW \
             WHEN (SELECT ch.status FROM {channels} ch INNER JOIN {tables} t ON t.channel_id = ch.id \
             WHERE t.name = {table_literal}) = 'RECORDING'\nBEGIN\n{body}\nEND",
            name = quote_identifier(&trigger_name(self.prefix, change_type, self.table)),
            kind = change_type.as_str(),
            table = quote_identifier(self.table),
            channels = self.log(CHANNELS),
            tables = self.log(TABLES),
        )
    }

    fn values_sql(&self, change_type: ChangeType) -> Option<String> {
        if self.columns.is_empty() {
            return None;
        }
        let change_id = format!("(SELECT MAX(id) FROM {})", self.log(CHANGES));
        let selects: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let name = quote_identifier(&column.name);
                let id = column.id.get();
                match change_type {
                    ChangeType::Insert => {
                        format!("SELECT {id}, {change_id}, NULL, quote(NEW.{name})")
                    }
                    ChangeType::Delete => {
                        format!("SELECT {id}, {change_id}, quote(OLD.{name}), NULL")
                    }
                    // IS NOT also catches NULL transitions.
                    ChangeType::Update => format!(
                        "SELECT {id}, {change_id}, quote(OLD.{name}), quote(NEW.{name}) \
                         WHERE OLD.{name} IS NOT NEW.{name}"
                    ),
                }
            })
            .collect();
        Some(format!(
            "INSERT INTO {} (column_id, change_id, old_value, new_value) {};",
            self.log(VALUES),
            selects.join(" UNION ALL ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use undolog_core::{ColumnId, TableId};

    fn columns() -> Vec<TrackedColumn> {
        ["id", "name"]
            .iter()
            .enumerate()
            .map(|(i, name)| TrackedColumn {
                id: ColumnId::new(i as i64 + 10),
                name: name.to_string(),
                column_type: "TEXT".into(),
                table_id: TableId::new(1),
            })
            .collect()
    }

    #[test]
    fn names_follow_prefix_type_table() {
        assert_eq!(
            trigger_name("undo_", ChangeType::Delete, "test"),
            "undo_delete_test_trigger"
        );
        let columns = columns();
        let names: Vec<String> = TriggerGenerator::new("undo_", "test", &columns)
            .triggers()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(
            names,
            ["undo_insert_test_trigger", "undo_update_test_trigger", "undo_delete_test_trigger"]
        );
    }

    #[test]
    fn insert_trigger_records_new_values() {
        let columns = columns();
        let sql = TriggerGenerator::new("undo_", "test", &columns).trigger_sql(ChangeType::Insert);
        assert!(sql.starts_with("CREATE TRIGGER \"undo_insert_test_trigger\" AFTER INSERT ON \"test\""));
        assert!(sql.contains("WHERE t.name = 'test') = 'RECORDING'"));
        assert!(sql.contains("SELECT 10, (SELECT MAX(id) FROM \"undo_changes\"), NULL, quote(NEW.\"id\")"));
        assert!(sql.contains("quote(NEW.\"name\")"));
        assert!(!sql.contains("OLD."));
    }

    #[test]
    fn delete_trigger_runs_before_and_records_old_values() {
        let columns = columns();
        let sql = TriggerGenerator::new("undo_", "test", &columns).trigger_sql(ChangeType::Delete);
        assert!(sql.contains("BEFORE DELETE"));
        assert!(sql.contains("quote(OLD.\"name\"), NULL"));
        assert!(!sql.contains("NEW."));
    }

    #[test]
    fn update_trigger_skips_unchanged_columns() {
        let columns = columns();
        let sql = TriggerGenerator::new("undo_", "test", &columns).trigger_sql(ChangeType::Update);
        assert!(sql.contains("WHERE OLD.\"name\" IS NOT NEW.\"name\""));
        assert!(sql.contains("OLD.rowid, NEW.rowid"));
    }

    #[test]
    fn table_names_are_escaped() {
        let sql = TriggerGenerator::new("undo_", "it's", &[]).trigger_sql(ChangeType::Insert);
        assert!(sql.contains("ON \"it's\""));
        assert!(sql.contains("t.name = 'it''s'"));
        assert!(!sql.contains("undo_values"));
    }
}
