//! Schema catalog: table definitions, DDL building and column introspection.

use undolog_core::ColumnType;

use crate::connection::SqliteConnection;
use crate::error::StorageError;

/// Quote an identifier for use in generated SQL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Cascade,
    SetNull,
}

impl OnDelete {
    fn clause(&self) -> &'static str {
        match self {
            Self::Cascade => " ON DELETE CASCADE",
            Self::SetNull => " ON DELETE SET NULL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub check: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: true,
            check: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn check(mut self, check: &str) -> Self {
        self.check = Some(check.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub primary_key: Vec<String>,
    pub columns: Vec<ColumnDefinition>,
    pub uniques: Vec<Vec<String>>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: Vec::new(),
            columns: Vec::new(),
            uniques: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Add an autoincrementing INTEGER primary key column.
    pub fn id(mut self, name: &str) -> Self {
        self.primary_key.push(name.to_string());
        self.columns.push(ColumnDefinition::new(name, ColumnType::Integer));
        self
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.uniques
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Reference `referenced_table(id)`; the referenced name is unprefixed.
    pub fn foreign_key(mut self, column: &str, referenced_table: &str, on_delete: OnDelete) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            referenced_table: referenced_table.to_string(),
            referenced_column: "id".to_string(),
            on_delete,
        });
        self
    }

    /// Physical name of this table under `prefix`.
    pub fn physical_name(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.name)
    }

    /// `CREATE TABLE` statement for this definition. `prefix` is applied to
    /// the table itself and to every referenced table.
    pub fn create_sql(&self, prefix: &str) -> String {
        let single_integer_pk = self.primary_key.len() == 1;
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote_identifier(&c.name), c.column_type);
                let is_pk = self.primary_key.contains(&c.name);
                if is_pk && single_integer_pk && c.column_type == ColumnType::Integer {
                    def.push_str(" PRIMARY KEY AUTOINCREMENT");
                } else if is_pk && single_integer_pk {
                    def.push_str(" PRIMARY KEY");
                } else if c.nullable {
                    def.push_str(" NULL");
                } else {
                    def.push_str(" NOT NULL");
                }
                if let Some(check) = &c.check {
                    def.push_str(&format!(" CHECK({check})"));
                }
                def
            })
            .collect();

        if self.primary_key.len() > 1 {
            parts.push(format!("PRIMARY KEY ({})", join_identifiers(&self.primary_key)));
        }
        for fk in &self.foreign_keys {
            parts.push(format!(
                "FOREIGN KEY({}) REFERENCES {}({}){}",
                quote_identifier(&fk.column),
                quote_identifier(&format!("{prefix}{}", fk.referenced_table)),
                quote_identifier(&fk.referenced_column),
                fk.on_delete.clause()
            ));
        }
        for unique in &self.uniques {
            parts.push(format!("UNIQUE ({})", join_identifiers(unique)));
        }

        format!(
            "CREATE TABLE {} ({})",
            quote_identifier(&self.physical_name(prefix)),
            parts.join(", ")
        )
    }
}

fn join_identifiers(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_identifier(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub cid: i64,
    pub name: String,
    pub declared_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    /// 1-based position in the primary key, 0 when not part of it.
    pub primary_key: i64,
}

pub fn table_info(conn: &SqliteConnection, table: &str) -> Result<Vec<TableColumn>, StorageError> {
    conn.get_all(
        "SELECT cid, name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(:table) ORDER BY cid",
        &[(":table", &table)],
        |row| {
            Ok(TableColumn {
                cid: row.get(0)?,
                name: row.get(1)?,
                declared_type: row.get(2)?,
                nullable: row.get::<_, i64>(3)? == 0,
                default_value: row.get(4)?,
                primary_key: row.get(5)?,
            })
        },
    )
}

/// The column aliasing the rowid, if the table declares a single
/// `INTEGER PRIMARY KEY`.
pub fn rowid_alias(columns: &[TableColumn]) -> Option<&TableColumn> {
    let mut pks = columns.iter().filter(|c| c.primary_key > 0);
    match (pks.next(), pks.next()) {
        (Some(pk), None) if pk.declared_type.eq_ignore_ascii_case("INTEGER") => Some(pk),
        _ => None,
    }
}

pub fn table_exists(conn: &SqliteConnection, table: &str) -> Result<bool, StorageError> {
    let found: Option<i64> = conn.get_single(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = :name",
        &[(":name", &table)],
        |row| row.get(0),
    )?;
    Ok(found.is_some())
}

pub fn column_exists(conn: &SqliteConnection, table: &str, column: &str) -> Result<bool, StorageError> {
    Ok(table_info(conn, table)?
        .iter()
        .any(|c| c.name.eq_ignore_ascii_case(column)))
}

/// Names of all tables except SQLite's internal ones.
pub fn all_table_names(conn: &SqliteConnection) -> Result<Vec<String>, StorageError> {
    conn.get_all(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        &[],
        |row| row.get(0),
    )
}

pub fn create_table(
    conn: &SqliteConnection,
    definition: &TableDefinition,
    prefix: &str,
) -> Result<(), StorageError> {
    conn.execute(&definition.create_sql(prefix))
}
