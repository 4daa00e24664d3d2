pub mod catalog;
pub mod connection;
pub mod error;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use catalog::{ColumnDefinition, OnDelete, TableColumn, TableDefinition, quote_identifier};
pub use connection::{Params, RunResult, SqliteConnection};
pub use error::StorageError;
pub use sqlite::SqliteLogStorage;
pub use traits::*;
