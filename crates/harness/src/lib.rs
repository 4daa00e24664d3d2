pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::{AllTypes, TestDb, delete_row, insert_row, select_rows, update_row};
