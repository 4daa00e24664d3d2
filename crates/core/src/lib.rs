pub mod codec;
pub mod error;
pub mod ids;
pub mod value;

pub use codec::{ColumnLiteral, ColumnType};
pub use error::CoreError;
pub use ids::*;
pub use value::SqlValue;
