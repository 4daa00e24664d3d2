use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown column type '{0}' for unquoting")]
    UnknownColumnType(String),

    #[error("unable to unquote {kind} literal {literal:?} of column '{column}'")]
    InvalidLiteral {
        column: String,
        literal: String,
        kind: &'static str,
    },
}
