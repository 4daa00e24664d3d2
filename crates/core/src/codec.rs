//! Typed literal codec.
//!
//! Captured column values are stored as SQL literal text produced by SQLite's
//! `quote()` function. This module turns those literals back into native
//! values for replay, and provides the loose comparison used by assertions.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::CoreError;
use crate::value::SqlValue;

/// Declared column type of a tracked column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Numeric,
    Integer,
    Real,
    Blob,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Numeric => "NUMERIC",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Blob => "BLOB",
        }
    }

    /// Parse a declared type as reported by `PRAGMA table_info`.
    pub fn parse(declared: &str) -> Result<Self, CoreError> {
        match declared.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Ok(Self::Text),
            "NUMERIC" => Ok(Self::Numeric),
            "INTEGER" => Ok(Self::Integer),
            "REAL" => Ok(Self::Real),
            "BLOB" => Ok(Self::Blob),
            _ => Err(CoreError::UnknownColumnType(declared.to_string())),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A captured literal together with the declared type of its column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLiteral {
    /// `None` when the log row holds SQL NULL instead of a literal.
    pub literal: Option<String>,
    pub column_type: String,
}

impl ColumnLiteral {
    pub fn new(literal: Option<String>, column_type: impl Into<String>) -> Self {
        Self {
            literal,
            column_type: column_type.into(),
        }
    }
}

/// Encode a value as an SQL literal.
///
/// Matches SQLite's `quote()` for every storage class except REAL, which is
/// written in Rust's shortest round-trip form (`1e-300` where SQLite writes
/// `1.0e-300`). Both forms decode to the same value, so compare decoded
/// values rather than literal text.
pub fn quote(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(n) => n.to_string(),
        SqlValue::Real(n) => format!("{n:?}"),
        SqlValue::Text(s) => quote_text(s),
        SqlValue::Blob(b) => format!("X'{}'", hex::encode_upper(b)),
    }
}

/// Wrap text in single quotes, doubling embedded quotes.
pub fn quote_text(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Decode every captured literal of a change into native values.
pub fn unquote(
    values: &BTreeMap<String, ColumnLiteral>,
) -> Result<BTreeMap<String, SqlValue>, CoreError> {
    values
        .iter()
        .map(|(name, literal)| {
            let column_type = ColumnType::parse(&literal.column_type)?;
            let value = unquote_literal(name, literal.literal.as_deref(), column_type)?;
            Ok((name.clone(), value))
        })
        .collect()
}

enum Literal<'a> {
    Null,
    Quoted(String),
    Hex(Vec<u8>),
    Number(&'a str),
}

fn classify(literal: &str) -> Option<Literal<'_>> {
    if literal.eq_ignore_ascii_case("NULL") {
        return Some(Literal::Null);
    }
    if let Some(text) = unquote_text(literal) {
        return Some(Literal::Quoted(text));
    }
    if let Some(bytes) = unquote_hex(literal) {
        return Some(Literal::Hex(bytes));
    }
    if literal.parse::<f64>().is_ok() {
        return Some(Literal::Number(literal));
    }
    None
}

/// Decode one literal according to the declared type of its column.
///
/// Column affinity lets SQLite store values of another storage class than the
/// declared one (text in an INTEGER column, a blob in a TEXT column). Those
/// literals are self-describing and decode to their own class.
pub fn unquote_literal(
    column: &str,
    literal: Option<&str>,
    column_type: ColumnType,
) -> Result<SqlValue, CoreError> {
    let Some(raw) = literal else {
        return Ok(SqlValue::Null);
    };
    let invalid = || CoreError::InvalidLiteral {
        column: column.to_string(),
        literal: raw.to_string(),
        kind: column_type.as_str(),
    };
    let classified = classify(raw).ok_or_else(invalid)?;

    match (column_type, classified) {
        (_, Literal::Null) => Ok(SqlValue::Null),
        (ColumnType::Blob, Literal::Quoted(text)) => Ok(SqlValue::Blob(text.into_bytes())),
        (_, Literal::Quoted(text)) => Ok(SqlValue::Text(text)),
        (_, Literal::Hex(bytes)) => Ok(SqlValue::Blob(bytes)),
        (ColumnType::Real, Literal::Number(n)) => {
            n.parse::<f64>().map(SqlValue::Real).map_err(|_| invalid())
        }
        // NUMERIC affinity stores whole numbers as INTEGER.
        (ColumnType::Integer | ColumnType::Numeric | ColumnType::Blob, Literal::Number(n)) => match n.parse::<i64>() {
            Ok(i) => Ok(SqlValue::Integer(i)),
            Err(_) => n.parse::<f64>().map(SqlValue::Real).map_err(|_| invalid()),
        },
        (ColumnType::Text, Literal::Number(_)) => Err(invalid()),
    }
}

fn unquote_text(literal: &str) -> Option<String> {
    let inner = literal.strip_prefix('\'')?.strip_suffix('\'')?;
    Some(inner.replace("''", "'"))
}

fn unquote_hex(literal: &str) -> Option<Vec<u8>> {
    let inner = literal
        .strip_prefix("X'")
        .or_else(|| literal.strip_prefix("x'"))?
        .strip_suffix('\'')?;
    hex::decode(inner).ok()
}

fn is_decimal(s: &str) -> bool {
    let (int, frac) = match s.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (s, None),
    };
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    digits(int) && frac.is_none_or(digits)
}

/// Best-effort coercion of a raw value for comparisons.
///
/// Numeric-looking text becomes a number, a single-quoted literal becomes the
/// unquoted string and a hex literal becomes bytes. Anything else passes
/// through unchanged.
pub fn normalize(raw: &SqlValue) -> SqlValue {
    let SqlValue::Text(s) = raw else {
        return raw.clone();
    };
    if is_decimal(s) {
        if let Ok(n) = s.parse::<f64>() {
            return SqlValue::Real(n);
        }
    }
    if let Some(text) = unquote_text(s) {
        return SqlValue::Text(text);
    }
    if let Some(bytes) = unquote_hex(s) {
        return SqlValue::Blob(bytes);
    }
    raw.clone()
}

/// Compare two values after normalizing both sides.
pub fn equals(left: &SqlValue, right: &SqlValue) -> bool {
    let lhs = normalize(left);
    let rhs = normalize(right);
    match (&lhs, &rhs) {
        (SqlValue::Blob(a), SqlValue::Blob(b)) => a == b,
        (
            SqlValue::Integer(_) | SqlValue::Real(_),
            SqlValue::Integer(_) | SqlValue::Real(_),
        ) => lhs.as_real() == rhs.as_real(),
        _ => lhs == rhs,
    }
}
