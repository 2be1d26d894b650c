use std::convert::TryFrom;

use anyhow::{anyhow, Result};
use rusqlite::{types::Value, Row};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Column as text, or `None` when the stored value is NULL or not text.
///
/// Rows are read loosely so that one damaged row never fails a whole page.
pub fn loose_text(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get::<_, Value>(idx)? {
        Value::Text(text) => Some(text),
        _ => None,
    })
}

/// Column as integer, or `None` when the stored value is anything else.
pub fn loose_integer(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<i64>> {
    Ok(match row.get::<_, Value>(idx)? {
        Value::Integer(value) => Some(value),
        _ => None,
    })
}
