//! Typed field values and their column encoding.
//!
//! Every column is stored as TEXT (or NULL). Equality between two values is
//! exact per declared type; decimals compare numerically so scale does not
//! make two amounts differ.

use crate::{
    clock::{format_date, format_timestamp, parse_date, parse_timestamp},
    types::Timestamp,
};
use chrono::NaiveDate;
use rusqlite::types::{FromSqlError, ToSql, ToSqlOutput, Value, ValueRef};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Timestamp,
    Date,
    Decimal,
}

impl FieldType {
    pub fn sql_type(&self) -> &'static str {
        // Everything is text-encoded; the affinity keeps SQLite from
        // rewriting decimals into floats.
        "TEXT"
    }

    /// Coerce one raw cell into this type. Empty cells become NULL.
    pub fn coerce(&self, raw: &str) -> Result<FieldValue, String> {
        if raw.trim().is_empty() {
            return Ok(FieldValue::Null);
        }
        match self {
            FieldType::Text => Ok(FieldValue::Text(raw.to_string())),
            FieldType::Timestamp => parse_timestamp(raw)
                .map(FieldValue::Timestamp)
                .ok_or_else(|| "malformed timestamp".to_string()),
            FieldType::Date => parse_date(raw)
                .map(FieldValue::Date)
                .ok_or_else(|| "malformed date".to_string()),
            FieldType::Decimal => {
                let normalized = raw.trim().replace(',', ".");
                Decimal::from_str(&normalized)
                    .map(FieldValue::Decimal)
                    .map_err(|e| format!("malformed decimal: {e}"))
            }
        }
    }

    /// Decode a stored column back into this type.
    pub fn decode(&self, value: ValueRef<'_>) -> rusqlite::Result<FieldValue> {
        let raw = match value {
            ValueRef::Null => return Ok(FieldValue::Null),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, value.data_type(), e.into()))?
                .to_string(),
            ValueRef::Integer(i) => i.to_string(),
            ValueRef::Real(f) => f.to_string(),
            ValueRef::Blob(_) => {
                return Err(rusqlite::Error::FromSqlConversionFailure(
                    0,
                    value.data_type(),
                    Box::new(FromSqlError::InvalidType),
                ))
            }
        };
        self.coerce(&raw).map_err(|reason| {
            rusqlite::Error::FromSqlConversionFailure(0, value.data_type(), reason.into())
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Timestamp(Timestamp),
    Date(NaiveDate),
    Decimal(Decimal),
}

impl FieldValue {
    /// Canonical column text, `None` for NULL.
    pub fn to_column_text(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Timestamp(ts) => Some(format_timestamp(*ts)),
            FieldValue::Date(d) => Some(format_date(*d)),
            FieldValue::Decimal(d) => Some(d.normalize().to_string()),
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_column_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            other => match other.to_column_text() {
                Some(text) => ToSqlOutput::Owned(Value::Text(text)),
                None => ToSqlOutput::Owned(Value::Null),
            },
        })
    }
}
