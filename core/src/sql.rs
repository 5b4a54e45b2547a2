//! Typed statement builder.
//!
//! RULE: identifiers are the only thing ever spliced into SQL text, and
//! only after passing through `Ident`. Values are always bound parameters.

use crate::error::{DwhError, DwhResult};
use std::fmt;

/// A validated, quotable SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: impl Into<String>) -> DwhResult<Self> {
        let name = name.into();
        let mut chars = name.chars();
        let valid_head = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        if !valid_head || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DwhError::InvalidIdentifier { ident: name });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<self>_<suffix>`, validated again.
    pub fn suffixed(&self, suffix: &str) -> DwhResult<Self> {
        Self::new(format!("{}_{}", self.0, suffix))
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

/// A column definition for `CREATE TABLE`.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: Ident,
    pub decl: &'static str,
}

impl ColumnDef {
    pub fn new(name: Ident, decl: &'static str) -> Self {
        Self { name, decl }
    }
}

/// Column definitions from `(name, declaration)` pairs.
pub fn columns(defs: &[(&str, &'static str)]) -> DwhResult<Vec<ColumnDef>> {
    defs.iter()
        .map(|(name, decl)| Ok(ColumnDef::new(Ident::new(*name)?, *decl)))
        .collect()
}

pub fn create_table(table: &Ident, columns: &[ColumnDef], primary_key: &[Ident]) -> String {
    let mut parts: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.decl))
        .collect();
    if !primary_key.is_empty() {
        parts.push(format!("PRIMARY KEY ({})", column_list(primary_key, None)));
    }
    format!("CREATE TABLE IF NOT EXISTS {table} (\n    {}\n)", parts.join(",\n    "))
}

pub fn create_index(index: &Ident, table: &Ident, columns: &[Ident]) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {index} ON {table} ({})",
        column_list(columns, None)
    )
}

pub fn drop_table(table: &Ident) -> String {
    format!("DROP TABLE IF EXISTS {table}")
}

/// `a, b, c` or `t.a, t.b, t.c`.
pub fn column_list(columns: &[Ident], alias: Option<&str>) -> String {
    columns
        .iter()
        .map(|c| match alias {
            Some(a) => format!("{a}.{c}"),
            None => c.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `?first, ?first+1, ...` for `n` parameters.
pub fn placeholders(first: usize, n: usize) -> String {
    (first..first + n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn insert(table: &Ident, columns: &[Ident]) -> String {
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        column_list(columns, None),
        placeholders(1, columns.len())
    )
}
