//! Typed entity registry.
//!
//! Maps every tracked entity kind to its field schema, primary key,
//! versioning style and table identifiers. Nothing else in the crate
//! derives a table name.

use crate::{
    config::DwhConfig,
    error::{DwhError, DwhResult},
    sql::Ident,
    value::FieldType,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Terminals,
    PassportBlacklist,
    Transactions,
}

impl EntityKind {
    /// Load order within a daily cycle. Facts come last so that the
    /// dimensions they reference are already current.
    pub const LOAD_ORDER: [EntityKind; 3] = [
        EntityKind::Terminals,
        EntityKind::PassportBlacklist,
        EntityKind::Transactions,
    ];

    /// Token embedded in batch file names.
    pub fn token(&self) -> &'static str {
        match self {
            EntityKind::Terminals => "terminals",
            EntityKind::PassportBlacklist => "passport_blacklist",
            EntityKind::Transactions => "transactions",
        }
    }

    pub fn from_token(token: &str) -> DwhResult<Self> {
        Self::LOAD_ORDER
            .into_iter()
            .find(|k| k.token() == token)
            .ok_or_else(|| DwhError::UnknownEntity { token: token.to_string() })
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// How a batch turns into history rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStyle {
    /// Type-2 versioning: diff against the current view, close and open.
    Dimension,
    /// Append-only: every staged row becomes a history row.
    Fact,
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: Ident,
    pub ty: FieldType,
}

#[derive(Debug, Clone)]
pub struct EntitySpec {
    pub kind: EntityKind,
    pub style: EntityStyle,
    pub schema: String,
    pub history_table: Ident,
    pub current_view: Ident,
    pub staging_table: Ident,
    pub primary_key: Ident,
    /// Position of the primary key within `fields`.
    pub pk_index: usize,
    /// Declared fields in file column order.
    pub fields: Vec<FieldSpec>,
}

impl EntitySpec {
    pub fn field_names(&self) -> Vec<Ident> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct EntityRegistry {
    pub schema: String,
    pub meta_table: Ident,
    pub report_table: Ident,
    pub load_log_table: Ident,
    specs: Vec<EntitySpec>,
}

impl EntityRegistry {
    pub fn build(config: &DwhConfig) -> DwhResult<Self> {
        let prefix = Ident::new(config.table_prefix.as_str())?;
        let schema = config.schema.clone();

        let specs = vec![
            entity(
                &prefix,
                &schema,
                EntityKind::Terminals,
                EntityStyle::Dimension,
                "dwh_dim_terminals_hist",
                "terminal_id",
                &[
                    ("terminal_id", FieldType::Text),
                    ("terminal_type", FieldType::Text),
                    ("terminal_city", FieldType::Text),
                    ("terminal_address", FieldType::Text),
                ],
            )?,
            // The blacklist file is a cumulative snapshot, so it is versioned
            // like a dimension even though it lives in the fact layer.
            entity(
                &prefix,
                &schema,
                EntityKind::PassportBlacklist,
                EntityStyle::Dimension,
                "dwh_fact_passport_blacklist",
                "passport_num",
                &[("entry_dt", FieldType::Date), ("passport_num", FieldType::Text)],
            )?,
            entity(
                &prefix,
                &schema,
                EntityKind::Transactions,
                EntityStyle::Fact,
                "dwh_fact_transactions",
                "trans_id",
                &[
                    ("trans_id", FieldType::Text),
                    ("trans_date", FieldType::Timestamp),
                    ("amt", FieldType::Decimal),
                    ("card_num", FieldType::Text),
                    ("oper_type", FieldType::Text),
                    ("oper_result", FieldType::Text),
                    ("terminal", FieldType::Text),
                ],
            )?,
        ];

        Ok(Self {
            meta_table: prefix.suffixed("meta")?,
            report_table: prefix.suffixed("rep_fraud")?,
            load_log_table: prefix.suffixed("load_log")?,
            schema,
            specs,
        })
    }

    pub fn spec(&self, kind: EntityKind) -> &EntitySpec {
        // build() registers every kind exactly once.
        self.specs
            .iter()
            .find(|s| s.kind == kind)
            .expect("every entity kind is registered")
    }

    pub fn by_token(&self, token: &str) -> DwhResult<&EntitySpec> {
        EntityKind::from_token(token).map(|kind| self.spec(kind))
    }

    pub fn specs(&self) -> &[EntitySpec] {
        &self.specs
    }
}

fn entity(
    prefix: &Ident,
    schema: &str,
    kind: EntityKind,
    style: EntityStyle,
    history_suffix: &str,
    primary_key: &str,
    fields: &[(&str, FieldType)],
) -> DwhResult<EntitySpec> {
    let fields = fields
        .iter()
        .map(|(name, ty)| Ok(FieldSpec { name: Ident::new(*name)?, ty: *ty }))
        .collect::<DwhResult<Vec<_>>>()?;
    let pk_index = fields
        .iter()
        .position(|f| f.name.as_str() == primary_key)
        .ok_or_else(|| DwhError::InvalidIdentifier { ident: primary_key.to_string() })?;

    Ok(EntitySpec {
        kind,
        style,
        schema: schema.to_string(),
        history_table: prefix.suffixed(history_suffix)?,
        current_view: prefix.suffixed(&format!("v_{}", kind.token()))?,
        staging_table: prefix.suffixed(&format!("stg_{}", kind.token()))?,
        primary_key: Ident::new(primary_key)?,
        pk_index,
        fields,
    })
}
