use super::{DwhStore, StoreTx};
use crate::{
    clock::{format_timestamp, parse_timestamp, EPOCH_TEXT},
    error::DwhResult,
    registry::{EntityRegistry, EntitySpec},
    sql::{self, Ident},
    types::Timestamp,
};
use rusqlite::{params, Connection, OptionalExtension};

pub(super) fn create_meta_table(registry: &EntityRegistry) -> DwhResult<String> {
    let columns = sql::columns(&[
        ("schema_name", "TEXT NOT NULL"),
        ("table_name", "TEXT NOT NULL"),
        ("max_update_dt", "TEXT NOT NULL"),
    ])?;
    let key = [Ident::new("schema_name")?, Ident::new("table_name")?];
    Ok(sql::create_table(&registry.meta_table, &columns, &key))
}

fn read_watermark(
    conn: &Connection,
    registry: &EntityRegistry,
    spec: &EntitySpec,
) -> DwhResult<Option<Timestamp>> {
    let text: Option<String> = conn
        .query_row(
            &format!(
                "SELECT max_update_dt FROM {} WHERE schema_name = ?1 AND table_name = ?2",
                registry.meta_table
            ),
            params![spec.schema, spec.history_table.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(text.as_deref().and_then(parse_timestamp))
}

impl StoreTx<'_> {
    /// Insert the epoch watermark if the entity has none. Returns whether a
    /// row was created.
    pub fn ensure_meta(&self, registry: &EntityRegistry, spec: &EntitySpec) -> DwhResult<bool> {
        let inserted = self.tx.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (schema_name, table_name, max_update_dt)
                 VALUES (?1, ?2, ?3)",
                registry.meta_table
            ),
            params![spec.schema, spec.history_table.as_str(), EPOCH_TEXT],
        )?;
        Ok(inserted > 0)
    }

    pub fn advance_meta(
        &self,
        registry: &EntityRegistry,
        spec: &EntitySpec,
        watermark: Timestamp,
    ) -> DwhResult<()> {
        self.tx.execute(
            &format!(
                "INSERT INTO {} (schema_name, table_name, max_update_dt)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (schema_name, table_name)
                 DO UPDATE SET max_update_dt = excluded.max_update_dt",
                registry.meta_table
            ),
            params![spec.schema, spec.history_table.as_str(), format_timestamp(watermark)],
        )?;
        Ok(())
    }

    pub fn watermark(&self, registry: &EntityRegistry, spec: &EntitySpec) -> DwhResult<Option<Timestamp>> {
        read_watermark(&self.tx, registry, spec)
    }
}

impl DwhStore {
    pub fn watermark(&self, registry: &EntityRegistry, spec: &EntitySpec) -> DwhResult<Option<Timestamp>> {
        read_watermark(&self.conn, registry, spec)
    }
}
