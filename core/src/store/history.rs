use super::{DwhStore, StoreTx};
use crate::{
    clock::{format_timestamp, parse_timestamp, SENTINEL_TEXT},
    error::DwhResult,
    registry::EntitySpec,
    sql::{self, ColumnDef, Ident},
    staging::StagedBatch,
    types::Timestamp,
    value::FieldValue,
    versioning::HistoryRow,
};
use rusqlite::{params, params_from_iter, types::Type, Connection, Row, ToSql};

/// Bookkeeping columns every history table carries after its fields.
const DELETED_FLG: &str = "deleted_flg";
const EFFECTIVE_FROM: &str = "effective_from";
const EFFECTIVE_TO: &str = "effective_to";
/// Load timestamp column of a staging table.
const UPDATE_DT: &str = "update_dt";

/// DDL for the history table, its key index and the current-state view.
pub(super) fn history_ddl(spec: &EntitySpec) -> DwhResult<Vec<String>> {
    let mut columns: Vec<ColumnDef> = spec
        .fields
        .iter()
        .map(|f| ColumnDef::new(f.name.clone(), f.ty.sql_type()))
        .collect();
    columns.extend(sql::columns(&[
        (DELETED_FLG, "INTEGER NOT NULL DEFAULT 0"),
        (EFFECTIVE_FROM, "TEXT NOT NULL"),
        (EFFECTIVE_TO, "TEXT NOT NULL"),
    ])?);

    let index = spec.history_table.suffixed("key_idx")?;
    let mut ddl = vec![
        sql::create_table(&spec.history_table, &columns, &[]),
        sql::create_index(
            &index,
            &spec.history_table,
            &[spec.primary_key.clone(), Ident::new(EFFECTIVE_TO)?],
        ),
    ];

    // Views cannot take parameters; the sentinel is a compile-time constant.
    // Open versions are the ones whose interval contains the latest load
    // date. That agrees with `current_rows(as_of)` for any `as_of` at or
    // after the watermark, which `VersioningEngine::apply` enforces.
    ddl.push(format!(
        "CREATE VIEW IF NOT EXISTS {view} AS
         SELECT {fields} FROM {table}
         WHERE {to} = '{SENTINEL_TEXT}' AND {deleted} = 0",
        view = spec.current_view,
        fields = sql::column_list(&spec.field_names(), None),
        table = spec.history_table,
        to = Ident::new(EFFECTIVE_TO)?,
        deleted = Ident::new(DELETED_FLG)?,
    ));
    Ok(ddl)
}

fn bookkeeping_columns() -> DwhResult<Vec<Ident>> {
    Ok(vec![
        Ident::new(DELETED_FLG)?,
        Ident::new(EFFECTIVE_FROM)?,
        Ident::new(EFFECTIVE_TO)?,
    ])
}

fn select_rows_sql(spec: &EntitySpec, filter: &str) -> DwhResult<String> {
    let mut columns = spec.field_names();
    columns.extend(bookkeeping_columns()?);
    Ok(format!(
        "SELECT {} FROM {} WHERE {filter} ORDER BY {}, {} ASC",
        sql::column_list(&columns, None),
        spec.history_table,
        spec.primary_key,
        Ident::new(EFFECTIVE_FROM)?,
    ))
}

fn read_history_row(spec: &EntitySpec, row: &Row<'_>) -> rusqlite::Result<HistoryRow> {
    let n = spec.fields.len();
    let values = spec
        .fields
        .iter()
        .enumerate()
        .map(|(i, f)| f.ty.decode(row.get_ref(i)?))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(HistoryRow {
        key: values[spec.pk_index].to_string(),
        values,
        deleted: row.get::<_, i64>(n)? != 0,
        effective_from: timestamp_column(row, n + 1)?,
        effective_to: timestamp_column(row, n + 2)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let text: String = row.get(idx)?;
    parse_timestamp(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("malformed timestamp '{text}'").into(),
        )
    })
}

fn query_rows(
    conn: &Connection,
    spec: &EntitySpec,
    filter: &str,
    params: &[&dyn ToSql],
) -> DwhResult<Vec<HistoryRow>> {
    let mut stmt = conn.prepare(&select_rows_sql(spec, filter)?)?;
    let rows = stmt
        .query_map(params, |row| read_history_row(spec, row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

impl StoreTx<'_> {
    // ── Staging ───────────────────────────────────────────────

    /// Drop and rebuild the entity's staging table from `batch`.
    pub fn rebuild_staging(&self, spec: &EntitySpec, batch: &StagedBatch) -> DwhResult<()> {
        let mut columns: Vec<ColumnDef> = spec
            .fields
            .iter()
            .map(|f| ColumnDef::new(f.name.clone(), f.ty.sql_type()))
            .collect();
        columns.push(ColumnDef::new(Ident::new(UPDATE_DT)?, "TEXT NOT NULL"));

        self.tx.execute_batch(&sql::drop_table(&spec.staging_table))?;
        self.tx
            .execute_batch(&sql::create_table(&spec.staging_table, &columns, &[]))?;

        let names: Vec<Ident> = columns.into_iter().map(|c| c.name).collect();
        let mut stmt = self.tx.prepare(&sql::insert(&spec.staging_table, &names))?;
        let update_dt = FieldValue::Timestamp(batch.record_timestamp());
        for record in &batch.records {
            stmt.execute(params_from_iter(record.values.iter().chain(std::iter::once(&update_dt))))?;
        }
        Ok(())
    }

    /// Latest `update_dt` in the staging table, if it holds any rows.
    pub fn staged_watermark(&self, spec: &EntitySpec) -> DwhResult<Option<Timestamp>> {
        let max: Option<String> = self.tx.query_row(
            &format!(
                "SELECT MAX({}) FROM {}",
                Ident::new(UPDATE_DT)?,
                spec.staging_table
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(max.as_deref().and_then(parse_timestamp))
    }

    // ── Versioned entities ────────────────────────────────────

    /// Non-deleted versions whose validity interval contains `as_of`.
    pub fn current_rows(&self, spec: &EntitySpec, as_of: Timestamp) -> DwhResult<Vec<HistoryRow>> {
        let filter = format!(
            "?1 BETWEEN {} AND {} AND {} = 0",
            Ident::new(EFFECTIVE_FROM)?,
            Ident::new(EFFECTIVE_TO)?,
            Ident::new(DELETED_FLG)?
        );
        let as_of = format_timestamp(as_of);
        query_rows(&self.tx, spec, &filter, &[&as_of])
    }

    pub fn insert_version(
        &self,
        spec: &EntitySpec,
        values: &[FieldValue],
        deleted: bool,
        effective_from: Timestamp,
    ) -> DwhResult<()> {
        let mut columns = spec.field_names();
        columns.extend(bookkeeping_columns()?);
        let mut stmt = self.tx.prepare_cached(&sql::insert(&spec.history_table, &columns))?;

        let deleted = if deleted { 1i64 } else { 0i64 };
        let from = format_timestamp(effective_from);
        let mut bound: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        bound.push(&deleted);
        bound.push(&from);
        bound.push(&SENTINEL_TEXT);
        stmt.execute(bound.as_slice())?;
        Ok(())
    }

    /// Close the open, non-deleted version of `key`. Returns rows touched.
    pub fn close_open_version(
        &self,
        spec: &EntitySpec,
        key: &str,
        closed_at: Timestamp,
        mark_deleted: bool,
    ) -> DwhResult<usize> {
        let sql = format!(
            "UPDATE {table} SET {to} = ?1, {deleted} = CASE WHEN ?2 THEN 1 ELSE {deleted} END
             WHERE {pk} = ?3 AND {to} = ?4 AND {deleted} = 0",
            table = spec.history_table,
            to = Ident::new(EFFECTIVE_TO)?,
            deleted = Ident::new(DELETED_FLG)?,
            pk = spec.primary_key,
        );
        let touched = self.tx.prepare_cached(&sql)?.execute(params![
            format_timestamp(closed_at),
            mark_deleted,
            key,
            SENTINEL_TEXT
        ])?;
        Ok(touched)
    }

    /// Close an open tombstone left behind for `key`. Returns rows touched.
    pub fn close_tombstone(&self, spec: &EntitySpec, key: &str, closed_at: Timestamp) -> DwhResult<usize> {
        let sql = format!(
            "UPDATE {table} SET {to} = ?1
             WHERE {pk} = ?2 AND {to} = ?3 AND {deleted} = 1",
            table = spec.history_table,
            to = Ident::new(EFFECTIVE_TO)?,
            deleted = Ident::new(DELETED_FLG)?,
            pk = spec.primary_key,
        );
        let touched = self.tx.prepare_cached(&sql)?.execute(params![
            format_timestamp(closed_at),
            key,
            SENTINEL_TEXT
        ])?;
        Ok(touched)
    }

    // ── Fact entities ─────────────────────────────────────────

    /// Append every staged row as a new history row. Returns rows appended.
    pub fn append_staged_facts(&self, spec: &EntitySpec, effective_from: Timestamp) -> DwhResult<usize> {
        let fields = spec.field_names();
        let mut target = fields.clone();
        target.extend(bookkeeping_columns()?);
        let sql = format!(
            "INSERT INTO {table} ({target}) SELECT {fields}, 0, ?1, ?2 FROM {staging}",
            table = spec.history_table,
            target = sql::column_list(&target, None),
            fields = sql::column_list(&fields, Some("stg")),
            staging = format!("{} stg", spec.staging_table),
        );
        let appended = self
            .tx
            .execute(&sql, params![format_timestamp(effective_from), SENTINEL_TEXT])?;
        Ok(appended)
    }
}

impl DwhStore {
    /// Every version of every key, ordered by key then `effective_from`.
    pub fn history_rows(&self, spec: &EntitySpec) -> DwhResult<Vec<HistoryRow>> {
        query_rows(&self.conn, spec, "1 = 1", &[])
    }

    pub fn history_for_key(&self, spec: &EntitySpec, key: &str) -> DwhResult<Vec<HistoryRow>> {
        let filter = format!("{} = ?1", spec.primary_key);
        query_rows(&self.conn, spec, &filter, &[&key])
    }

    /// Rows visible through the entity's current-state view.
    pub fn current_view_count(&self, spec: &EntitySpec) -> DwhResult<i64> {
        self.count_rows(&spec.current_view)
    }
}
