use super::{DwhStore, StoreTx};
use crate::{
    amount_probing::{Outcome, ProbeRow},
    clock::{format_timestamp, parse_timestamp},
    error::DwhResult,
    fraud_rules::FraudEvent,
    registry::{EntityKind, EntityRegistry},
    sql,
    types::Timestamp,
    value::FieldType,
};
use rusqlite::{params, types::Type, Connection, Row};

/// Full name as reported: `last first patronymic`.
const FIO: &str = "trim(coalesce(cln.last_name, '') || ' ' || coalesce(cln.first_name, '') || ' ' \
                   || coalesce(cln.patronymic, ''))";

/// Cardholder identity joined onto a transaction-shaped relation `src`.
fn cardholder_join(src: &str) -> String {
    format!(
        "JOIN cards crd ON trim(crd.card_num) = {src}.card_num
         JOIN accounts acc ON acc.account = crd.account
         JOIN clients cln ON cln.client_id = acc.client"
    )
}

pub(super) fn create_report_table(registry: &EntityRegistry) -> DwhResult<String> {
    let columns = sql::columns(&[
        ("event_dt", "TEXT NOT NULL"),
        ("passport", "TEXT"),
        ("fio", "TEXT"),
        ("phone", "TEXT"),
        ("event_type", "TEXT NOT NULL"),
        ("report_dt", "TEXT NOT NULL"),
    ])?;
    Ok(sql::create_table(&registry.report_table, &columns, &[]))
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let text: String = row.get(idx)?;
    parse_timestamp(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("malformed timestamp '{text}'").into(),
        )
    })
}

fn read_fraud_events(conn: &Connection, registry: &EntityRegistry) -> DwhResult<Vec<FraudEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT event_dt, passport, fio, phone, event_type, report_dt
         FROM {} ORDER BY rowid ASC",
        registry.report_table
    ))?;
    let events = stmt
        .query_map([], |row| {
            Ok(FraudEvent {
                event_dt: timestamp_at(row, 0)?,
                passport: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                fio: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                phone: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                event_type: row.get(4)?,
                report_dt: timestamp_at(row, 5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

impl StoreTx<'_> {
    // ── Declarative rules ─────────────────────────────────────────
    //
    // Every rule binds: ?1 load day (YYYY-MM-DD), ?2 rule label,
    // ?3 detection timestamp.

    /// Transactions made on an expired or blacklisted passport.
    pub fn insert_expired_document_events(
        &self,
        registry: &EntityRegistry,
        day: &str,
        label: &str,
        detected_at: Timestamp,
    ) -> DwhResult<usize> {
        let trn = &registry.spec(EntityKind::Transactions).history_table;
        let blk = &registry.spec(EntityKind::PassportBlacklist).history_table;
        let sql = format!(
            "INSERT INTO {rep} (event_dt, passport, fio, phone, event_type, report_dt)
             SELECT trn.trans_date, cln.passport_num, {FIO}, cln.phone, ?2, ?3
             FROM {trn} trn
             {join}
             WHERE date(trn.trans_date) = ?1
               AND (
                   (cln.passport_valid_to IS NOT NULL
                    AND trn.trans_date > cln.passport_valid_to || ' 00:00:00')
                   OR EXISTS (
                       SELECT 1 FROM {blk} blk
                       WHERE trim(blk.passport_num) = trim(cln.passport_num)
                         AND blk.deleted_flg = 0
                         AND blk.entry_dt <= date(trn.trans_date)
                   )
               )
             ORDER BY trn.trans_date",
            rep = registry.report_table,
            join = cardholder_join("trn"),
        );
        let inserted = self
            .tx
            .execute(&sql, params![day, label, format_timestamp(detected_at)])?;
        Ok(inserted)
    }

    /// Transactions made after the account's contract ended.
    pub fn insert_inactive_contract_events(
        &self,
        registry: &EntityRegistry,
        day: &str,
        label: &str,
        detected_at: Timestamp,
    ) -> DwhResult<usize> {
        let trn = &registry.spec(EntityKind::Transactions).history_table;
        let sql = format!(
            "INSERT INTO {rep} (event_dt, passport, fio, phone, event_type, report_dt)
             SELECT trn.trans_date, cln.passport_num, {FIO}, cln.phone, ?2, ?3
             FROM {trn} trn
             {join}
             WHERE date(trn.trans_date) = ?1
               AND acc.valid_to IS NOT NULL
               AND date(trn.trans_date) > acc.valid_to
             ORDER BY trn.trans_date",
            rep = registry.report_table,
            join = cardholder_join("trn"),
        );
        let inserted = self
            .tx
            .execute(&sql, params![day, label, format_timestamp(detected_at)])?;
        Ok(inserted)
    }

    /// Transactions whose terminal city differs from the card's previous
    /// transaction. `window_minutes` (?4) limits how far apart the two may be.
    pub fn insert_city_change_events(
        &self,
        registry: &EntityRegistry,
        day: &str,
        label: &str,
        detected_at: Timestamp,
        window_minutes: Option<i64>,
    ) -> DwhResult<usize> {
        let trn = &registry.spec(EntityKind::Transactions).history_table;
        let trm = &registry.spec(EntityKind::Terminals).history_table;
        let sql = format!(
            "INSERT INTO {rep} (event_dt, passport, fio, phone, event_type, report_dt)
             SELECT ord.trans_date, cln.passport_num, {FIO}, cln.phone, ?2, ?3
             FROM (
                 SELECT trn.trans_id, trn.trans_date, trn.card_num, trm.terminal_city,
                        LAG(trm.terminal_city) OVER w AS prev_city,
                        LAG(trn.trans_date) OVER w AS prev_date
                 FROM {trn} trn
                 JOIN {trm} trm
                   ON trm.terminal_id = trn.terminal
                  AND trn.trans_date BETWEEN trm.effective_from AND trm.effective_to
                 WINDOW w AS (PARTITION BY trn.card_num ORDER BY trn.trans_date, trn.trans_id)
             ) ord
             {join}
             WHERE date(ord.trans_date) = ?1
               AND ord.prev_city IS NOT NULL
               AND ord.terminal_city <> ord.prev_city
               AND (?4 IS NULL
                    OR (julianday(ord.trans_date) - julianday(ord.prev_date)) * 1440.0 <= ?4)
             ORDER BY ord.card_num, ord.trans_date",
            rep = registry.report_table,
            join = cardholder_join("ord"),
        );
        let inserted = self.tx.execute(
            &sql,
            params![day, label, format_timestamp(detected_at), window_minutes],
        )?;
        Ok(inserted)
    }

    // ── Amount probing ────────────────────────────────────────────

    /// The day's transactions with cardholder identity, ordered by card then
    /// time.
    pub fn probe_candidates(&self, registry: &EntityRegistry, day: &str) -> DwhResult<Vec<ProbeRow>> {
        let trn = &registry.spec(EntityKind::Transactions).history_table;
        let mut stmt = self.tx.prepare(&format!(
            "SELECT trn.trans_date, trn.card_num, cln.passport_num, {FIO}, cln.phone,
                    trn.amt, trn.oper_result
             FROM {trn} trn
             {join}
             WHERE date(trn.trans_date) = ?1
             ORDER BY trn.card_num, trn.trans_date, trn.trans_id",
            join = cardholder_join("trn"),
        ))?;
        let rows = stmt
            .query_map(params![day], |row| {
                let amount = FieldType::Decimal
                    .decode(row.get_ref(5)?)?
                    .as_decimal()
                    .unwrap_or_default();
                Ok(ProbeRow {
                    event_dt: timestamp_at(row, 0)?,
                    card_num: row.get(1)?,
                    passport: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    fio: row.get(3)?,
                    phone: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    amount,
                    outcome: Outcome::parse(&row.get::<_, Option<String>>(6)?.unwrap_or_default()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_fraud_events(&self, registry: &EntityRegistry, events: &[FraudEvent]) -> DwhResult<usize> {
        let mut stmt = self.tx.prepare(&format!(
            "INSERT INTO {} (event_dt, passport, fio, phone, event_type, report_dt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            registry.report_table
        ))?;
        for e in events {
            stmt.execute(params![
                format_timestamp(e.event_dt),
                &e.passport,
                &e.fio,
                &e.phone,
                &e.event_type,
                format_timestamp(e.report_dt)
            ])?;
        }
        Ok(events.len())
    }
}

impl DwhStore {
    pub fn fraud_events(&self, registry: &EntityRegistry) -> DwhResult<Vec<FraudEvent>> {
        read_fraud_events(&self.conn, registry)
    }
}
