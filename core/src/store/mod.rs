//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Engines call store methods; they never execute SQL directly.
//!
//! Writes happen through a `StoreTx`, a scoped transaction that rolls back
//! when dropped without `commit()`. Reads used by operators and tests live
//! on `DwhStore` itself.

use crate::{
    error::DwhResult,
    event::{LoadEvent, LoadLogEntry},
    registry::EntityRegistry,
    sql::{self, Ident},
    types::LoadDate,
};
use rusqlite::{params, Connection, Transaction};

mod fraud;
mod history;
mod meta;
mod reference;

pub use reference::{AccountRow, CardRow, ClientRow};

pub struct DwhStore {
    conn: Connection,
}

impl DwhStore {
    pub fn open(path: &str) -> DwhResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> DwhResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Create the reference tables the fraud rules join against.
    pub fn migrate(&self) -> DwhResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_reference.sql"))?;
        Ok(())
    }

    /// Create every warehouse table the registry names, if absent.
    pub fn prepare(&mut self, registry: &EntityRegistry) -> DwhResult<()> {
        let tx = self.begin()?;
        tx.tx.execute_batch(&meta::create_meta_table(registry)?)?;
        tx.tx.execute_batch(&fraud::create_report_table(registry)?)?;
        tx.tx.execute_batch(&create_load_log_table(&registry.load_log_table)?)?;
        for spec in registry.specs() {
            for statement in history::history_ddl(spec)? {
                tx.tx.execute_batch(&statement)?;
            }
        }
        tx.commit()
    }

    /// Begin the scoped transaction for one unit of work.
    pub fn begin(&mut self) -> DwhResult<StoreTx<'_>> {
        Ok(StoreTx { tx: self.conn.transaction()? })
    }

    /// Run operator-supplied SQL (reference data seeding).
    pub fn execute_script(&self, sql: &str) -> DwhResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    // ── Load log ───────────────────────────────────────────────

    pub fn load_events(&self, registry: &EntityRegistry, run_id: &str) -> DwhResult<Vec<LoadLogEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, run_id, load_date, event_type, payload
             FROM {} WHERE run_id = ?1
             ORDER BY id ASC",
            registry.load_log_table
        ))?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(LoadLogEntry {
                    id: Some(row.get(0)?),
                    run_id: row.get(1)?,
                    load_date: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn count_rows(&self, table: &Ident) -> DwhResult<i64> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count)
    }
}

/// A scoped transaction. Dropping it without `commit()` rolls back.
pub struct StoreTx<'a> {
    tx: Transaction<'a>,
}

impl StoreTx<'_> {
    pub fn commit(self) -> DwhResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> DwhResult<()> {
        self.tx.rollback()?;
        Ok(())
    }

    pub fn append_load_event(
        &self,
        registry: &EntityRegistry,
        run_id: &str,
        load_date: LoadDate,
        event: &LoadEvent,
    ) -> DwhResult<()> {
        let entry = LoadLogEntry::new(run_id, load_date, event)?;
        self.tx.execute(
            &format!(
                "INSERT INTO {} (run_id, load_date, event_type, payload)
                 VALUES (?1, ?2, ?3, ?4)",
                registry.load_log_table
            ),
            params![entry.run_id, entry.load_date, entry.event_type, entry.payload],
        )?;
        Ok(())
    }
}

fn create_load_log_table(table: &Ident) -> DwhResult<String> {
    let columns = sql::columns(&[
        ("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        ("run_id", "TEXT NOT NULL"),
        ("load_date", "TEXT NOT NULL"),
        ("event_type", "TEXT NOT NULL"),
        ("payload", "TEXT NOT NULL"),
    ])?;
    Ok(sql::create_table(table, &columns, &[]))
}
