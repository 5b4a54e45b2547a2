use super::DwhStore;
use crate::error::DwhResult;
use rusqlite::params;

#[derive(Debug, Clone)]
pub struct ClientRow {
    pub client_id: String,
    pub last_name: String,
    pub first_name: String,
    pub patronymic: String,
    pub passport_num: String,
    /// `YYYY-MM-DD`; `None` means the passport never expires.
    pub passport_valid_to: Option<String>,
    pub phone: String,
}

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub account: String,
    /// `YYYY-MM-DD`
    pub valid_to: String,
    pub client: String,
}

#[derive(Debug, Clone)]
pub struct CardRow {
    pub card_num: String,
    pub account: String,
}

impl DwhStore {
    // ── Reference data ────────────────────────────────────────────

    pub fn insert_client(&self, c: &ClientRow) -> DwhResult<()> {
        self.conn.execute(
            "INSERT INTO clients (
                client_id, last_name, first_name, patronymic,
                passport_num, passport_valid_to, phone
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &c.client_id,
                &c.last_name,
                &c.first_name,
                &c.patronymic,
                &c.passport_num,
                &c.passport_valid_to,
                &c.phone
            ],
        )?;
        Ok(())
    }

    pub fn insert_account(&self, a: &AccountRow) -> DwhResult<()> {
        self.conn.execute(
            "INSERT INTO accounts (account, valid_to, client) VALUES (?1, ?2, ?3)",
            params![&a.account, &a.valid_to, &a.client],
        )?;
        Ok(())
    }

    pub fn insert_card(&self, c: &CardRow) -> DwhResult<()> {
        self.conn.execute(
            "INSERT INTO cards (card_num, account) VALUES (?1, ?2)",
            params![&c.card_num, &c.account],
        )?;
        Ok(())
    }
}
