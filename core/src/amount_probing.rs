//! Amount-probing scanner.
//!
//! Detects a card being walked down through strictly decreasing rejected
//! amounts until an attempt finally succeeds below the last rejected one.
//!
//! The input is one day of transactions ordered by card, then time. The scan
//! is a single forward pass driven by a two-state machine:
//!
//! ```text
//!   Idle ──REJECT──▶ InChain(anchor, last_amount, last_time, len)
//!                      │  next row is a REJECT on the same card with a
//!                      │  strictly smaller amount: extend (len + 1)
//!                      ▼
//!                    terminate: judge the row after the chain, jump the
//!                    cursor past the chain, back to Idle
//! ```
//!
//! Rows consumed by a chain are never examined again. A chain that runs into
//! the end of the sequence has no terminator and never matches.

use crate::{config::ProbeWindow, types::Timestamp};
use rust_decimal::Decimal;

/// Accepted decreasing steps a chain needs beyond its anchor.
pub const MIN_CHAIN_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Reject,
    Other(String),
}

impl Outcome {
    pub fn parse(text: &str) -> Self {
        match text.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Outcome::Success,
            "REJECT" => Outcome::Reject,
            _ => Outcome::Other(text.trim().to_string()),
        }
    }
}

/// One transaction of the day, joined to its cardholder.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRow {
    pub event_dt: Timestamp,
    pub card_num: String,
    pub passport: String,
    pub fio: String,
    pub phone: String,
    pub amount: Decimal,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chain {
    pub anchor: usize,
    pub last_amount: Decimal,
    pub last_time: Timestamp,
    pub len: usize,
}

impl Chain {
    fn open(anchor: usize, row: &ProbeRow) -> Self {
        Self {
            anchor,
            last_amount: row.amount,
            last_time: row.event_dt,
            len: 0,
        }
    }

    /// Index of the first row not yet consumed by the chain.
    fn next(&self) -> usize {
        self.anchor + self.len + 1
    }

    fn accepts(&self, anchor: &ProbeRow, row: &ProbeRow) -> bool {
        row.outcome == Outcome::Reject
            && row.card_num == anchor.card_num
            && row.amount < self.last_amount
    }

    fn extend(&mut self, row: &ProbeRow) {
        self.last_amount = row.amount;
        self.last_time = row.event_dt;
        self.len += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    InChain(Chain),
}

/// A detected probe: the successful row that ended the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeMatch {
    pub anchor: usize,
    pub terminator: usize,
    pub chain_len: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct AmountProbeScanner {
    window: ProbeWindow,
}

impl AmountProbeScanner {
    pub fn new(window: ProbeWindow) -> Self {
        Self { window }
    }

    pub fn scan(&self, rows: &[ProbeRow]) -> Vec<ProbeMatch> {
        let mut matches = Vec::new();
        let mut cursor = 0;
        let mut state = ScanState::Idle;

        loop {
            match state {
                ScanState::Idle => {
                    let Some(row) = rows.get(cursor) else { break };
                    if row.outcome == Outcome::Reject {
                        state = ScanState::InChain(Chain::open(cursor, row));
                    } else {
                        cursor += 1;
                    }
                }
                ScanState::InChain(mut chain) => {
                    let anchor = &rows[chain.anchor];
                    let next = chain.next();
                    match rows.get(next) {
                        Some(row) if chain.accepts(anchor, row) => {
                            chain.extend(row);
                            state = ScanState::InChain(chain);
                        }
                        terminator => {
                            if let Some(t) = terminator {
                                if self.is_probe(anchor, &chain, t) {
                                    matches.push(ProbeMatch {
                                        anchor: chain.anchor,
                                        terminator: next,
                                        chain_len: chain.len,
                                    });
                                }
                            }
                            cursor = next;
                            state = ScanState::Idle;
                        }
                    }
                }
            }
        }

        matches
    }

    fn is_probe(&self, anchor: &ProbeRow, chain: &Chain, terminator: &ProbeRow) -> bool {
        chain.len >= MIN_CHAIN_LEN
            && terminator.outcome == Outcome::Success
            && terminator.amount < chain.last_amount
            && terminator.passport == anchor.passport
            && self.window.admits(chain.last_time - anchor.event_dt)
    }
}
