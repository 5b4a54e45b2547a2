//! Load clock: the timeline every history row is measured on.
//!
//! A cycle's clock is pinned to its load date. Versions opened by the
//! cycle start at midnight of that date; versions it closes end one
//! time unit (one second) earlier.

use crate::{
    error::{DwhError, DwhResult},
    types::{LoadDate, Timestamp},
};
use chrono::{Duration, NaiveDate, NaiveTime};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Date token embedded in batch file names.
pub const BATCH_DATE_FORMAT: &str = "%d%m%Y";

/// `effective_to` of an open version.
pub const SENTINEL_TEXT: &str = "2999-12-31 23:59:59";
/// Watermark of an entity that has never been applied.
pub const EPOCH_TEXT: &str = "1900-01-01 00:00:00";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadClock {
    pub load_date: LoadDate,
}

impl LoadClock {
    pub fn new(load_date: LoadDate) -> Self {
        Self { load_date }
    }

    /// `effective_from` for every version opened this cycle.
    pub fn opened_at(&self) -> Timestamp {
        self.load_date.and_time(NaiveTime::MIN)
    }

    /// `effective_to` for every version closed this cycle.
    pub fn closed_at(&self) -> Timestamp {
        self.opened_at() - Duration::seconds(1)
    }

    pub fn day_text(&self) -> String {
        format_date(self.load_date)
    }
}

pub fn sentinel() -> Timestamp {
    parse_timestamp(SENTINEL_TEXT).expect("sentinel literal is a valid timestamp")
}

pub fn epoch() -> Timestamp {
    parse_timestamp(EPOCH_TEXT).expect("epoch literal is a valid timestamp")
}

pub fn format_timestamp(ts: Timestamp) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, the `T`-separated ISO form, and a bare
/// date (midnight).
pub fn parse_timestamp(text: &str) -> Option<Timestamp> {
    let text = text.trim();
    Timestamp::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| Timestamp::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| Timestamp::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| parse_date(text).map(|d| d.and_time(NaiveTime::MIN)))
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(text, "%d.%m.%Y"))
        .ok()
        .or_else(|| {
            // Spreadsheets hand dates over with a zero time part.
            Timestamp::parse_from_str(text, TIMESTAMP_FORMAT)
                .ok()
                .map(|ts| ts.date())
        })
}

pub fn parse_batch_date(token: &str) -> DwhResult<LoadDate> {
    NaiveDate::parse_from_str(token, BATCH_DATE_FORMAT).map_err(|_| DwhError::BadBatchName {
        name: token.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_at_is_one_second_before_opened_at() {
        let clock = LoadClock::new(NaiveDate::from_ymd_opt(2021, 3, 2).unwrap());
        assert_eq!(format_timestamp(clock.opened_at()), "2021-03-02 00:00:00");
        assert_eq!(format_timestamp(clock.closed_at()), "2021-03-01 23:59:59");
    }

    #[test]
    fn sentinel_sorts_after_any_load() {
        let clock = LoadClock::new(NaiveDate::from_ymd_opt(2999, 12, 31).unwrap());
        assert!(clock.opened_at() < sentinel());
        assert!(epoch() < clock.opened_at());
    }

    #[test]
    fn batch_date_token_is_day_month_year() {
        let d = parse_batch_date("01032021").unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2021, 3, 1).unwrap());
        assert!(parse_batch_date("2021-03-01").is_err());
    }

    #[test]
    fn parse_timestamp_accepts_bare_dates() {
        let ts = parse_timestamp("2021-03-01").unwrap();
        assert_eq!(format_timestamp(ts), "2021-03-01 00:00:00");
    }
}
