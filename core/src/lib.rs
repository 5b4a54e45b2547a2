//! fraudwatch-core: daily snapshot warehouse with versioned history and
//! fraud reporting.

pub mod amount_probing;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod fraud_rules;
pub mod registry;
pub mod sql;
pub mod staging;
pub mod store;
pub mod types;
pub mod value;
pub mod versioning;
