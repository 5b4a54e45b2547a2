//! Shared primitive types used across the warehouse.

/// The business day a batch belongs to.
pub type LoadDate = chrono::NaiveDate;

/// A point on the history timeline. Second precision.
pub type Timestamp = chrono::NaiveDateTime;

/// Primary-key value of a tracked entity, always carried as text.
pub type EntityKey = String;

/// The canonical load-run identifier.
pub type RunId = String;
