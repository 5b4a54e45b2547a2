//! The load log: a structured record of what every cycle did.
//!
//! RULE: an event is appended inside the same transaction as the work it
//! describes, so the log never claims work that was rolled back.

use crate::{
    clock::format_date,
    error::DwhResult,
    registry::EntityKind,
    types::{LoadDate, RunId},
};
use serde::{Deserialize, Serialize};

/// Variants are only ever added, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoadEvent {
    CycleStarted {
        batches: usize,
    },
    EntityVersioned {
        entity: EntityKind,
        staged: usize,
        new: usize,
        updated: usize,
        deleted: usize,
        watermark: String,
    },
    FactsAppended {
        entity: EntityKind,
        rows: usize,
        watermark: String,
    },
    FraudRuleEvaluated {
        rule: String,
        events: usize,
    },
    CycleCompleted {
        entities: usize,
        fraud_events: usize,
    },
}

impl LoadEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            LoadEvent::CycleStarted { .. } => "cycle_started",
            LoadEvent::EntityVersioned { .. } => "entity_versioned",
            LoadEvent::FactsAppended { .. } => "facts_appended",
            LoadEvent::FraudRuleEvaluated { .. } => "fraud_rule_evaluated",
            LoadEvent::CycleCompleted { .. } => "cycle_completed",
        }
    }
}

/// A persisted load-log row.
#[derive(Debug, Clone)]
pub struct LoadLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub load_date: String,
    pub event_type: String,
    pub payload: String,
}

impl LoadLogEntry {
    pub fn new(run_id: &str, load_date: LoadDate, event: &LoadEvent) -> DwhResult<Self> {
        Ok(Self {
            id: None,
            run_id: run_id.to_string(),
            load_date: format_date(load_date),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
        })
    }

    pub fn event(&self) -> DwhResult<LoadEvent> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}
