//! Versioning engine.
//!
//! Turns a staged snapshot into history. Dimension-style entities are
//! diffed against their current view and versioned (close the old row, open
//! a new one); fact-style entities are appended as they come.
//!
//! RULE: `apply` runs inside the caller's entity transaction. It never
//! commits; the caller commits once staging, history, meta and the load log
//! are all written.

use crate::{
    clock::{format_date, format_timestamp, sentinel, LoadClock},
    config::DeletePolicy,
    error::{DwhError, DwhResult},
    event::LoadEvent,
    registry::{EntityKind, EntityRegistry, EntitySpec, EntityStyle},
    staging::{StagedBatch, StagedRecord},
    store::StoreTx,
    types::{EntityKey, Timestamp},
    value::FieldValue,
};
use std::collections::{BTreeMap, HashSet};

/// One stored version of a tracked entity.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub key: EntityKey,
    pub values: Vec<FieldValue>,
    pub deleted: bool,
    pub effective_from: Timestamp,
    pub effective_to: Timestamp,
}

impl HistoryRow {
    pub fn is_open(&self) -> bool {
        self.effective_to == sentinel()
    }

    /// Whether `at` falls inside this version's validity interval.
    pub fn covers(&self, at: Timestamp) -> bool {
        self.effective_from <= at && at <= self.effective_to
    }
}

/// Disjoint partition of keys produced by `diff`.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub new: Vec<StagedRecord>,
    pub updated: Vec<StagedRecord>,
    pub deleted: Vec<HistoryRow>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.updated.len() + self.deleted.len()
    }
}

/// Partition staged records against the current view.
///
/// New and Updated follow batch order. Deleted is ordered by key.
pub fn diff(staged: &[StagedRecord], current: &[HistoryRow]) -> ChangeSet {
    let current_by_key: BTreeMap<&str, &HistoryRow> =
        current.iter().map(|r| (r.key.as_str(), r)).collect();
    let staged_keys: HashSet<&str> = staged.iter().map(|r| r.key.as_str()).collect();

    let mut changes = ChangeSet::default();
    for record in staged {
        match current_by_key.get(record.key.as_str()) {
            None => changes.new.push(record.clone()),
            Some(row) if row.values != record.values => changes.updated.push(record.clone()),
            Some(_) => {}
        }
    }
    changes.deleted = current_by_key
        .into_iter()
        .filter(|(key, _)| !staged_keys.contains(key))
        .map(|(_, row)| row.clone())
        .collect();
    changes
}

/// What one entity-cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    pub kind: EntityKind,
    pub staged: usize,
    pub new: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Rows appended for a fact-style entity.
    pub appended: usize,
    pub watermark: Option<Timestamp>,
}

impl ApplyReport {
    pub fn event(&self, style: EntityStyle) -> LoadEvent {
        let watermark = self.watermark.map(format_timestamp).unwrap_or_default();
        match style {
            EntityStyle::Dimension => LoadEvent::EntityVersioned {
                entity: self.kind,
                staged: self.staged,
                new: self.new,
                updated: self.updated,
                deleted: self.deleted,
                watermark,
            },
            EntityStyle::Fact => LoadEvent::FactsAppended {
                entity: self.kind,
                rows: self.appended,
                watermark,
            },
        }
    }
}

pub struct VersioningEngine<'r> {
    registry: &'r EntityRegistry,
    policy: DeletePolicy,
}

impl<'r> VersioningEngine<'r> {
    pub fn new(registry: &'r EntityRegistry, policy: DeletePolicy) -> Self {
        Self { registry, policy }
    }

    /// Stage `batch`, fold it into history, advance the watermark and record
    /// a load-log entry, all inside `tx`.
    pub fn apply(&self, tx: &StoreTx<'_>, batch: &StagedBatch, run_id: &str) -> DwhResult<ApplyReport> {
        let spec = self.registry.spec(batch.kind);
        let clock = LoadClock::new(batch.load_date);

        tx.ensure_meta(self.registry, spec)?;
        tx.rebuild_staging(spec, batch)?;

        let mut report = ApplyReport {
            kind: batch.kind,
            staged: batch.len(),
            new: 0,
            updated: 0,
            deleted: 0,
            appended: 0,
            watermark: None,
        };

        match spec.style {
            EntityStyle::Dimension => {
                let loaded_up_to = tx.watermark(self.registry, spec)?;
                let current = tx.current_rows(spec, clock.opened_at())?;
                let changes = diff(&batch.records, &current);
                // A version closes one second before the load that replaces
                // it, so changes must land strictly after the watermark.
                if let Some(watermark) = loaded_up_to {
                    let opened = clock.opened_at();
                    if watermark > opened || (watermark == opened && !changes.is_empty()) {
                        return Err(DwhError::StaleBatch {
                            entity: spec.kind.to_string(),
                            load_date: format_date(batch.load_date),
                            watermark: format_timestamp(watermark),
                        });
                    }
                }
                self.apply_changes(tx, spec, &clock, &changes)?;
                report.new = changes.new.len();
                report.updated = changes.updated.len();
                report.deleted = changes.deleted.len();
            }
            EntityStyle::Fact => {
                report.appended = tx.append_staged_facts(spec, clock.opened_at())?;
            }
        }

        if let Some(watermark) = tx.staged_watermark(spec)? {
            tx.advance_meta(self.registry, spec, watermark)?;
        }
        report.watermark = tx.watermark(self.registry, spec)?;

        tx.append_load_event(self.registry, run_id, batch.load_date, &report.event(spec.style))?;

        log::debug!(
            "{}: staged={} new={} updated={} deleted={} appended={}",
            spec.kind,
            report.staged,
            report.new,
            report.updated,
            report.deleted,
            report.appended
        );
        Ok(report)
    }

    fn apply_changes(
        &self,
        tx: &StoreTx<'_>,
        spec: &EntitySpec,
        clock: &LoadClock,
        changes: &ChangeSet,
    ) -> DwhResult<()> {
        let opened = clock.opened_at();
        let closed = clock.closed_at();

        for record in &changes.new {
            tx.close_tombstone(spec, &record.key, closed)?;
            tx.insert_version(spec, &record.values, false, opened)?;
        }

        for record in &changes.updated {
            tx.close_open_version(spec, &record.key, closed, false)?;
            tx.insert_version(spec, &record.values, false, opened)?;
        }

        for row in &changes.deleted {
            tx.close_open_version(spec, &row.key, closed, true)?;
            if self.policy == DeletePolicy::ReopenAsDeleted {
                tx.insert_version(spec, &row.values, true, opened)?;
            }
        }
        Ok(())
    }
}
