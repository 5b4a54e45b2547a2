//! The load engine: drives daily cycles over a directory of batch files.
//!
//! EXECUTION ORDER within a cycle (fixed, documented, never reordered):
//!   1. Terminals            (dimension)
//!   2. Passport blacklist   (dimension)
//!   3. Transactions         (fact)
//!   4. Fraud rules          (see fraud_rules.rs)
//!
//! RULES:
//!   - One transaction per entity-cycle. A failed entity leaves the store as
//!     it was before that entity and stops the day.
//!   - Fraud rules run only after every entity of the day has committed.
//!   - Cancellation is checked before each entity and before the rules.
//!     Entities already committed stay committed.

use crate::{
    clock::{format_date, LoadClock},
    config::DwhConfig,
    error::{DwhError, DwhResult},
    event::LoadEvent,
    fraud_rules::{FraudReport, FraudRuleEngine},
    registry::{EntityKind, EntityRegistry},
    staging::{read_batch, BatchFile},
    store::DwhStore,
    types::{LoadDate, RunId, Timestamp},
    versioning::{ApplyReport, VersioningEngine},
};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Suffix appended to archived batch files.
pub const ARCHIVE_SUFFIX: &str = "backup";

/// A fresh identifier for one invocation of the loader.
pub fn new_run_id() -> RunId {
    format!("load-{}", uuid::Uuid::new_v4())
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The batches of one daily cycle, in load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayPlan {
    pub index: usize,
    /// Date the fraud rules evaluate: the transactions batch date, or the
    /// latest batch date when the cycle carries no transactions.
    pub load_date: LoadDate,
    pub batches: Vec<BatchFile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub load_date: LoadDate,
    pub entities: Vec<ApplyReport>,
    pub fraud: FraudReport,
}

/// Group batch files by kind and cut them into daily cycles.
///
/// Cycle *n* takes the *n*-th file (by date) of every kind that has one.
/// Files that do not follow `<kind>_<DDMMYYYY>.<ext>` are skipped.
pub fn plan(input_dir: &Path) -> DwhResult<Vec<DayPlan>> {
    let mut groups: BTreeMap<EntityKind, Vec<BatchFile>> = BTreeMap::new();
    for entry in fs::read_dir(input_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match BatchFile::parse(&path) {
            Ok(file) => groups.entry(file.kind).or_default().push(file),
            Err(e) => log::warn!("Skipping {}: {e}", path.display()),
        }
    }
    for files in groups.values_mut() {
        files.sort_by(|a, b| a.load_date.cmp(&b.load_date).then_with(|| a.file_name.cmp(&b.file_name)));
    }

    let cycles = groups.values().map(Vec::len).max().unwrap_or(0);
    let mut plans = Vec::with_capacity(cycles);
    for index in 0..cycles {
        let batches: Vec<BatchFile> = groups
            .values()
            .filter_map(|files| files.get(index).cloned())
            .collect();
        let load_date = batches
            .iter()
            .find(|b| b.kind == EntityKind::Transactions)
            .or_else(|| batches.iter().max_by_key(|b| b.load_date))
            .map(|b| b.load_date);
        if let Some(load_date) = load_date {
            plans.push(DayPlan { index, load_date, batches });
        }
    }
    Ok(plans)
}

pub struct LoadEngine {
    pub run_id:   RunId,
    config:       DwhConfig,
    registry:     EntityRegistry,
    fraud:        FraudRuleEngine,
    store:        DwhStore,
    cancel:       CancelToken,
}

impl LoadEngine {
    /// Build a fully wired engine and make sure every table exists.
    pub fn build(run_id: RunId, config: DwhConfig, mut store: DwhStore) -> DwhResult<Self> {
        config.validate().map_err(|e| DwhError::Config(e.to_string()))?;
        let registry = EntityRegistry::build(&config)?;
        store.migrate()?;
        store.prepare(&registry)?;
        Ok(Self {
            fraud: FraudRuleEngine::build(&config),
            run_id,
            config,
            registry,
            store,
            cancel: CancelToken::new(),
        })
    }

    /// In-memory engine with default configuration. Used by tests.
    pub fn build_test(run_id: &str) -> DwhResult<Self> {
        Self::build(run_id.to_string(), DwhConfig::default(), DwhStore::in_memory()?)
    }

    pub fn config(&self) -> &DwhConfig {
        &self.config
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn store(&self) -> &DwhStore {
        &self.store
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn check_cancelled(&self, stage: impl Into<String>) -> DwhResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DwhError::Cancelled { stage: stage.into() });
        }
        Ok(())
    }

    /// Load every batch of the day, then evaluate the fraud rules.
    pub fn run_cycle(&mut self, day: &DayPlan, detected_at: Timestamp) -> DwhResult<CycleReport> {
        log::info!(
            "Cycle {} ({}): {} batches",
            day.index + 1,
            format_date(day.load_date),
            day.batches.len()
        );
        {
            let tx = self.store.begin()?;
            tx.append_load_event(
                &self.registry,
                &self.run_id,
                day.load_date,
                &LoadEvent::CycleStarted { batches: day.batches.len() },
            )?;
            tx.commit()?;
        }

        let mut entities = Vec::with_capacity(day.batches.len());
        for batch in &day.batches {
            self.check_cancelled(format!("{} batch {}", batch.kind, batch.file_name))?;
            let spec = self.registry.spec(batch.kind);
            let staged = read_batch(spec, batch)?;

            let versioning = VersioningEngine::new(&self.registry, self.config.delete_policy);
            let tx = self.store.begin()?;
            let report = versioning.apply(&tx, &staged, &self.run_id)?;
            tx.commit()?;

            log::info!(
                "{}: {} staged, {} new, {} updated, {} deleted, {} appended",
                batch.file_name,
                report.staged,
                report.new,
                report.updated,
                report.deleted,
                report.appended
            );
            entities.push(report);
        }

        self.check_cancelled("fraud rules")?;
        let fraud = self.fraud.evaluate(
            &mut self.store,
            &self.registry,
            LoadClock::new(day.load_date),
            detected_at,
            &self.run_id,
        )?;

        let tx = self.store.begin()?;
        tx.append_load_event(
            &self.registry,
            &self.run_id,
            day.load_date,
            &LoadEvent::CycleCompleted { entities: entities.len(), fraud_events: fraud.total() },
        )?;
        tx.commit()?;

        Ok(CycleReport { load_date: day.load_date, entities, fraud })
    }

    /// Move the day's files to the archive directory as `<file>.backup`.
    /// Does nothing when archiving is disabled.
    pub fn archive(&self, day: &DayPlan) -> DwhResult<Vec<PathBuf>> {
        if !self.config.archive {
            return Ok(Vec::new());
        }
        let archive_dir = Path::new(&self.config.archive_dir);
        fs::create_dir_all(archive_dir)?;

        let mut moved = Vec::with_capacity(day.batches.len());
        for batch in &day.batches {
            let dest = archive_dir.join(format!("{}.{ARCHIVE_SUFFIX}", batch.file_name));
            if fs::rename(&batch.path, &dest).is_err() {
                // Cross-device moves cannot rename.
                fs::copy(&batch.path, &dest)?;
                fs::remove_file(&batch.path)?;
            }
            log::debug!("Archived {} to {}", batch.file_name, dest.display());
            moved.push(dest);
        }
        Ok(moved)
    }

    /// Plan the configured input directory and run every cycle in order,
    /// archiving each day after it completes.
    pub fn run_directory(&mut self, detected_at: Timestamp) -> DwhResult<Vec<CycleReport>> {
        let days = plan(Path::new(&self.config.input_dir))?;
        log::info!("{} daily cycles planned from {}", days.len(), self.config.input_dir);

        let mut reports = Vec::with_capacity(days.len());
        for day in &days {
            reports.push(self.run_cycle(day, detected_at)?);
            self.archive(day)?;
        }
        Ok(reports)
    }
}
