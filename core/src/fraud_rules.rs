//! Fraud rule engine.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Expired document     (declarative)
//!   2. Inactive contract    (declarative)
//!   3. City change          (declarative, windowed LAG)
//!   4. Amount probing       (sequential scan)
//!
//! RULES:
//!   - Rules run only after every entity of the day has committed.
//!   - Each rule runs in its own transaction: read, append events, log.
//!   - Rules never touch history tables, only the fraud report.

use crate::{
    amount_probing::{AmountProbeScanner, ProbeMatch, ProbeRow},
    clock::LoadClock,
    config::{DwhConfig, ProbeWindow},
    error::DwhResult,
    event::LoadEvent,
    registry::EntityRegistry,
    store::{DwhStore, StoreTx},
    types::Timestamp,
};

// ── Labels ───────────────────────────────────────────────────────────────────

pub const EXPIRED_DOCUMENT: &str = "Operation with an expired or blacklisted passport";
pub const INACTIVE_CONTRACT: &str = "Operation under an inactive contract";
pub const CITY_CHANGE: &str = "Operations in different cities";
pub const AMOUNT_PROBING: &str = "Amount probing attempt";

/// One row of the fraud report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FraudEvent {
    pub event_dt: Timestamp,
    pub passport: String,
    pub fio: String,
    pub phone: String,
    pub event_type: String,
    pub report_dt: Timestamp,
}

/// What a rule sees when it runs.
pub struct RuleContext<'a> {
    pub registry: &'a EntityRegistry,
    pub clock: LoadClock,
    pub detected_at: Timestamp,
}

/// The contract every fraud rule fulfills.
pub trait FraudRule {
    /// Label written to the report's event_type column.
    fn label(&self) -> &'static str;

    /// Append this rule's events for the load day. Returns how many.
    fn evaluate(&self, tx: &StoreTx<'_>, ctx: &RuleContext<'_>) -> DwhResult<usize>;
}

pub struct ExpiredDocumentRule;

impl FraudRule for ExpiredDocumentRule {
    fn label(&self) -> &'static str {
        EXPIRED_DOCUMENT
    }

    fn evaluate(&self, tx: &StoreTx<'_>, ctx: &RuleContext<'_>) -> DwhResult<usize> {
        tx.insert_expired_document_events(ctx.registry, &ctx.clock.day_text(), self.label(), ctx.detected_at)
    }
}

pub struct InactiveContractRule;

impl FraudRule for InactiveContractRule {
    fn label(&self) -> &'static str {
        INACTIVE_CONTRACT
    }

    fn evaluate(&self, tx: &StoreTx<'_>, ctx: &RuleContext<'_>) -> DwhResult<usize> {
        tx.insert_inactive_contract_events(ctx.registry, &ctx.clock.day_text(), self.label(), ctx.detected_at)
    }
}

pub struct CityChangeRule {
    pub window_minutes: Option<i64>,
}

impl FraudRule for CityChangeRule {
    fn label(&self) -> &'static str {
        CITY_CHANGE
    }

    fn evaluate(&self, tx: &StoreTx<'_>, ctx: &RuleContext<'_>) -> DwhResult<usize> {
        tx.insert_city_change_events(
            ctx.registry,
            &ctx.clock.day_text(),
            self.label(),
            ctx.detected_at,
            self.window_minutes,
        )
    }
}

pub struct AmountProbingRule {
    pub scanner: AmountProbeScanner,
}

impl AmountProbingRule {
    pub fn new(window: ProbeWindow) -> Self {
        Self { scanner: AmountProbeScanner::new(window) }
    }
}

impl FraudRule for AmountProbingRule {
    fn label(&self) -> &'static str {
        AMOUNT_PROBING
    }

    fn evaluate(&self, tx: &StoreTx<'_>, ctx: &RuleContext<'_>) -> DwhResult<usize> {
        let rows = tx.probe_candidates(ctx.registry, &ctx.clock.day_text())?;
        let matches = self.scanner.scan(&rows);
        let events = probe_events(&rows, &matches, self.label(), ctx.detected_at);
        tx.insert_fraud_events(ctx.registry, &events)
    }
}

/// One event per match, stamped with the terminating transaction.
pub fn probe_events(
    rows: &[ProbeRow],
    matches: &[ProbeMatch],
    label: &str,
    detected_at: Timestamp,
) -> Vec<FraudEvent> {
    matches
        .iter()
        .map(|m| {
            let t = &rows[m.terminator];
            FraudEvent {
                event_dt: t.event_dt,
                passport: t.passport.clone(),
                fio: t.fio.clone(),
                phone: t.phone.clone(),
                event_type: label.to_string(),
                report_dt: detected_at,
            }
        })
        .collect()
}

/// Per-rule match counts of one evaluation, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FraudReport {
    pub counts: Vec<(&'static str, usize)>,
}

impl FraudReport {
    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, n)| n).sum()
    }

    pub fn count(&self, label: &str) -> usize {
        self.counts
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

pub struct FraudRuleEngine {
    rules: Vec<Box<dyn FraudRule>>,
}

impl FraudRuleEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Build the engine with all four rules in execution order.
    pub fn build(config: &DwhConfig) -> Self {
        let mut engine = FraudRuleEngine::new();
        engine.register(Box::new(ExpiredDocumentRule));
        engine.register(Box::new(InactiveContractRule));
        engine.register(Box::new(CityChangeRule { window_minutes: config.city_window_minutes }));
        engine.register(Box::new(AmountProbingRule::new(config.probe_window)));
        engine
    }

    /// Register a rule. Call in the documented execution order.
    pub fn register(&mut self, rule: Box<dyn FraudRule>) {
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Run every rule for the load day, each in its own transaction.
    pub fn evaluate(
        &self,
        store: &mut DwhStore,
        registry: &EntityRegistry,
        clock: LoadClock,
        detected_at: Timestamp,
        run_id: &str,
    ) -> DwhResult<FraudReport> {
        let ctx = RuleContext { registry, clock, detected_at };
        let mut report = FraudReport::default();

        for rule in &self.rules {
            let tx = store.begin()?;
            let events = rule.evaluate(&tx, &ctx)?;
            tx.append_load_event(
                registry,
                run_id,
                clock.load_date,
                &LoadEvent::FraudRuleEvaluated { rule: rule.label().to_string(), events },
            )?;
            tx.commit()?;

            log::info!("{}: {} '{}' events", clock.day_text(), events, rule.label());
            report.counts.push((rule.label(), events));
        }
        Ok(report)
    }
}

impl Default for FraudRuleEngine {
    fn default() -> Self {
        Self::new()
    }
}
