//! Fraud rules against a seeded store.

use chrono::NaiveDate;
use fraudwatch_core::{
    clock::{format_timestamp, parse_timestamp, LoadClock},
    config::{DeletePolicy, DwhConfig},
    error::DwhResult,
    fraud_rules::{
        CityChangeRule, ExpiredDocumentRule, FraudRuleEngine, AMOUNT_PROBING, CITY_CHANGE, EXPIRED_DOCUMENT,
        INACTIVE_CONTRACT,
    },
    registry::{EntityKind, EntityRegistry},
    staging::StagedBatch,
    store::{AccountRow, CardRow, ClientRow, DwhStore},
    types::{LoadDate, Timestamp},
    versioning::VersioningEngine,
};

fn d(day: u32) -> LoadDate {
    NaiveDate::from_ymd_opt(2021, 3, day).unwrap()
}

fn detected_at() -> Timestamp {
    parse_timestamp("2021-03-05 08:00:00").unwrap()
}

fn card(n: u32) -> String {
    format!("4000 0000 0000 000{n}")
}

fn setup() -> DwhResult<(EntityRegistry, DwhStore)> {
    let registry = EntityRegistry::build(&DwhConfig::default())?;
    let mut store = DwhStore::in_memory()?;
    store.migrate()?;
    store.prepare(&registry)?;
    seed_reference(&store)?;
    Ok((registry, store))
}

/// Cards 1..=5 map to accounts A1..=A5:
///   C1: clean, owns A1 (active) and A4 (contract ended 2021-02-15)
///   C2: passport expired 2021-02-01
///   C3: passport blacklisted
///   C5: clean, used for probing
fn seed_reference(store: &DwhStore) -> DwhResult<()> {
    let clients = [
        ("C1", "Ivanov", "Ivan", "Ivanovich", "1111 111111", Some("2030-01-01")),
        ("C2", "Petrov", "Petr", "Petrovich", "2222 222222", Some("2021-02-01")),
        ("C3", "Sidorov", "Sidor", "Sidorovich", "3333 333333", None),
        ("C5", "Smirnova", "Anna", "Olegovna", "5555 555555", Some("2030-01-01")),
    ];
    for (id, last, first, patronymic, passport, valid_to) in clients {
        store.insert_client(&ClientRow {
            client_id: id.into(),
            last_name: last.into(),
            first_name: first.into(),
            patronymic: patronymic.into(),
            passport_num: passport.into(),
            passport_valid_to: valid_to.map(String::from),
            phone: format!("+7 900 000 00 0{}", &id[1..]),
        })?;
    }
    let accounts = [
        ("A1", "2030-01-01", "C1"),
        ("A2", "2030-01-01", "C2"),
        ("A3", "2030-01-01", "C3"),
        ("A4", "2021-02-15", "C1"),
        ("A5", "2030-01-01", "C5"),
    ];
    for (account, valid_to, client) in accounts {
        store.insert_account(&AccountRow {
            account: account.into(),
            valid_to: valid_to.into(),
            client: client.into(),
        })?;
    }
    for n in 1..=5 {
        store.insert_card(&CardRow { card_num: card(n), account: format!("A{n}") })?;
    }
    Ok(())
}

fn batch(registry: &EntityRegistry, kind: EntityKind, date: LoadDate, rows: &[&[&str]]) -> DwhResult<StagedBatch> {
    let rows = rows
        .iter()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .collect();
    StagedBatch::from_rows(registry.spec(kind), date, rows)
}

fn load(registry: &EntityRegistry, store: &mut DwhStore, batch: &StagedBatch) -> DwhResult<()> {
    let engine = VersioningEngine::new(registry, DeletePolicy::CloseOnly);
    let tx = store.begin()?;
    engine.apply(&tx, batch, "fraud-test")?;
    tx.commit()
}

fn load_first_day(registry: &EntityRegistry, store: &mut DwhStore) -> DwhResult<()> {
    let terminals = batch(
        registry,
        EntityKind::Terminals,
        d(1),
        &[&["T1", "POS", "Moscow", "Tverskaya 1"], &["T2", "POS", "Kazan", "Baumana 2"]],
    )?;
    let blacklist = batch(registry, EntityKind::PassportBlacklist, d(1), &[&["2021-02-20", "3333 333333"]])?;
    let c1 = card(1);
    let c2 = card(2);
    let c3 = card(3);
    let c4 = card(4);
    let c5 = card(5);
    let transactions = batch(
        registry,
        EntityKind::Transactions,
        d(1),
        &[
            &["1", "2021-03-01 10:00:00", "100,00", c2.as_str(), "PAYMENT", "SUCCESS", "T1"],
            &["2", "2021-03-01 10:05:00", "50,00", c3.as_str(), "PAYMENT", "SUCCESS", "T1"],
            &["3", "2021-03-01 11:00:00", "70,00", c4.as_str(), "PAYMENT", "SUCCESS", "T1"],
            &["4", "2021-03-01 12:00:00", "10,00", c1.as_str(), "PAYMENT", "SUCCESS", "T1"],
            &["5", "2021-03-01 12:30:00", "10,00", c1.as_str(), "PAYMENT", "SUCCESS", "T2"],
            &["6", "2021-03-01 13:00:00", "500,00", c5.as_str(), "WITHDRAW", "REJECT", "T1"],
            &["7", "2021-03-01 13:01:00", "400,00", c5.as_str(), "WITHDRAW", "REJECT", "T1"],
            &["8", "2021-03-01 13:02:00", "300,00", c5.as_str(), "WITHDRAW", "REJECT", "T1"],
            &["9", "2021-03-01 13:10:00", "250,00", c5.as_str(), "WITHDRAW", "SUCCESS", "T1"],
        ],
    )?;
    load(registry, store, &terminals)?;
    load(registry, store, &blacklist)?;
    load(registry, store, &transactions)
}

#[test]
fn every_rule_fires_once_on_the_seeded_day() -> DwhResult<()> {
    let (registry, mut store) = setup()?;
    load_first_day(&registry, &mut store)?;

    let engine = FraudRuleEngine::build(&DwhConfig::default());
    assert_eq!(engine.rule_count(), 4);
    let report = engine.evaluate(&mut store, &registry, LoadClock::new(d(1)), detected_at(), "fraud-test")?;

    assert_eq!(report.count(EXPIRED_DOCUMENT), 2);
    assert_eq!(report.count(INACTIVE_CONTRACT), 1);
    assert_eq!(report.count(CITY_CHANGE), 1);
    assert_eq!(report.count(AMOUNT_PROBING), 1);
    assert_eq!(report.total(), 5);

    let events = store.fraud_events(&registry)?;
    let summary: Vec<(String, String, &str)> = events
        .iter()
        .map(|e| (format_timestamp(e.event_dt), e.passport.clone(), e.event_type.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("2021-03-01 10:00:00".to_string(), "2222 222222".to_string(), EXPIRED_DOCUMENT),
            ("2021-03-01 10:05:00".to_string(), "3333 333333".to_string(), EXPIRED_DOCUMENT),
            ("2021-03-01 11:00:00".to_string(), "1111 111111".to_string(), INACTIVE_CONTRACT),
            ("2021-03-01 12:30:00".to_string(), "1111 111111".to_string(), CITY_CHANGE),
            ("2021-03-01 13:10:00".to_string(), "5555 555555".to_string(), AMOUNT_PROBING),
        ]
    );
    assert_eq!(events[0].fio, "Petrov Petr Petrovich");
    assert_eq!(events[0].phone, "+7 900 000 00 02");
    assert!(events.iter().all(|e| e.report_dt == detected_at()));
    Ok(())
}

#[test]
fn each_rule_is_recorded_in_the_load_log() -> DwhResult<()> {
    let (registry, mut store) = setup()?;
    load_first_day(&registry, &mut store)?;
    FraudRuleEngine::build(&DwhConfig::default()).evaluate(
        &mut store,
        &registry,
        LoadClock::new(d(1)),
        detected_at(),
        "fraud-test",
    )?;

    let rule_entries: Vec<_> = store
        .load_events(&registry, "fraud-test")?
        .into_iter()
        .filter(|e| e.event_type == "fraud_rule_evaluated")
        .collect();
    assert_eq!(rule_entries.len(), 4);
    assert!(rule_entries.iter().all(|e| e.load_date == "2021-03-01"));
    Ok(())
}

#[test]
fn rules_only_look_at_the_load_day() -> DwhResult<()> {
    let (registry, mut store) = setup()?;
    load_first_day(&registry, &mut store)?;

    let report = FraudRuleEngine::build(&DwhConfig::default()).evaluate(
        &mut store,
        &registry,
        LoadClock::new(d(2)),
        detected_at(),
        "fraud-test",
    )?;
    assert_eq!(report.total(), 0);
    assert!(store.fraud_events(&registry)?.is_empty());
    Ok(())
}

#[test]
fn versioned_blacklist_does_not_duplicate_events() -> DwhResult<()> {
    let (registry, mut store) = setup()?;
    load_first_day(&registry, &mut store)?;

    // Day 2: the blacklist entry is re-dated, so the passport now has a
    // closed and an open version.
    let blacklist = batch(&registry, EntityKind::PassportBlacklist, d(2), &[&["2021-02-21", "3333 333333"]])?;
    load(&registry, &mut store, &blacklist)?;
    let c3 = card(3);
    let transactions = batch(
        &registry,
        EntityKind::Transactions,
        d(2),
        &[&["10", "2021-03-02 09:00:00", "15,00", c3.as_str(), "PAYMENT", "SUCCESS", "T1"]],
    )?;
    load(&registry, &mut store, &transactions)?;
    assert_eq!(
        store.history_for_key(registry.spec(EntityKind::PassportBlacklist), "3333 333333")?.len(),
        2
    );

    let report = FraudRuleEngine::build(&DwhConfig::default()).evaluate(
        &mut store,
        &registry,
        LoadClock::new(d(2)),
        detected_at(),
        "fraud-test",
    )?;
    assert_eq!(report.count(EXPIRED_DOCUMENT), 1);
    Ok(())
}

#[test]
fn city_window_limits_flagged_transitions() -> DwhResult<()> {
    let (registry, mut store) = setup()?;
    load_first_day(&registry, &mut store)?;

    let mut narrow = FraudRuleEngine::new();
    narrow.register(Box::new(CityChangeRule { window_minutes: Some(10) }));
    let report = narrow.evaluate(&mut store, &registry, LoadClock::new(d(1)), detected_at(), "fraud-test")?;
    assert_eq!(report.count(CITY_CHANGE), 0);

    let mut wide = FraudRuleEngine::new();
    wide.register(Box::new(CityChangeRule { window_minutes: Some(60) }));
    let report = wide.evaluate(&mut store, &registry, LoadClock::new(d(1)), detected_at(), "fraud-test")?;
    assert_eq!(report.count(CITY_CHANGE), 1);
    Ok(())
}

#[test]
fn city_change_sees_the_previous_day() -> DwhResult<()> {
    let (registry, mut store) = setup()?;
    load_first_day(&registry, &mut store)?;

    // Card 1 ended day 1 in Kazan (T2); its first day-2 transaction is in
    // Moscow.
    let terminals = batch(
        &registry,
        EntityKind::Terminals,
        d(2),
        &[&["T1", "POS", "Moscow", "Tverskaya 1"], &["T2", "POS", "Kazan", "Baumana 2"]],
    )?;
    load(&registry, &mut store, &terminals)?;
    let c1 = card(1);
    let transactions = batch(
        &registry,
        EntityKind::Transactions,
        d(2),
        &[&["11", "2021-03-02 09:00:00", "10,00", c1.as_str(), "PAYMENT", "SUCCESS", "T1"]],
    )?;
    load(&registry, &mut store, &transactions)?;

    let mut engine = FraudRuleEngine::new();
    engine.register(Box::new(CityChangeRule { window_minutes: None }));
    let report = engine.evaluate(&mut store, &registry, LoadClock::new(d(2)), detected_at(), "fraud-test")?;
    assert_eq!(report.count(CITY_CHANGE), 1);
    Ok(())
}

#[test]
fn probing_uses_the_configured_window() -> DwhResult<()> {
    let (registry, mut store) = setup()?;
    load_first_day(&registry, &mut store)?;

    // Anchor to last reject is 2 minutes: within 20, not at least 20.
    let config = DwhConfig {
        probe_window: fraudwatch_core::config::ProbeWindow::at_least(20),
        ..DwhConfig::default()
    };
    let report = FraudRuleEngine::build(&config).evaluate(
        &mut store,
        &registry,
        LoadClock::new(d(1)),
        detected_at(),
        "fraud-test",
    )?;
    assert_eq!(report.count(AMOUNT_PROBING), 0);
    Ok(())
}

#[test]
fn passport_expires_at_the_start_of_its_last_day() -> DwhResult<()> {
    let (registry, mut store) = setup()?;
    load_first_day(&registry, &mut store)?;
    store.insert_client(&ClientRow {
        client_id: "C6".into(),
        last_name: "Kuznetsov".into(),
        first_name: "Oleg".into(),
        patronymic: "Pavlovich".into(),
        passport_num: "6666 666666".into(),
        passport_valid_to: Some("2021-03-03".into()),
        phone: "+7 900 000 00 06".into(),
    })?;
    store.insert_account(&AccountRow { account: "A6".into(), valid_to: "2030-01-01".into(), client: "C6".into() })?;
    store.insert_card(&CardRow { card_num: card(6), account: "A6".into() })?;

    let c6 = card(6);
    let transactions = batch(
        &registry,
        EntityKind::Transactions,
        d(3),
        &[
            &["20", "2021-03-03 00:00:00", "10,00", c6.as_str(), "PAYMENT", "SUCCESS", "T1"],
            &["21", "2021-03-03 15:00:00", "10,00", c6.as_str(), "PAYMENT", "SUCCESS", "T1"],
        ],
    )?;
    load(&registry, &mut store, &transactions)?;

    let mut engine = FraudRuleEngine::new();
    engine.register(Box::new(ExpiredDocumentRule));
    let report = engine.evaluate(&mut store, &registry, LoadClock::new(d(3)), detected_at(), "fraud-test")?;
    assert_eq!(report.count(EXPIRED_DOCUMENT), 1);

    let events = store.fraud_events(&registry)?;
    assert_eq!(events.len(), 1);
    assert_eq!(format_timestamp(events[0].event_dt), "2021-03-03 15:00:00");
    assert_eq!(events[0].passport, "6666 666666");
    Ok(())
}
