//! Batch naming, file reading and coercion errors.

use fraudwatch_core::{
    config::DwhConfig,
    error::{DwhError, DwhResult},
    registry::{EntityKind, EntityRegistry},
    staging::{read_batch, BatchFile, BatchFormat, StagedBatch},
    value::FieldValue,
};
use rust_decimal::Decimal;
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fraudwatch-staging-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn registry() -> EntityRegistry {
    EntityRegistry::build(&DwhConfig::default()).unwrap()
}

#[test]
fn batch_name_carries_kind_and_date() -> DwhResult<()> {
    let file = BatchFile::parse(Path::new("data/passport_blacklist_02032021.xlsx"))?;
    assert_eq!(file.kind, EntityKind::PassportBlacklist);
    assert_eq!(file.load_date.to_string(), "2021-03-02");
    assert_eq!(file.format()?, BatchFormat::Spreadsheet);
    Ok(())
}

#[test]
fn malformed_names_are_rejected() {
    assert!(matches!(BatchFile::parse(Path::new("notes.md")), Err(DwhError::BadBatchName { .. })));
    assert!(matches!(
        BatchFile::parse(Path::new("terminals_2021-03-01.txt")),
        Err(DwhError::BadBatchName { .. })
    ));
    assert!(matches!(
        BatchFile::parse(Path::new("clients_01032021.txt")),
        Err(DwhError::UnknownEntity { .. })
    ));
}

#[test]
fn delimited_file_skips_header_and_coerces_types() -> DwhResult<()> {
    let dir = scratch_dir();
    let path = write(
        &dir,
        "transactions_01032021.txt",
        "transaction_id;transaction_date;amount;card_num;oper_type;oper_result;terminal\n\
         9001;2021-03-01 00:00:58;n/a;4000 0000 0000 0001;WITHDRAW;SUCCESS;A1\n",
    );
    let registry = registry();
    let file = BatchFile::parse(&path)?;
    let result = read_batch(registry.spec(file.kind), &file);
    assert!(matches!(result, Err(DwhError::SchemaViolation { .. })));

    let path = write(
        &dir,
        "transactions_02032021.txt",
        "transaction_id;transaction_date;amount;card_num;oper_type;oper_result;terminal\n\
         9003;2021-03-02 00:00:58;39842,13;4000 0000 0000 0001;WITHDRAW;SUCCESS;A1\n\
         9004;2021-03-02 00:01:20;60,0;4000 0000 0000 0002;PAYMENT;REJECT;P2\n",
    );
    let file = BatchFile::parse(&path)?;
    let batch = read_batch(registry.spec(file.kind), &file)?;
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.records[0].key, "9003");
    assert_eq!(
        batch.records[0].values[2],
        FieldValue::Decimal(Decimal::from_str("39842.13").unwrap())
    );
    assert_eq!(batch.records[1].values[2].to_string(), "60");
    assert_eq!(batch.record_timestamp().to_string(), "2021-03-02 00:00:00");

    fs::remove_dir_all(&dir).ok();
    Ok(())
}

#[test]
fn unsupported_extension_is_an_error() -> DwhResult<()> {
    let dir = scratch_dir();
    let path = write(&dir, "terminals_01032021.csv", "terminal_id,terminal_type\n");
    let file = BatchFile::parse(&path)?;
    match read_batch(registry().spec(file.kind), &file) {
        Err(DwhError::UnsupportedFormat { extension, .. }) => assert_eq!(extension, "csv"),
        other => panic!("expected UnsupportedFormat, got {other:?}"),
    }
    fs::remove_dir_all(&dir).ok();
    Ok(())
}

fn rows(raw: &[&[&str]]) -> Vec<Vec<String>> {
    raw.iter().map(|r| r.iter().map(|c| c.to_string()).collect()).collect()
}

#[test]
fn duplicate_key_is_a_schema_violation() {
    let registry = registry();
    let spec = registry.spec(EntityKind::Terminals);
    let date = chrono::NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
    let result = StagedBatch::from_rows(
        spec,
        date,
        rows(&[&["P1", "POS", "Moscow", "a"], &["P1", "ATM", "Kazan", "b"]]),
    );
    match result {
        Err(DwhError::SchemaViolation { field, value, .. }) => {
            assert_eq!(field, "terminal_id");
            assert_eq!(value, "P1");
        }
        other => panic!("expected SchemaViolation, got {other:?}"),
    }
}

#[test]
fn wrong_column_count_and_bad_values_are_schema_violations() {
    let registry = registry();
    let date = chrono::NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();

    let short = StagedBatch::from_rows(registry.spec(EntityKind::Terminals), date, rows(&[&["P1", "POS"]]));
    assert!(matches!(short, Err(DwhError::SchemaViolation { .. })));

    let bad_date = StagedBatch::from_rows(
        registry.spec(EntityKind::PassportBlacklist),
        date,
        rows(&[&["yesterday", "1111 111111"]]),
    );
    match bad_date {
        Err(DwhError::SchemaViolation { field, .. }) => assert_eq!(field, "entry_dt"),
        other => panic!("expected SchemaViolation, got {other:?}"),
    }

    let no_key = StagedBatch::from_rows(
        registry.spec(EntityKind::PassportBlacklist),
        date,
        rows(&[&["2021-02-20", ""]]),
    );
    assert!(matches!(no_key, Err(DwhError::SchemaViolation { .. })));
}

#[test]
fn blacklist_accepts_dotted_dates() -> DwhResult<()> {
    let registry = registry();
    let date = chrono::NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
    let batch = StagedBatch::from_rows(
        registry.spec(EntityKind::PassportBlacklist),
        date,
        rows(&[&["20.02.2021", "1111 111111"]]),
    )?;
    assert_eq!(batch.records[0].key, "1111 111111");
    assert_eq!(batch.records[0].values[0].to_string(), "2021-02-20");
    Ok(())
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

#[test]
fn spreadsheet_batch_skips_header_and_converts_cells() -> DwhResult<()> {
    let registry = registry();
    let file = BatchFile::parse(&fixture("transactions_01032021.xlsx"))?;
    assert_eq!(file.format()?, BatchFormat::Spreadsheet);

    let batch = read_batch(registry.spec(file.kind), &file)?;
    assert_eq!(batch.len(), 2);
    // Whole-number ids arrive as floats and keep no fraction.
    assert_eq!(batch.records[0].key, "9001");
    assert_eq!(batch.records[1].key, "9002");
    // Date-formatted cells become timestamps.
    assert_eq!(batch.records[0].values[1].to_string(), "2021-03-01 12:00:00");
    assert_eq!(batch.records[1].values[1].to_string(), "2021-03-01 18:00:00");
    assert_eq!(
        batch.records[0].values[2],
        FieldValue::Decimal(Decimal::from_str("39842.13").unwrap())
    );
    assert_eq!(batch.records[1].values[2].to_string(), "60");
    assert_eq!(batch.records[0].values[3].to_string(), "4000 0000 0000 0001");
    assert_eq!(batch.records[1].values[5].to_string(), "REJECT");
    Ok(())
}

#[test]
fn spreadsheet_date_cells_fill_date_fields() -> DwhResult<()> {
    let registry = registry();
    let file = BatchFile::parse(&fixture("passport_blacklist_01032021.xlsx"))?;
    let batch = read_batch(registry.spec(file.kind), &file)?;
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.records[0].key, "1111 111111");
    assert_eq!(batch.records[0].values[0].to_string(), "2021-02-20");
    assert_eq!(batch.records[1].values[0].to_string(), "2021-02-21");
    Ok(())
}
