//! Staging loader: turns one batch file into a typed, in-memory record set.
//!
//! Batch files are named `<kind>_<DDMMYYYY>.<ext>`. Delimited text (`.txt`,
//! `;`-separated) and spreadsheets (`.xlsx`, first worksheet) are read; the
//! first line of either is a header. Columns map to the entity's declared
//! fields by position.

use crate::{
    clock::{parse_batch_date, LoadClock, TIMESTAMP_FORMAT},
    error::{DwhError, DwhResult},
    registry::{EntityKind, EntitySpec},
    types::{EntityKey, LoadDate, Timestamp},
    value::FieldValue,
};
use calamine::{open_workbook_auto, Data, Reader};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFormat {
    Delimited,
    Spreadsheet,
}

impl BatchFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "txt" => Some(BatchFormat::Delimited),
            "xlsx" => Some(BatchFormat::Spreadsheet),
            _ => None,
        }
    }
}

/// A batch file identified by its name. Nothing is read yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: EntityKind,
    pub load_date: LoadDate,
    pub extension: String,
}

impl BatchFile {
    pub fn parse(path: &Path) -> DwhResult<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DwhError::BadBatchName { name: path.display().to_string() })?
            .to_string();
        let bad_name = || DwhError::BadBatchName { name: file_name.clone() };

        let (stem, extension) = file_name.rsplit_once('.').ok_or_else(bad_name)?;
        let (token, date) = stem.rsplit_once('_').ok_or_else(bad_name)?;
        let kind = EntityKind::from_token(token)?;
        let load_date = parse_batch_date(date).map_err(|_| bad_name())?;

        Ok(Self {
            path: path.to_path_buf(),
            file_name: file_name.clone(),
            kind,
            load_date,
            extension: extension.to_string(),
        })
    }

    pub fn format(&self) -> DwhResult<BatchFormat> {
        BatchFormat::from_extension(&self.extension).ok_or_else(|| DwhError::UnsupportedFormat {
            file: self.file_name.clone(),
            extension: self.extension.clone(),
        })
    }
}

/// One typed row of a batch. `values` follows the entity's field order and
/// includes the primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRecord {
    pub key: EntityKey,
    pub values: Vec<FieldValue>,
}

#[derive(Debug, Clone)]
pub struct StagedBatch {
    pub kind: EntityKind,
    pub load_date: LoadDate,
    pub records: Vec<StagedRecord>,
}

impl StagedBatch {
    /// Coerce raw cells into the entity's declared types.
    pub fn from_rows(spec: &EntitySpec, load_date: LoadDate, rows: Vec<Vec<String>>) -> DwhResult<Self> {
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(rows.len());

        for (line, row) in rows.into_iter().enumerate() {
            if row.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            let extra = row.iter().skip(spec.fields.len()).any(|c| !c.trim().is_empty());
            if row.len() < spec.fields.len() || extra {
                return Err(violation(
                    spec,
                    spec.primary_key.as_str(),
                    &row.join(";"),
                    format!(
                        "row {} has {} columns, expected {}",
                        line + 1,
                        row.len(),
                        spec.fields.len()
                    ),
                ));
            }

            let values = spec
                .fields
                .iter()
                .zip(row.iter())
                .map(|(field, raw)| {
                    field
                        .ty
                        .coerce(raw)
                        .map_err(|reason| violation(spec, field.name.as_str(), raw, reason))
                })
                .collect::<DwhResult<Vec<_>>>()?;

            let key = match &values[spec.pk_index] {
                FieldValue::Null => {
                    return Err(violation(
                        spec,
                        spec.primary_key.as_str(),
                        "",
                        format!("row {} has no primary key", line + 1),
                    ))
                }
                v => v.to_string(),
            };
            if !seen.insert(key.clone()) {
                return Err(violation(
                    spec,
                    spec.primary_key.as_str(),
                    &key,
                    "duplicate primary key in batch".into(),
                ));
            }
            records.push(StagedRecord { key, values });
        }

        Ok(Self { kind: spec.kind, load_date, records })
    }

    /// Timestamp every record of this batch carries as `update_dt`.
    pub fn record_timestamp(&self) -> Timestamp {
        LoadClock::new(self.load_date).opened_at()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read and coerce a batch file.
pub fn read_batch(spec: &EntitySpec, file: &BatchFile) -> DwhResult<StagedBatch> {
    let rows = match file.format()? {
        BatchFormat::Delimited => read_delimited(&file.path)?,
        BatchFormat::Spreadsheet => read_spreadsheet(&file.path)?,
    };
    log::debug!("{}: read {} raw rows from {}", spec.kind, rows.len(), file.file_name);
    StagedBatch::from_rows(spec, file.load_date, rows)
}

fn read_delimited(path: &Path) -> DwhResult<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(String::from).collect());
    }
    Ok(rows)
}

fn read_spreadsheet(path: &Path) -> DwhResult<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook.worksheet_range_at(0).ok_or_else(|| DwhError::SchemaViolation {
        entity: path.display().to_string(),
        field: "*".into(),
        value: String::new(),
        reason: "workbook has no worksheets".into(),
    })??;
    Ok(range
        .rows()
        .skip(1)
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::DateTime(dt) => excel_serial_text(dt.as_f64()),
        other => other.to_string(),
    }
}

/// Excel serial day number (1900 date system) to `YYYY-MM-DD HH:MM:SS`.
fn excel_serial_text(serial: f64) -> String {
    let base = chrono::NaiveDate::from_ymd_opt(1899, 12, 30)
        .map(|d| d.and_time(chrono::NaiveTime::MIN));
    match base {
        Some(base) => {
            let millis = (serial * 86_400_000.0).round() as i64;
            (base + chrono::Duration::milliseconds(millis))
                .format(TIMESTAMP_FORMAT)
                .to_string()
        }
        None => serial.to_string(),
    }
}

fn violation(spec: &EntitySpec, field: &str, value: &str, reason: String) -> DwhError {
    DwhError::SchemaViolation {
        entity: spec.kind.to_string(),
        field: field.to_string(),
        value: value.to_string(),
        reason,
    }
}
