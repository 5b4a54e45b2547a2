use thiserror::Error;

#[derive(Error, Debug)]
pub enum DwhError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Delimited file error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("Unsupported batch format '{extension}' for file {file}")]
    UnsupportedFormat { file: String, extension: String },

    #[error("Schema violation in {entity}.{field}: {reason} (value '{value}')")]
    SchemaViolation {
        entity: String,
        field: String,
        value: String,
        reason: String,
    },

    #[error("Batch name '{name}' does not follow <kind>_<DDMMYYYY>.<ext>")]
    BadBatchName { name: String },

    #[error("No tracked entity registered for '{token}'")]
    UnknownEntity { token: String },

    #[error("Invalid SQL identifier '{ident}'")]
    InvalidIdentifier { ident: String },

    #[error("Batch for {entity} dated {load_date} would rewrite history loaded up to {watermark}")]
    StaleBatch {
        entity: String,
        load_date: String,
        watermark: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Load cycle cancelled before {stage}")]
    Cancelled { stage: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type DwhResult<T> = Result<T, DwhError>;
