use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors. Any of these aborts the run and rolls back the open
/// transaction.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Malformed or missing field-mapping sheet, or an unusable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The store rejected a statement
    #[error("failed to insert into `{table}`: {source}\n  statement: {statement}\n  values: {values}")]
    Insert {
        table: String,
        statement: String,
        values: String,
        #[source]
        source: StoreError,
    },

    #[error("cannot connect to store: {0}")]
    Connection(#[source] StoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoadError {
    pub fn config(message: impl Into<String>) -> Self {
        LoadError::Config(message.into())
    }
}

/// Errors raised by a store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("unknown table `{0}`")]
    UnknownTable(String),

    #[error("invalid SQL identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("unique constraint on `{table}` ({columns}) violated")]
    UniqueViolation { table: String, columns: String },

    #[error("foreign key `{table}.{column}` references missing row {value}")]
    ForeignKeyViolation {
        table: String,
        column: String,
        value: Value,
    },

    #[error("no transaction is open")]
    NoTransaction,

    #[error("a transaction is already open")]
    TransactionOpen,

    #[error("statement rejected: {0}")]
    Rejected(String),
}

/// An unexpected value in a typed column. Collected, never fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQualityAnomaly {
    pub table: String,
    pub column: String,

    /// Zero-based raw dataset row index
    pub row: usize,

    pub value: Value,
    pub reason: String,
}

impl fmt::Display for DataQualityAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} row {}: {} ({})",
            self.table, self.column, self.row, self.value, self.reason
        )
    }
}

/// A target table with no resolvable columns. The table is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingGap {
    pub table: String,
}

impl MappingGap {
    pub fn new(table: impl Into<String>) -> Self {
        MappingGap {
            table: table.into(),
        }
    }
}

impl fmt::Display for MappingGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no mapped columns found for table `{}`", self.table)
    }
}
