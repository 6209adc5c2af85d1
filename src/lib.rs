//! # Homeload - Property Listing Import
//!
//! Loads a flat listing dataset (one row per listing) into a relational
//! schema: a `property` table, a deduplicated `reviewers` table, `leads`
//! joined to both, and per-property child tables (`valuation`, `hoa`,
//! `rehab`, `taxes`).
//!
//! ## Modules
//!
//! - **source**: read the dataset CSV and the field configuration sheet
//! - **mapping**: resolve which dataset columns feed which table
//! - **transform**: rename, coerce Yes/No flags, deduplicate
//! - **load**: write reference tables, then dependents with foreign keys
//! - **store**: the storage backends (SQLite and in-memory)
//! - **pipeline**: the all-or-nothing import run
//!
//! ## Quick Start
//!
//! ```rust
//! use homeload::{FieldConfigEntry, LoadConfig, MemoryStore, Pipeline, RawDataset, RunOptions};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let row = json!({"property_title": "A", "address": "1 Main", "hoa_flag": "Yes"});
//! let dataset = RawDataset::from_rows(vec![serde_json::from_value(row)?]);
//! let entries = vec![
//!     FieldConfigEntry::new("Property_Title", "Property"),
//!     FieldConfigEntry::new("Address", "Property"),
//!     FieldConfigEntry::new("HOA_Flag", "Property"),
//! ];
//!
//! let config = LoadConfig::default();
//! let mut store = MemoryStore::listing_schema(&config);
//! let report = Pipeline::new(&config, &mut store).run(&dataset, &entries, RunOptions::default())?;
//!
//! assert_eq!(report.properties_inserted, 1);
//! assert_eq!(store.rows("property")[0]["hoa_flag"], json!(true));
//! # Ok(())
//! # }
//! ```

use std::path::Path;

pub mod config;
pub mod error;
pub mod load;
pub mod mapping;
pub mod pipeline;
pub mod source;
pub mod store;
pub mod transform;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{BoolPolicy, LoadConfig, TableRules};
pub use error::{DataQualityAnomaly, LoadError, MappingGap, StoreError};
pub use mapping::{FieldConfigEntry, FieldMapping};
pub use pipeline::{LoadReport, Pipeline, RunOptions, Stage};
pub use store::{MemoryStore, SqliteStore, Store};
pub use types::{KeyedRow, NaturalKey, RawDataset, Row, RowId};

/// Main entry point: import a dataset file into `store` following the field
/// configuration at `field_config`
pub fn import_files<S: Store + ?Sized>(
    data: impl AsRef<Path>,
    field_config: impl AsRef<Path>,
    sheet: Option<&str>,
    config: &LoadConfig,
    store: &mut S,
    options: RunOptions,
) -> Result<LoadReport, LoadError> {
    let entries = source::read_field_config(field_config, sheet)?;
    let dataset = source::read_dataset(data, config)?;
    Pipeline::new(config, store).run(&dataset, &entries, options)
}
