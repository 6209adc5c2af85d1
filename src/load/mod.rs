//! Writing transformed rows to the store
//!
//! Reference tables (property, reviewers) are loaded first and hand back the
//! identifiers their rows resolved to; dependent tables then attach those
//! identifiers as foreign keys.

pub mod dependent;
pub mod reference;

pub use dependent::{DependentLoader, DependentOutcome};
pub use reference::{load_reference, ReferenceTable, ResolvedIds, WritePolicy};

use crate::error::{LoadError, StoreError};
use crate::store::{InsertStatement, Store};
use crate::types::{Row, RowId};
use tracing::error;

/// Build an insert for a row. A column name that is not a valid SQL
/// identifier is a configuration problem, not a store failure.
pub(crate) fn build_insert(table: &str, row: &Row) -> Result<InsertStatement, LoadError> {
    InsertStatement::from_row(table, row).map_err(|e| match e {
        StoreError::InvalidIdentifier(name) => LoadError::config(format!(
            "`{}` cannot be used as a column of `{}`",
            name, table
        )),
        other => LoadError::Store(other),
    })
}

/// Wrap a rejected statement with the table, SQL text and bound values
pub(crate) fn insert_failed(stmt: &InsertStatement, sql: String, source: StoreError) -> LoadError {
    let values = stmt.render_values();
    error!(table = %stmt.table(), statement = %sql, %values, error = %source, "insert failed");
    LoadError::Insert {
        table: stmt.table().to_string(),
        statement: sql,
        values,
        source,
    }
}

pub(crate) fn execute_insert<S: Store + ?Sized>(
    store: &mut S,
    stmt: &InsertStatement,
) -> Result<RowId, LoadError> {
    store
        .insert(stmt)
        .map_err(|source| insert_failed(stmt, stmt.sql(), source))
}
