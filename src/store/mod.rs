//! The relational store collaborator
//!
//! Loaders build statements here and hand them to a [`Store`]. Statements
//! render to parameterized SQL (`?` placeholders) so the text can be logged
//! and attached to insert errors.

pub mod memory;
pub mod sqlite;

use crate::error::StoreError;
use crate::types::{Row, RowId};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub use memory::{MemoryStore, TableDef};
pub use sqlite::SqliteStore;

static IDENTIFIER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Table and column names come from CSV headers, so they are checked
/// before being spliced into SQL.
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    if IDENTIFIER_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Primitives the pipeline needs from a relational store
pub trait Store {
    fn begin(&mut self) -> Result<(), StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    fn rollback(&mut self) -> Result<(), StoreError>;

    fn in_transaction(&self) -> bool;

    /// Insert a row and return the identifier the store assigned
    fn insert(&mut self, stmt: &InsertStatement) -> Result<RowId, StoreError>;

    /// Insert, or update the existing row with the same conflict key
    fn upsert(&mut self, stmt: &UpsertStatement) -> Result<RowId, StoreError>;

    /// Point lookup by natural key
    fn find_id(&mut self, lookup: &KeyLookup) -> Result<Option<RowId>, StoreError>;

    /// Every row of a table, identifier column included
    fn read_table(&mut self, table: &str) -> Result<Vec<Row>, StoreError>;

    /// Empty the tables in order with foreign key checks disabled for the
    /// duration, restored before returning
    fn truncate(&mut self, tables: &[String]) -> Result<(), StoreError>;
}

/// `INSERT INTO table (columns) VALUES (?, ...)`
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    table: String,
    columns: Vec<String>,
    values: Vec<Value>,
}

impl InsertStatement {
    pub fn new(table: &str) -> Result<Self, StoreError> {
        validate_identifier(table)?;
        Ok(InsertStatement {
            table: table.to_string(),
            columns: Vec::new(),
            values: Vec::new(),
        })
    }

    pub fn from_row(table: &str, row: &Row) -> Result<Self, StoreError> {
        let mut stmt = Self::new(table)?;
        for (column, value) in row {
            stmt.push(column, value.clone())?;
        }
        Ok(stmt)
    }

    /// Set a column, replacing any earlier value for it
    pub fn push(&mut self, column: &str, value: Value) -> Result<(), StoreError> {
        validate_identifier(column)?;
        match self.columns.iter().position(|c| c == column) {
            Some(idx) => self.values[idx] = value,
            None => {
                self.columns.push(column.to_string());
                self.values.push(value);
            }
        }
        Ok(())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    pub fn sql(&self) -> String {
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            self.columns.join(", "),
            placeholders
        )
    }

    /// Bound values as a JSON array, for error reports
    pub fn render_values(&self) -> String {
        Value::Array(self.values.clone()).to_string()
    }
}

/// Insert that updates `update_columns` when `conflict_columns` already match a row
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertStatement {
    insert: InsertStatement,
    conflict_columns: Vec<String>,
    update_columns: Vec<String>,
    id_column: String,
}

impl UpsertStatement {
    /// Every inserted column outside the conflict key is updated on conflict
    pub fn new(
        insert: InsertStatement,
        conflict_columns: Vec<String>,
        id_column: &str,
    ) -> Result<Self, StoreError> {
        validate_identifier(id_column)?;
        for column in &conflict_columns {
            if insert.value(column).is_none() {
                return Err(StoreError::Rejected(format!(
                    "conflict column `{}` is not part of the insert into `{}`",
                    column, insert.table
                )));
            }
        }
        let update_columns = insert
            .columns
            .iter()
            .filter(|c| !conflict_columns.contains(c))
            .cloned()
            .collect();
        Ok(UpsertStatement {
            insert,
            conflict_columns,
            update_columns,
            id_column: id_column.to_string(),
        })
    }

    pub fn insert(&self) -> &InsertStatement {
        &self.insert
    }

    pub fn conflict_columns(&self) -> &[String] {
        &self.conflict_columns
    }

    pub fn update_columns(&self) -> &[String] {
        &self.update_columns
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Conflict key values, in conflict column order
    pub fn conflict_values(&self) -> Vec<Value> {
        self.conflict_columns
            .iter()
            .map(|c| self.insert.value(c).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn sql(&self) -> String {
        // With nothing to update, touch the key itself so RETURNING still yields the row
        let assignments: Vec<String> = if self.update_columns.is_empty() {
            self.conflict_columns
                .iter()
                .map(|c| format!("{c} = excluded.{c}"))
                .collect()
        } else {
            self.update_columns
                .iter()
                .map(|c| format!("{c} = excluded.{c}"))
                .collect()
        };
        format!(
            "{} ON CONFLICT ({}) DO UPDATE SET {} RETURNING {}",
            self.insert.sql(),
            self.conflict_columns.join(", "),
            assignments.join(", "),
            self.id_column
        )
    }
}

/// `SELECT id FROM table WHERE key IS ? AND ...`
#[derive(Debug, Clone, PartialEq)]
pub struct KeyLookup {
    table: String,
    id_column: String,
    columns: Vec<String>,
    values: Vec<Value>,
}

impl KeyLookup {
    pub fn new(
        table: &str,
        id_column: &str,
        columns: &[String],
        values: &[Value],
    ) -> Result<Self, StoreError> {
        validate_identifier(table)?;
        validate_identifier(id_column)?;
        for column in columns {
            validate_identifier(column)?;
        }
        if columns.is_empty() || columns.len() != values.len() {
            return Err(StoreError::Rejected(format!(
                "lookup on `{}` needs one value per key column",
                table
            )));
        }
        Ok(KeyLookup {
            table: table.to_string(),
            id_column: id_column.to_string(),
            columns: columns.to_vec(),
            values: values.to_vec(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn sql(&self) -> String {
        let predicates: Vec<String> = self.columns.iter().map(|c| format!("{c} IS ?")).collect();
        format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            self.id_column,
            self.table,
            predicates.join(" AND ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_sql() {
        let row: Row = serde_json::from_value(json!({"title": "A", "hoa_flag": true})).unwrap();
        let mut stmt = InsertStatement::from_row("property", &row).unwrap();
        assert_eq!(stmt.sql(), "INSERT INTO property (title, hoa_flag) VALUES (?, ?)");

        stmt.push("title", json!("B")).unwrap();
        assert_eq!(stmt.values(), &[json!("B"), json!(true)]);
        assert_eq!(stmt.render_values(), r#"["B",true]"#);
    }

    #[test]
    fn test_identifiers_are_validated() {
        assert!(InsertStatement::new("property; DROP TABLE x").is_err());
        let mut stmt = InsertStatement::new("leads").unwrap();
        let err = stmt.push("bad-name", json!(1)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentifier(_)));
    }

    #[test]
    fn test_upsert_sql() {
        let mut insert = InsertStatement::new("reviewers").unwrap();
        insert.push("name", json!("Ann")).unwrap();
        insert.push("school_average", json!(7.5)).unwrap();
        let upsert = UpsertStatement::new(insert, vec!["name".into()], "id").unwrap();

        assert_eq!(upsert.update_columns(), &["school_average".to_string()]);
        assert_eq!(upsert.conflict_values(), vec![json!("Ann")]);
        assert_eq!(
            upsert.sql(),
            "INSERT INTO reviewers (name, school_average) VALUES (?, ?) \
             ON CONFLICT (name) DO UPDATE SET school_average = excluded.school_average RETURNING id"
        );
    }

    #[test]
    fn test_upsert_requires_conflict_column() {
        let insert = InsertStatement::new("reviewers").unwrap();
        assert!(UpsertStatement::new(insert, vec!["name".into()], "id").is_err());
    }

    #[test]
    fn test_lookup_sql() {
        let lookup = KeyLookup::new(
            "property",
            "id",
            &["title".into(), "address".into()],
            &[json!("A"), Value::Null],
        )
        .unwrap();
        assert_eq!(
            lookup.sql(),
            "SELECT id FROM property WHERE title IS ? AND address IS ? LIMIT 1"
        );
    }
}
