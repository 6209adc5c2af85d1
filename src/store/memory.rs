use super::{InsertStatement, KeyLookup, Store, UpsertStatement};
use crate::config::LoadConfig;
use crate::error::StoreError;
use crate::types::{Row, RowId};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Shape of one in-memory table
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub id_column: String,

    /// Column sets that must be unique. Rows with a null in the set never conflict.
    pub unique: Vec<Vec<String>>,

    /// (column, referenced table)
    pub foreign_keys: Vec<(String, String)>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, id_column: impl Into<String>) -> Self {
        TableDef {
            name: name.into(),
            id_column: id_column.into(),
            unique: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique.push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn references(mut self, column: &str, table: &str) -> Self {
        self.foreign_keys.push((column.to_string(), table.to_string()));
        self
    }
}

#[derive(Debug, Clone, Default)]
struct TableData {
    rows: Vec<Row>,
    last_id: i64,
}

/// A store held in memory, enforcing unique keys and foreign keys the way a
/// relational database would. Transactions snapshot the whole store.
#[derive(Debug)]
pub struct MemoryStore {
    defs: IndexMap<String, TableDef>,
    data: HashMap<String, TableData>,
    snapshot: Option<HashMap<String, TableData>>,
    rejected: HashSet<String>,
    executed: Vec<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore {
            defs: IndexMap::new(),
            data: HashMap::new(),
            snapshot: None,
            rejected: HashSet::new(),
            executed: Vec::new(),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, def: TableDef) -> Self {
        self.data.insert(def.name.clone(), TableData::default());
        self.defs.insert(def.name.clone(), def);
        self
    }

    /// Tables for the listing schema described by `config`
    pub fn listing_schema(config: &LoadConfig) -> Self {
        let id = config.id_column.as_str();
        let property = config.property.table.as_str();
        let reviewers = config.reviewers.table.as_str();

        let mut store = MemoryStore::new()
            .with_table(TableDef::new(property, id))
            .with_table(TableDef::new(reviewers, id).unique(&[config.reviewer_key.as_str()]))
            .with_table(
                TableDef::new(config.leads.table.as_str(), id)
                    .references(&config.parent_fk, property)
                    .references(&config.lead_reviewer_fk, reviewers),
            );
        for child in &config.child_tables {
            store = store.with_table(
                TableDef::new(child.table.as_str(), id).references(&config.parent_fk, property),
            );
        }
        store
    }

    /// Make every insert or upsert into `table` fail
    pub fn reject_inserts_into(mut self, table: &str) -> Self {
        self.rejected.insert(table.to_string());
        self
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.data.get(table).map_or(0, |t| t.rows.len())
    }

    pub fn rows(&self, table: &str) -> &[Row] {
        self.data
            .get(table)
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    /// SQL of every statement executed so far, including rolled-back ones
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    fn def(&self, table: &str) -> Result<&TableDef, StoreError> {
        self.defs
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    fn check_constraints(&self, stmt: &InsertStatement) -> Result<(), StoreError> {
        let def = self.def(stmt.table())?;
        let existing = &self.data[stmt.table()].rows;

        for unique in &def.unique {
            let values: Vec<&Value> = unique
                .iter()
                .map(|c| stmt.value(c).unwrap_or(&Value::Null))
                .collect();
            if values.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = existing.iter().any(|row| {
                unique
                    .iter()
                    .zip(&values)
                    .all(|(c, v)| row.get(c) == Some(*v))
            });
            if clash {
                return Err(StoreError::UniqueViolation {
                    table: def.name.clone(),
                    columns: unique.join(", "),
                });
            }
        }

        for (column, parent) in &def.foreign_keys {
            let Some(value) = stmt.value(column).filter(|v| !v.is_null()) else {
                continue;
            };
            let parent_def = self.def(parent)?;
            let found = self.data[parent.as_str()]
                .rows
                .iter()
                .any(|row| row.get(&parent_def.id_column) == Some(value));
            if !found {
                return Err(StoreError::ForeignKeyViolation {
                    table: def.name.clone(),
                    column: column.clone(),
                    value: value.clone(),
                });
            }
        }

        Ok(())
    }

    fn insert_row(&mut self, stmt: &InsertStatement) -> Result<RowId, StoreError> {
        if self.rejected.contains(stmt.table()) {
            return Err(StoreError::Rejected(format!(
                "inserts into `{}` are disabled",
                stmt.table()
            )));
        }
        self.check_constraints(stmt)?;

        let id_column = self.def(stmt.table())?.id_column.clone();
        let table = self
            .data
            .get_mut(stmt.table())
            .ok_or_else(|| StoreError::UnknownTable(stmt.table().to_string()))?;
        table.last_id += 1;
        let id = RowId::new(table.last_id);

        let mut row = Row::new();
        row.insert(id_column, id.into());
        for (column, value) in stmt.columns().iter().zip(stmt.values()) {
            row.insert(column.clone(), value.clone());
        }
        table.rows.push(row);
        Ok(id)
    }
}

impl Store for MemoryStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(StoreError::TransactionOpen);
        }
        self.snapshot = Some(self.data.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.snapshot.take().ok_or(StoreError::NoTransaction)?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.data = self.snapshot.take().ok_or(StoreError::NoTransaction)?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    fn insert(&mut self, stmt: &InsertStatement) -> Result<RowId, StoreError> {
        self.executed.push(stmt.sql());
        self.insert_row(stmt)
    }

    fn upsert(&mut self, stmt: &UpsertStatement) -> Result<RowId, StoreError> {
        self.executed.push(stmt.sql());
        let insert = stmt.insert();
        if self.rejected.contains(insert.table()) {
            return Err(StoreError::Rejected(format!(
                "inserts into `{}` are disabled",
                insert.table()
            )));
        }

        let key = stmt.conflict_values();
        if key.iter().any(Value::is_null) {
            return self.insert_row(insert);
        }

        let id_column = self.def(insert.table())?.id_column.clone();
        let table = self
            .data
            .get_mut(insert.table())
            .ok_or_else(|| StoreError::UnknownTable(insert.table().to_string()))?;
        let existing = table.rows.iter_mut().find(|row| {
            stmt.conflict_columns()
                .iter()
                .zip(&key)
                .all(|(c, v)| row.get(c) == Some(v))
        });

        match existing {
            Some(row) => {
                for column in stmt.update_columns() {
                    let value = insert.value(column).cloned().unwrap_or(Value::Null);
                    row.insert(column.clone(), value);
                }
                row.get(&id_column)
                    .and_then(Value::as_i64)
                    .map(RowId::new)
                    .ok_or_else(|| StoreError::Rejected(format!("row without `{}`", id_column)))
            }
            None => self.insert_row(insert),
        }
    }

    fn find_id(&mut self, lookup: &KeyLookup) -> Result<Option<RowId>, StoreError> {
        self.executed.push(lookup.sql());
        self.def(lookup.table())?;
        let id = self.data[lookup.table()]
            .rows
            .iter()
            .find(|row| {
                lookup
                    .columns()
                    .iter()
                    .zip(lookup.values())
                    .all(|(c, v)| row.get(c).unwrap_or(&Value::Null) == v)
            })
            .and_then(|row| row.get(lookup.id_column()))
            .and_then(Value::as_i64)
            .map(RowId::new);
        Ok(id)
    }

    fn read_table(&mut self, table: &str) -> Result<Vec<Row>, StoreError> {
        self.def(table)?;
        Ok(self.data[table].rows.clone())
    }

    /// Deletes are never checked against references; only inserts are
    fn truncate(&mut self, tables: &[String]) -> Result<(), StoreError> {
        for table in tables {
            self.def(table)?;
        }
        for table in tables {
            self.executed.push(format!("TRUNCATE TABLE {}", table));
            self.data.insert(table.clone(), TableData::default());
        }
        Ok(())
    }
}
