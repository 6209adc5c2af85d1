use super::{build_insert, execute_insert, insert_failed};
use crate::config::LoadConfig;
use crate::error::{LoadError, StoreError};
use crate::store::{KeyLookup, Store, UpsertStatement};
use crate::types::{KeyedRow, NaturalKey, RowId};
use std::collections::HashMap;
use tracing::{debug, info};

/// How rows sharing a natural key are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Reuse the stored row for a known key, insert otherwise. Never updates.
    LookupThenInsert,
    /// Insert, or update the stored row for a known key
    Upsert,
}

/// A reference table and how its rows are deduplicated
#[derive(Debug, Clone)]
pub struct ReferenceTable<'a> {
    pub table: &'a str,

    /// Natural key columns; empty means every row is inserted
    pub key_columns: &'a [String],

    pub id_column: &'a str,
    pub policy: WritePolicy,
}

impl<'a> ReferenceTable<'a> {
    pub fn property(config: &'a LoadConfig) -> Self {
        ReferenceTable {
            table: &config.property.table,
            key_columns: &config.property_key,
            id_column: &config.id_column,
            policy: WritePolicy::LookupThenInsert,
        }
    }

    pub fn reviewers(config: &'a LoadConfig) -> Self {
        ReferenceTable {
            table: &config.reviewers.table,
            key_columns: std::slice::from_ref(&config.reviewer_key),
            id_column: &config.id_column,
            policy: WritePolicy::Upsert,
        }
    }
}

/// Identifiers resolved by a reference load.
///
/// `ids()[i]` belongs to input row `i`, so the list always has the input's
/// length and order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedIds {
    ids: Vec<RowId>,
    by_key: HashMap<NaturalKey, RowId>,
    written: usize,
    reused: usize,
}

impl ResolvedIds {
    pub fn ids(&self) -> &[RowId] {
        &self.ids
    }

    pub fn get(&self, key: &NaturalKey) -> Option<RowId> {
        self.by_key.get(key).copied()
    }

    pub fn by_key(&self) -> &HashMap<NaturalKey, RowId> {
        &self.by_key
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Rows inserted or upserted
    pub fn written(&self) -> usize {
        self.written
    }

    /// Rows resolved to an already stored identifier without writing
    pub fn reused(&self) -> usize {
        self.reused
    }

    fn record(&mut self, key: &NaturalKey, id: RowId, has_key: bool) {
        self.ids.push(id);
        if has_key {
            self.by_key.insert(key.clone(), id);
        }
    }
}

/// Write reference rows and resolve each to an identifier.
///
/// Any rejected statement aborts the load with the table, the statement
/// and the row's values.
pub fn load_reference<S: Store + ?Sized>(
    store: &mut S,
    target: &ReferenceTable<'_>,
    rows: &[KeyedRow],
) -> Result<ResolvedIds, LoadError> {
    let has_key = !target.key_columns.is_empty();
    if target.policy == WritePolicy::Upsert && !has_key {
        return Err(LoadError::config(format!(
            "upserting into `{}` needs a natural key",
            target.table
        )));
    }

    let mut resolved = ResolvedIds::default();
    for row in rows {
        let insert = build_insert(target.table, &row.data)?;

        let id = match target.policy {
            WritePolicy::LookupThenInsert => {
                let existing = if has_key {
                    match resolved.get(&row.key) {
                        Some(id) => Some(id),
                        None => {
                            let lookup = KeyLookup::new(
                                target.table,
                                target.id_column,
                                target.key_columns,
                                row.key.values(),
                            )
                            .map_err(|e| lookup_error(target.table, e))?;
                            store.find_id(&lookup)?
                        }
                    }
                } else {
                    None
                };

                match existing {
                    Some(id) => {
                        debug!(table = target.table, key = %row.key, %id, "reusing existing row");
                        resolved.reused += 1;
                        id
                    }
                    None => {
                        resolved.written += 1;
                        execute_insert(store, &insert)?
                    }
                }
            }
            WritePolicy::Upsert => {
                let upsert =
                    UpsertStatement::new(insert.clone(), target.key_columns.to_vec(), target.id_column)
                        .map_err(|e| lookup_error(target.table, e))?;
                resolved.written += 1;
                store
                    .upsert(&upsert)
                    .map_err(|source| insert_failed(&insert, upsert.sql(), source))?
            }
        };

        resolved.record(&row.key, id, has_key);
    }

    info!(
        table = target.table,
        rows = rows.len(),
        written = resolved.written,
        reused = resolved.reused,
        "loaded reference table"
    );
    Ok(resolved)
}

fn lookup_error(table: &str, error: StoreError) -> LoadError {
    LoadError::config(format!("cannot key `{}`: {}", table, error))
}
