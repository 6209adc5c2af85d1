use super::{build_insert, execute_insert, ResolvedIds};
use crate::config::{LoadConfig, TableRules};
use crate::error::{DataQualityAnomaly, LoadError, MappingGap};
use crate::mapping::FieldMapping;
use crate::store::Store;
use crate::transform::{LeadRow, RowTransformer};
use crate::types::{NaturalKey, RawDataset, Row, RowId};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

/// What happened to one dependent table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependentOutcome {
    Loaded { table: String, rows: usize },
    /// No columns mapped; nothing written
    Skipped(MappingGap),
}

/// Loads leads and the property child tables
pub struct DependentLoader<'a> {
    config: &'a LoadConfig,
    mapping: &'a FieldMapping,
}

impl<'a> DependentLoader<'a> {
    pub fn new(config: &'a LoadConfig, mapping: &'a FieldMapping) -> Self {
        DependentLoader { config, mapping }
    }

    /// Load every configured child table, in order
    pub fn load_children<S: Store + ?Sized>(
        &self,
        store: &mut S,
        dataset: &RawDataset,
        property_keys: &[NaturalKey],
        properties: &ResolvedIds,
        anomalies: &mut Vec<DataQualityAnomaly>,
    ) -> Result<Vec<DependentOutcome>, LoadError> {
        self.config
            .child_tables
            .iter()
            .map(|rules| self.load_child(store, rules, dataset, property_keys, properties, anomalies))
            .collect()
    }

    /// One row per source row, keyed to the property built from that same row
    pub fn load_child<S: Store + ?Sized>(
        &self,
        store: &mut S,
        rules: &TableRules,
        dataset: &RawDataset,
        property_keys: &[NaturalKey],
        properties: &ResolvedIds,
        anomalies: &mut Vec<DataQualityAnomaly>,
    ) -> Result<DependentOutcome, LoadError> {
        let columns = self.mapping.mapped_columns(&rules.table);
        if columns.is_empty() {
            return Ok(self.skip(&rules.table));
        }

        let transformer = RowTransformer::new(self.config, self.mapping);
        for (idx, raw) in dataset.rows.iter().enumerate() {
            let mut data = transformer.project(rules, columns, raw, idx, anomalies);
            self.clear_null_markers(&mut data);

            let parent = property_keys.get(idx).and_then(|key| properties.get(key));
            data.insert(self.config.parent_fk.clone(), id_or_null(parent));

            let insert = build_insert(&rules.table, &data)?;
            execute_insert(store, &insert)?;
        }

        info!(table = %rules.table, rows = dataset.len(), "loaded dependent table");
        Ok(DependentOutcome::Loaded {
            table: rules.table.clone(),
            rows: dataset.len(),
        })
    }

    /// Insert leads with both foreign keys. The property is found by the lead's
    /// natural key, the reviewer by name; an unknown reviewer leaves
    /// `reviewer_id` null.
    pub fn load_leads<S: Store + ?Sized>(
        &self,
        store: &mut S,
        leads: &[LeadRow],
        properties: &ResolvedIds,
        reviewers: &HashMap<NaturalKey, RowId>,
    ) -> Result<DependentOutcome, LoadError> {
        let table = &self.config.leads.table;
        if !self.mapping.has_columns(table) {
            return Ok(self.skip(table));
        }

        let mut unmatched = 0;
        for lead in leads {
            let mut data = lead.row.data.clone();
            self.clear_null_markers(&mut data);

            let reviewer = if lead.reviewer.is_null() {
                None
            } else {
                reviewers.get(&lead.reviewer).copied()
            };
            if reviewer.is_none() {
                unmatched += 1;
            }

            data.insert(self.config.parent_fk.clone(), id_or_null(properties.get(&lead.row.key)));
            data.insert(self.config.lead_reviewer_fk.clone(), id_or_null(reviewer));

            let insert = build_insert(table, &data)?;
            execute_insert(store, &insert)?;
        }

        if unmatched > 0 {
            warn!(table = %table, unmatched, "leads inserted without a reviewer");
        }
        info!(table = %table, rows = leads.len(), "loaded leads");
        Ok(DependentOutcome::Loaded {
            table: table.clone(),
            rows: leads.len(),
        })
    }

    /// Reviewer name to identifier, read back from the reviewers table.
    /// Identifiers resolved during this run take precedence.
    pub fn reviewer_index<S: Store + ?Sized>(
        &self,
        store: &mut S,
        loaded: &ResolvedIds,
    ) -> Result<HashMap<NaturalKey, RowId>, LoadError> {
        let mut index = HashMap::new();
        for row in store.read_table(&self.config.reviewers.table)? {
            let name = row.get(&self.config.reviewer_key).cloned().unwrap_or(Value::Null);
            let id = row.get(&self.config.id_column).and_then(Value::as_i64);
            if let Some(id) = id.filter(|_| !name.is_null()) {
                index.insert(NaturalKey::new(vec![name]), RowId::new(id));
            }
        }
        index.extend(loaded.by_key().iter().map(|(k, v)| (k.clone(), *v)));
        Ok(index)
    }

    fn skip(&self, table: &str) -> DependentOutcome {
        let gap = MappingGap::new(table);
        warn!(table = %table, "skipping table: {}", gap);
        DependentOutcome::Skipped(gap)
    }

    /// Null-like text becomes an explicit null, never zero or an empty string
    fn clear_null_markers(&self, row: &mut Row) {
        for value in row.values_mut() {
            if let Value::String(s) = value {
                if self.config.is_null_marker(s) {
                    *value = Value::Null;
                }
            }
        }
    }
}

fn id_or_null(id: Option<RowId>) -> Value {
    id.map_or(Value::Null, Value::from)
}
