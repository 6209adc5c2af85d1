//! Row transformation
//!
//! Splits raw dataset rows into per-table rows following the field mapping:
//! selects the mapped columns, renames them to canonical names, coerces
//! Yes/No flags, and deduplicates the reference tables.

use crate::config::{BoolPolicy, LoadConfig, TableRules};
use crate::error::{DataQualityAnomaly, LoadError, MappingGap};
use crate::mapping::FieldMapping;
use crate::types::{KeyedRow, NaturalKey, RawDataset, Row};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Result of reading a Yes/No style cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolCell {
    Known(bool),
    /// Null cell: stored as unknown
    Missing,
    /// Anything outside Yes/Y/No/N
    Unrecognized,
}

/// `Yes`/`Y` are true, `No`/`N` false, null unknown. Matching is exact.
pub fn boolify(value: &Value) -> BoolCell {
    match value {
        Value::Null => BoolCell::Missing,
        Value::Bool(b) => BoolCell::Known(*b),
        Value::String(s) => match s.as_str() {
            "Yes" | "Y" => BoolCell::Known(true),
            "No" | "N" => BoolCell::Known(false),
            _ => BoolCell::Unrecognized,
        },
        _ => BoolCell::Unrecognized,
    }
}

/// A lead row plus the reviewer it should be joined to
#[derive(Debug, Clone, PartialEq)]
pub struct LeadRow {
    /// Keyed by the property built from the same source row
    pub row: KeyedRow,

    /// Reviewer natural key (the name), possibly null
    pub reviewer: NaturalKey,
}

/// Cleaned rows per target entity
#[derive(Debug, Clone, Default)]
pub struct TransformedTables {
    /// Unique property rows (exact match across all columns), first occurrence kept
    pub property: Vec<KeyedRow>,

    /// Property natural key of every source row, in source order
    pub property_keys: Vec<NaturalKey>,

    /// Unique reviewer rows; rows without a name are dropped
    pub reviewers: Vec<KeyedRow>,

    /// One lead per source row, in source order
    pub leads: Vec<LeadRow>,

    pub anomalies: Vec<DataQualityAnomaly>,

    pub gaps: Vec<MappingGap>,
}

pub struct RowTransformer<'a> {
    config: &'a LoadConfig,
    mapping: &'a FieldMapping,
}

impl<'a> RowTransformer<'a> {
    pub fn new(config: &'a LoadConfig, mapping: &'a FieldMapping) -> Self {
        RowTransformer { config, mapping }
    }

    pub fn transform(&self, dataset: &RawDataset) -> Result<TransformedTables, LoadError> {
        let mut out = TransformedTables::default();

        let property_rules = &self.config.property;
        let property_columns = self.mapping.mapped_columns(&property_rules.table);
        if property_columns.is_empty() {
            return Err(LoadError::config(format!(
                "no dataset columns are mapped to `{}`",
                property_rules.table
            )));
        }
        for key in &self.config.property_key {
            let mapped = property_columns
                .iter()
                .any(|c| property_rules.canonical_name(c) == *key);
            if !mapped {
                warn!(column = %key, "property key column is not mapped, treating it as null");
            }
        }

        let mut property = Vec::with_capacity(dataset.len());
        for (idx, raw) in dataset.rows.iter().enumerate() {
            let data = self.project(property_rules, property_columns, raw, idx, &mut out.anomalies);
            let key = NaturalKey::from_row(&data, &self.config.property_key);
            out.property_keys.push(key.clone());
            property.push(KeyedRow::new(idx, key, data));
        }
        out.property = dedup_exact(property);

        self.transform_reviewers(dataset, &mut out);
        self.transform_leads(dataset, &mut out);

        debug!(
            property = out.property.len(),
            reviewers = out.reviewers.len(),
            leads = out.leads.len(),
            anomalies = out.anomalies.len(),
            "transformed dataset"
        );
        Ok(out)
    }

    /// Reviewer source columns: the mapped ones, else the configured fallback
    pub fn reviewer_source_columns(&self, dataset: &RawDataset) -> Vec<String> {
        let mapped = self.mapping.mapped_columns(&self.config.reviewers.table);
        if !mapped.is_empty() {
            return mapped.to_vec();
        }
        self.config
            .reviewer_columns
            .iter()
            .filter(|c| dataset.has_column(c))
            .cloned()
            .collect()
    }

    fn transform_reviewers(&self, dataset: &RawDataset, out: &mut TransformedTables) {
        let rules = &self.config.reviewers;
        let columns = self.reviewer_source_columns(dataset);
        let has_key = columns
            .iter()
            .any(|c| rules.canonical_name(c) == self.config.reviewer_key);
        if !has_key {
            out.gaps.push(MappingGap::new(rules.table.as_str()));
            return;
        }

        let key_columns = std::slice::from_ref(&self.config.reviewer_key);
        let mut reviewers = Vec::new();
        for (idx, raw) in dataset.rows.iter().enumerate() {
            let data = self.project(rules, &columns, raw, idx, &mut out.anomalies);
            let key = NaturalKey::from_row(&data, key_columns);
            if key.is_null() {
                out.anomalies.push(DataQualityAnomaly {
                    table: rules.table.clone(),
                    column: self.config.reviewer_key.clone(),
                    row: idx,
                    value: Value::Null,
                    reason: "reviewer without a name is not loaded".to_string(),
                });
                continue;
            }
            reviewers.push(KeyedRow::new(idx, key, data));
        }
        out.reviewers = dedup_exact(reviewers);
    }

    fn transform_leads(&self, dataset: &RawDataset, out: &mut TransformedTables) {
        let rules = &self.config.leads;
        if !self.mapping.has_columns(&rules.table) {
            // reported by the dependent loader when it skips the table
            return;
        }
        // the reviewer name only feeds the join; a lead mapped from it
        // alone still carries both foreign keys
        let columns: Vec<String> = self
            .mapping
            .mapped_columns(&rules.table)
            .iter()
            .filter(|c| **c != self.config.lead_reviewer_column)
            .cloned()
            .collect();

        for (idx, raw) in dataset.rows.iter().enumerate() {
            let data = self.project(rules, &columns, raw, idx, &mut out.anomalies);
            let reviewer = NaturalKey::new(vec![raw
                .get(&self.config.lead_reviewer_column)
                .cloned()
                .unwrap_or(Value::Null)]);
            out.leads.push(LeadRow {
                row: KeyedRow::new(idx, out.property_keys[idx].clone(), data),
                reviewer,
            });
        }
    }

    /// Select `columns` from a raw row under their canonical names and coerce
    /// boolean columns. Missing cells become null.
    pub fn project(
        &self,
        rules: &TableRules,
        columns: &[String],
        raw: &Row,
        source_index: usize,
        anomalies: &mut Vec<DataQualityAnomaly>,
    ) -> Row {
        let mut data = Row::new();
        for column in columns {
            let name = rules.canonical_name(column);
            let mut value = raw.get(column).cloned().unwrap_or(Value::Null);

            if rules.is_boolean(&name) {
                value = match boolify(&value) {
                    BoolCell::Known(b) => Value::Bool(b),
                    BoolCell::Missing => Value::Null,
                    BoolCell::Unrecognized => {
                        warn!(
                            table = %rules.table,
                            column = %name,
                            row = source_index,
                            value = %value,
                            "unrecognized boolean value"
                        );
                        anomalies.push(DataQualityAnomaly {
                            table: rules.table.clone(),
                            column: name.clone(),
                            row: source_index,
                            value: value.clone(),
                            reason: "expected Yes, Y, No or N".to_string(),
                        });
                        match self.config.bool_policy {
                            BoolPolicy::Unknown => Value::Null,
                            BoolPolicy::PassThrough => value,
                        }
                    }
                };
            }

            data.insert(name, value);
        }
        data
    }
}

/// Drop rows identical across every column, keeping the first occurrence
pub fn dedup_exact(rows: Vec<KeyedRow>) -> Vec<KeyedRow> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(Value::Object(row.data.clone()).to_string()))
        .collect()
}
