//! One import run, start to finish
//!
//! Stages run strictly in order:
//! `Loaded -> MappingResolved -> Transformed -> PropertyLoaded ->
//! ReviewerLoaded -> DependentsLoaded -> Committed`. Any failure moves the run
//! to `Aborted` and rolls back the open transaction.

use crate::config::LoadConfig;
use crate::error::{DataQualityAnomaly, LoadError, MappingGap};
use crate::load::{load_reference, DependentLoader, DependentOutcome, ReferenceTable};
use crate::mapping::{FieldConfigEntry, FieldMapping};
use crate::store::Store;
use crate::transform::RowTransformer;
use crate::types::RawDataset;
use indexmap::IndexMap;
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Loaded,
    MappingResolved,
    Transformed,
    PropertyLoaded,
    ReviewerLoaded,
    DependentsLoaded,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Empty the target tables before loading. Destructive: the truncation
    /// is committed on its own and survives a later failure.
    pub truncate: bool,
}

/// Summary of a committed run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub source_rows: usize,
    pub truncated: bool,

    /// Unique property rows handed to the loader
    pub property_rows: usize,
    pub properties_inserted: usize,
    pub properties_reused: usize,

    pub reviewers_upserted: usize,

    /// Rows inserted per dependent table, leads included
    pub dependents: IndexMap<String, usize>,

    pub anomalies: Vec<DataQualityAnomaly>,
    pub gaps: Vec<MappingGap>,
}

/// Rolls back on drop unless committed
struct Transaction<'s, S: Store + ?Sized> {
    store: &'s mut S,
    done: bool,
}

impl<'s, S: Store + ?Sized> Transaction<'s, S> {
    fn begin(store: &'s mut S) -> Result<Self, LoadError> {
        store.begin()?;
        Ok(Transaction { store, done: false })
    }

    fn commit(mut self) -> Result<(), LoadError> {
        self.done = true;
        self.store.commit()?;
        Ok(())
    }
}

impl<S: Store + ?Sized> Deref for Transaction<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.store
    }
}

impl<S: Store + ?Sized> DerefMut for Transaction<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.store
    }
}

impl<S: Store + ?Sized> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if !self.done && self.store.in_transaction() {
            match self.store.rollback() {
                Ok(()) => warn!("load aborted, transaction rolled back"),
                Err(e) => warn!(error = %e, "rollback failed"),
            }
        }
    }
}

pub struct Pipeline<'a, S: Store + ?Sized> {
    config: &'a LoadConfig,
    store: &'a mut S,
    stage: Stage,
}

impl<'a, S: Store + ?Sized> Pipeline<'a, S> {
    pub fn new(config: &'a LoadConfig, store: &'a mut S) -> Self {
        Pipeline {
            config,
            store,
            stage: Stage::Loaded,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Load `dataset` following the field configuration `entries`
    pub fn run(
        &mut self,
        dataset: &RawDataset,
        entries: &[FieldConfigEntry],
        options: RunOptions,
    ) -> Result<LoadReport, LoadError> {
        if self.stage != Stage::Loaded {
            return Err(LoadError::config(format!(
                "pipeline already ran (stage {:?})",
                self.stage
            )));
        }

        match self.execute(dataset, entries, options) {
            Ok(report) => {
                advance(&mut self.stage, Stage::Committed);
                for gap in &report.gaps {
                    warn!("{}", gap);
                }
                for anomaly in &report.anomalies {
                    warn!("data quality: {}", anomaly);
                }
                info!(
                    properties = report.properties_inserted,
                    reviewers = report.reviewers_upserted,
                    anomalies = report.anomalies.len(),
                    gaps = report.gaps.len(),
                    "import committed"
                );
                Ok(report)
            }
            Err(e) => {
                self.stage = Stage::Aborted;
                warn!(error = %e, "import aborted");
                Err(e)
            }
        }
    }

    fn execute(
        &mut self,
        dataset: &RawDataset,
        entries: &[FieldConfigEntry],
        options: RunOptions,
    ) -> Result<LoadReport, LoadError> {
        let config = self.config;
        let mut report = LoadReport {
            source_rows: dataset.len(),
            ..Default::default()
        };

        let mapping = FieldMapping::resolve(entries, &dataset.columns);
        if config.strict_mapping {
            let expected = std::iter::once(config.leads.table.as_str())
                .chain(config.child_tables.iter().map(|t| t.table.as_str()));
            let gaps = mapping.gaps(expected);
            if !gaps.is_empty() {
                let names: Vec<&str> = gaps.iter().map(|g| g.table.as_str()).collect();
                return Err(LoadError::config(format!(
                    "tables without mapped columns: {}",
                    names.join(", ")
                )));
            }
        }
        advance(&mut self.stage, Stage::MappingResolved);

        let tables = RowTransformer::new(config, &mapping).transform(dataset)?;
        if config.strict_mapping && !tables.gaps.is_empty() {
            return Err(LoadError::config(format!("{}", tables.gaps[0])));
        }
        report.anomalies = tables.anomalies;
        report.gaps = tables.gaps;
        report.property_rows = tables.property.len();
        advance(&mut self.stage, Stage::Transformed);

        if options.truncate {
            self.store.truncate(&config.truncate_tables)?;
            report.truncated = true;
            info!(tables = ?config.truncate_tables, "truncated target tables");
        }

        let stage = &mut self.stage;
        let mut tx = Transaction::begin(&mut *self.store)?;

        let properties =
            load_reference(&mut *tx, &ReferenceTable::property(config), &tables.property)?;
        report.properties_inserted = properties.written();
        report.properties_reused = properties.reused();
        advance(stage, Stage::PropertyLoaded);

        let reviewers =
            load_reference(&mut *tx, &ReferenceTable::reviewers(config), &tables.reviewers)?;
        report.reviewers_upserted = reviewers.written();
        advance(stage, Stage::ReviewerLoaded);

        let loader = DependentLoader::new(config, &mapping);
        let index = loader.reviewer_index(&mut *tx, &reviewers)?;
        let mut outcomes = vec![loader.load_leads(&mut *tx, &tables.leads, &properties, &index)?];
        outcomes.extend(loader.load_children(
            &mut *tx,
            dataset,
            &tables.property_keys,
            &properties,
            &mut report.anomalies,
        )?);
        for outcome in outcomes {
            match outcome {
                DependentOutcome::Loaded { table, rows } => {
                    report.dependents.insert(table, rows);
                }
                DependentOutcome::Skipped(gap) => report.gaps.push(gap),
            }
        }
        advance(stage, Stage::DependentsLoaded);

        tx.commit()?;
        Ok(report)
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    info!(from = ?*stage, to = ?next, "stage");
    *stage = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn dataset(rows: Vec<Value>) -> RawDataset {
        RawDataset::from_rows(
            rows.into_iter()
                .map(|r| serde_json::from_value(r).unwrap())
                .collect(),
        )
    }

    fn entries() -> Vec<FieldConfigEntry> {
        [
            ("Property_Title", "Property"),
            ("Address", "Property"),
            ("HOA_Flag", "Property"),
            ("Source", "Leads"),
            ("Occupancy", "Leads"),
            ("HOA", "HOA"),
        ]
        .iter()
        .map(|(c, t)| FieldConfigEntry::new(*c, *t))
        .collect()
    }

    fn rows() -> RawDataset {
        dataset(vec![
            json!({"property_title": "A", "address": "1 Main", "hoa_flag": "Yes", "source": "web",
                   "occupancy": "Y", "hoa": 120, "final_reviewer": "Ann", "school_average": 7}),
            json!({"property_title": "A", "address": "1 Main", "hoa_flag": "Yes", "source": "mail",
                   "occupancy": "N", "hoa": 120, "final_reviewer": "Bob", "school_average": 6}),
        ])
    }

    #[test]
    fn test_run_commits_and_reports() {
        let config = LoadConfig::default();
        let mut store = MemoryStore::listing_schema(&config);
        let mut pipeline = Pipeline::new(&config, &mut store);
        let report = pipeline.run(&rows(), &entries(), RunOptions::default()).unwrap();

        assert_eq!(pipeline.stage(), Stage::Committed);
        assert_eq!(report.source_rows, 2);
        assert_eq!(report.property_rows, 1);
        assert_eq!(report.properties_inserted, 1);
        assert_eq!(report.reviewers_upserted, 2);
        assert_eq!(report.dependents.get("leads"), Some(&2));
        assert_eq!(report.dependents.get("hoa"), Some(&2));
        assert_eq!(
            report.gaps,
            vec![
                MappingGap::new("valuation"),
                MappingGap::new("rehab"),
                MappingGap::new("taxes"),
            ]
        );

        assert_eq!(store.row_count("property"), 1);
        assert_eq!(store.rows("property")[0]["hoa_flag"], json!(true));
        assert_eq!(store.row_count("leads"), 2);
        assert!(!store.in_transaction());
    }

    #[test]
    fn test_failure_rolls_back_everything() {
        let config = LoadConfig::default();
        let mut store = MemoryStore::listing_schema(&config).reject_inserts_into("hoa");
        let mut pipeline = Pipeline::new(&config, &mut store);
        let err = pipeline
            .run(&rows(), &entries(), RunOptions::default())
            .unwrap_err();

        assert!(matches!(err, LoadError::Insert { ref table, .. } if table == "hoa"));
        assert_eq!(pipeline.stage(), Stage::Aborted);
        for table in ["property", "reviewers", "leads", "hoa"] {
            assert_eq!(store.row_count(table), 0, "{table} should be empty");
        }
        assert!(!store.in_transaction());
    }

    #[test]
    fn test_strict_mapping_rejects_gaps() {
        let config = LoadConfig {
            strict_mapping: true,
            ..LoadConfig::default()
        };
        let mut store = MemoryStore::listing_schema(&config);
        let err = Pipeline::new(&config, &mut store)
            .run(&rows(), &entries(), RunOptions::default())
            .unwrap_err();
        assert!(matches!(err, LoadError::Config(ref m) if m.contains("valuation")));
        assert!(store.executed().is_empty());
    }

    #[test]
    fn test_leads_mapped_from_reviewer_column_alone() {
        let config = LoadConfig::default();
        let mut store = MemoryStore::listing_schema(&config);
        let entries = vec![
            FieldConfigEntry::new("Property_Title", "Property"),
            FieldConfigEntry::new("Address", "Property"),
            FieldConfigEntry::new("Final_Reviewer", "Leads"),
        ];
        let report = Pipeline::new(&config, &mut store)
            .run(&rows(), &entries, RunOptions::default())
            .unwrap();

        assert_eq!(report.dependents.get("leads"), Some(&2));
        assert!(!report.gaps.contains(&MappingGap::new("leads")));

        let property_id = store.rows("property")[0]["id"].clone();
        let reviewers = store.rows("reviewers");
        let leads = store.rows("leads");
        assert_eq!(leads.len(), 2);
        assert_eq!(leads[0]["property_id"], property_id);
        assert_eq!(leads[0]["reviewer_id"], reviewers[0]["id"]);
        assert_eq!(leads[1]["reviewer_id"], reviewers[1]["id"]);
        assert!(leads[0].get("final_reviewer").is_none());
    }

    #[test]
    fn test_pipeline_runs_once() {
        let config = LoadConfig::default();
        let mut store = MemoryStore::listing_schema(&config);
        let mut pipeline = Pipeline::new(&config, &mut store);
        pipeline.run(&rows(), &entries(), RunOptions::default()).unwrap();
        assert!(pipeline
            .run(&rows(), &entries(), RunOptions::default())
            .is_err());
    }

    #[test]
    fn test_truncate_then_reload() {
        let config = LoadConfig::default();
        let mut store = MemoryStore::listing_schema(&config);
        Pipeline::new(&config, &mut store)
            .run(&rows(), &entries(), RunOptions::default())
            .unwrap();
        Pipeline::new(&config, &mut store)
            .run(&rows(), &entries(), RunOptions::default())
            .unwrap();
        assert_eq!(store.row_count("property"), 1);
        assert_eq!(store.row_count("hoa"), 4);

        let report = Pipeline::new(&config, &mut store)
            .run(&rows(), &entries(), RunOptions { truncate: true })
            .unwrap();
        assert!(report.truncated);
        assert_eq!(store.row_count("hoa"), 2);
        assert_eq!(store.row_count("leads"), 2);
        assert_eq!(store.rows("property")[0]["id"], json!(1));
        // reviewers are never truncated
        assert_eq!(store.row_count("reviewers"), 2);

        let truncated: Vec<&str> = store
            .executed()
            .iter()
            .filter_map(|s| s.strip_prefix("TRUNCATE TABLE "))
            .collect();
        assert_eq!(truncated, ["leads", "valuation", "hoa", "rehab", "taxes", "property"]);
    }

    #[test]
    fn test_truncate_survives_failed_load() {
        let config = LoadConfig::default();
        let mut store = MemoryStore::listing_schema(&config);
        Pipeline::new(&config, &mut store)
            .run(&rows(), &entries(), RunOptions::default())
            .unwrap();

        let mut store = store.reject_inserts_into("hoa");
        Pipeline::new(&config, &mut store)
            .run(&rows(), &entries(), RunOptions { truncate: true })
            .unwrap_err();

        for table in ["property", "leads", "hoa"] {
            assert_eq!(store.row_count(table), 0, "{table} should stay truncated");
        }
        assert_eq!(store.row_count("reviewers"), 2);
    }
}
