use crate::error::LoadError;
use crate::source::normalize_name;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What to store when a boolean column holds something other than
/// Yes/Y/No/N. Either way the value is recorded as an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolPolicy {
    /// Store null (unknown)
    #[default]
    Unknown,
    /// Keep the original text
    PassThrough,
}

/// Per-table cleaning rules
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableRules {
    /// Target table name, as it appears in the field configuration and the store
    pub table: String,

    /// Source column to canonical column. Keys are matched after normalization,
    /// so `Property_Title` and `property_title` are the same entry.
    pub renames: IndexMap<String, String>,

    /// Canonical columns holding Yes/No style flags
    pub boolean_columns: Vec<String>,
}

impl TableRules {
    pub fn new(table: impl Into<String>) -> Self {
        TableRules {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn rename(mut self, source: &str, canonical: &str) -> Self {
        self.renames.insert(source.to_string(), canonical.to_string());
        self
    }

    pub fn boolean(mut self, column: &str) -> Self {
        self.boolean_columns.push(column.to_string());
        self
    }

    /// Canonical name for a normalized source column
    pub fn canonical_name(&self, source: &str) -> String {
        self.renames
            .iter()
            .find(|(from, _)| normalize_name(from) == source)
            .map(|(_, to)| to.clone())
            .unwrap_or_else(|| source.to_string())
    }

    pub fn is_boolean(&self, canonical: &str) -> bool {
        self.boolean_columns.iter().any(|c| c == canonical)
    }
}

/// Configuration for one import run.
///
/// `Default` reproduces the listing schema: property, reviewers, leads and
/// the valuation/hoa/rehab/taxes child tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub property: TableRules,

    /// Canonical property columns forming the natural key
    pub property_key: Vec<String>,

    pub reviewers: TableRules,

    /// Canonical reviewer column forming the natural key
    pub reviewer_key: String,

    /// Source columns used for reviewers when the field configuration maps none
    pub reviewer_columns: Vec<String>,

    pub leads: TableRules,

    /// Source column holding the reviewer name a lead joins on
    pub lead_reviewer_column: String,

    /// Lead column receiving the resolved reviewer identifier
    pub lead_reviewer_fk: String,

    /// Tables keyed to the property built from the same source row, in load order
    pub child_tables: Vec<TableRules>,

    /// Foreign key column pointing at the property, on leads and child tables
    pub parent_fk: String,

    /// Primary key column of every table
    pub id_column: String,

    /// Tables emptied, in order, by a truncating run
    pub truncate_tables: Vec<String>,

    /// Cell texts read as "no value"
    pub null_markers: Vec<String>,

    /// Normalized header to corrected header
    pub header_aliases: IndexMap<String, String>,

    pub bool_policy: BoolPolicy,

    /// Fail with a configuration error instead of skipping unmapped tables
    pub strict_mapping: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        let property = TableRules::new("property")
            .rename("Property_Title", "title")
            .rename("Address", "address")
            .rename("Street_Address", "street_address")
            .rename("City", "city")
            .rename("State", "state")
            .rename("Zip", "zip_code")
            .rename("Market", "market")
            .rename("Flood", "flood")
            .rename("Latitude", "latitude")
            .rename("Longitude", "longitude")
            .rename("Subdivision", "subdivision")
            .rename("Taxes", "taxes")
            .rename("Redfin_Value", "redfin_value")
            .rename("HOA_Flag", "hoa_flag")
            .boolean("hoa_flag");

        let reviewers = TableRules::new("reviewers")
            .rename("Final_Reviewer", "name")
            .rename("School_Average", "school_average");

        let leads = TableRules::new("leads")
            .rename("Reviewed_Status", "reviewed_status")
            .rename("Most_Recent_Status", "most_recent_status")
            .rename("Source", "source")
            .rename("Occupancy", "occupancy")
            .rename("Selling_Reason", "selling_reason")
            .rename("Seller_Retained_Broker", "seller_retained_broker")
            .boolean("occupancy");

        let child_tables = ["valuation", "hoa", "rehab", "taxes"]
            .into_iter()
            .map(TableRules::new)
            .collect();

        let mut header_aliases = IndexMap::new();
        header_aliases.insert("basementyesno".to_string(), "basement_yes_no".to_string());

        LoadConfig {
            property,
            property_key: vec!["title".to_string(), "address".to_string()],
            reviewers,
            reviewer_key: "name".to_string(),
            reviewer_columns: vec!["final_reviewer".to_string(), "school_average".to_string()],
            leads,
            lead_reviewer_column: "final_reviewer".to_string(),
            lead_reviewer_fk: "reviewer_id".to_string(),
            child_tables,
            parent_fk: "property_id".to_string(),
            id_column: "id".to_string(),
            truncate_tables: ["leads", "valuation", "hoa", "rehab", "taxes", "property"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            null_markers: [
                "", "NA", "N/A", "n/a", "NaN", "nan", "null", "NULL", "None", "#N/A", "<NA>",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
            header_aliases,
            bool_policy: BoolPolicy::default(),
            strict_mapping: false,
        }
    }
}

impl LoadConfig {
    /// Read a JSON configuration. Fields left out keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, LoadError> {
        let config: LoadConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings the loaders cannot work without
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.property_key.is_empty() {
            return Err(LoadError::config("property_key must name at least one column"));
        }
        if self.reviewer_key.is_empty() {
            return Err(LoadError::config("reviewer_key must not be empty"));
        }
        if self.id_column.is_empty() || self.parent_fk.is_empty() {
            return Err(LoadError::config("id_column and parent_fk must not be empty"));
        }
        Ok(())
    }

    /// Normalized null markers; the empty string is always one
    pub fn is_null_marker(&self, text: &str) -> bool {
        let text = text.trim();
        text.is_empty() || self.null_markers.iter().any(|m| m == text)
    }

    /// Normalize a dataset header and apply the alias table
    pub fn dataset_header(&self, raw: &str) -> String {
        let name = normalize_name(raw);
        self.header_aliases.get(&name).cloned().unwrap_or(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name_matches_normalized_source() {
        let config = LoadConfig::default();
        assert_eq!(config.property.canonical_name("property_title"), "title");
        assert_eq!(config.property.canonical_name("hoa_flag"), "hoa_flag");
        assert_eq!(config.property.canonical_name("zip"), "zip_code");
        assert_eq!(config.property.canonical_name("unmapped"), "unmapped");
    }

    #[test]
    fn test_dataset_header_applies_aliases() {
        let config = LoadConfig::default();
        assert_eq!(config.dataset_header(" Property Title "), "property_title");
        assert_eq!(config.dataset_header("BasementYesNo"), "basement_yes_no");
    }

    #[test]
    fn test_json_overlay_keeps_defaults() {
        let config = LoadConfig::from_json_str(
            r#"{"bool_policy": "pass_through", "strict_mapping": true}"#,
        )
        .unwrap();
        assert_eq!(config.bool_policy, BoolPolicy::PassThrough);
        assert!(config.strict_mapping);
        assert_eq!(config.property_key, vec!["title", "address"]);
        assert_eq!(config.child_tables.len(), 4);
    }

    #[test]
    fn test_empty_property_key_is_rejected() {
        let err = LoadConfig::from_json_str(r#"{"property_key": []}"#).unwrap_err();
        assert!(matches!(err, LoadError::Config(_)));
    }

    #[test]
    fn test_null_markers() {
        let config = LoadConfig::default();
        assert!(config.is_null_marker(""));
        assert!(config.is_null_marker("  NaN "));
        assert!(!config.is_null_marker("0"));
        assert!(!config.is_null_marker("No"));
    }
}
