//! Field mapping resolution
//!
//! Turns the field configuration sheet (`Column Name`, `Target Table` pairs)
//! into a per-table list of dataset columns, the plan every later stage
//! follows.

use crate::error::{LoadError, MappingGap};
use crate::source::normalize_name;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const COLUMN_NAME_HEADER: &str = "Column Name";
pub const TARGET_TABLE_HEADER: &str = "Target Table";

/// One row of the field configuration sheet, as written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfigEntry {
    pub column_name: String,
    pub target_table: String,
}

impl FieldConfigEntry {
    pub fn new(column_name: impl Into<String>, target_table: impl Into<String>) -> Self {
        FieldConfigEntry {
            column_name: column_name.into(),
            target_table: target_table.into(),
        }
    }
}

/// Parse a configuration grid whose first row is the header.
///
/// Extra columns are ignored; rows with a blank column name or target
/// table are skipped.
pub fn parse_config_table(table: &[Vec<String>]) -> Result<Vec<FieldConfigEntry>, LoadError> {
    let Some((header, body)) = table.split_first() else {
        return Err(LoadError::config("field configuration is empty"));
    };

    let position = |wanted: &str| {
        header
            .iter()
            .position(|h| h.trim() == wanted)
            .ok_or_else(|| {
                LoadError::config(format!(
                    "field configuration is missing the `{}` header (found: {})",
                    wanted,
                    header.join(", ")
                ))
            })
    };
    let column_idx = position(COLUMN_NAME_HEADER)?;
    let table_idx = position(TARGET_TABLE_HEADER)?;

    let entries = body
        .iter()
        .filter_map(|row| {
            let column = row.get(column_idx).map(|s| s.trim()).unwrap_or_default();
            let target = row.get(table_idx).map(|s| s.trim()).unwrap_or_default();
            if column.is_empty() || target.is_empty() {
                None
            } else {
                Some(FieldConfigEntry::new(column, target))
            }
        })
        .collect();

    Ok(entries)
}

/// Target table to the ordered dataset columns assigned to it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldMapping {
    tables: IndexMap<String, Vec<String>>,
}

impl FieldMapping {
    /// Group configuration entries by normalized target table.
    ///
    /// Column names are normalized the same way dataset headers are.
    /// Columns the dataset does not have are dropped, as are repeats within
    /// a table. A table can end up with no columns; it is kept so callers can
    /// report the gap. Tables are sorted by name.
    pub fn resolve(entries: &[FieldConfigEntry], dataset_columns: &[String]) -> Self {
        let available: Vec<String> = dataset_columns.iter().map(|c| normalize_name(c)).collect();
        let mut tables: IndexMap<String, Vec<String>> = IndexMap::new();

        for entry in entries {
            let table = normalize_name(&entry.target_table);
            let column = normalize_name(&entry.column_name);
            let columns = tables.entry(table).or_default();
            if available.contains(&column) && !columns.contains(&column) {
                columns.push(column);
            }
        }

        tables.sort_keys();
        FieldMapping { tables }
    }

    /// Columns mapped to a table, if the configuration names it at all
    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    /// Columns mapped to a table; empty when none are
    pub fn mapped_columns(&self, table: &str) -> &[String] {
        self.columns(table).unwrap_or(&[])
    }

    pub fn has_columns(&self, table: &str) -> bool {
        !self.mapped_columns(table).is_empty()
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.tables.iter().map(|(t, c)| (t.as_str(), c.as_slice()))
    }

    /// Gaps among the given tables
    pub fn gaps<'a>(&self, tables: impl IntoIterator<Item = &'a str>) -> Vec<MappingGap> {
        tables
            .into_iter()
            .filter(|t| !self.has_columns(t))
            .map(MappingGap::new)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_config_table() {
        let table = grid(&[
            &["Column Name", "Target Table", "Notes"],
            &["Property_Title", "Property", "x"],
            &["", "Property", ""],
            &["Source", "Leads", ""],
        ]);
        let entries = parse_config_table(&table).unwrap();
        assert_eq!(
            entries,
            vec![
                FieldConfigEntry::new("Property_Title", "Property"),
                FieldConfigEntry::new("Source", "Leads"),
            ]
        );
    }

    #[test]
    fn test_missing_header_is_config_error() {
        let table = grid(&[&["Column Name", "Table"], &["Source", "Leads"]]);
        let err = parse_config_table(&table).unwrap_err();
        assert!(matches!(err, LoadError::Config(ref m) if m.contains("Target Table")));

        assert!(parse_config_table(&[]).is_err());
    }

    #[test]
    fn test_resolve_groups_and_filters() {
        let entries = vec![
            FieldConfigEntry::new(" Property_Title", "Property "),
            FieldConfigEntry::new("Address", "property"),
            FieldConfigEntry::new("Not In Data", "Property"),
            FieldConfigEntry::new("Source", "Leads"),
            FieldConfigEntry::new("Source", "Leads"),
            FieldConfigEntry::new("Missing", "Taxes"),
        ];
        let dataset = columns(&["property_title", "address", "source", "extra"]);
        let mapping = FieldMapping::resolve(&entries, &dataset);

        assert_eq!(
            mapping.columns("property"),
            Some(&["property_title".to_string(), "address".to_string()][..])
        );
        assert_eq!(mapping.mapped_columns("leads"), &["source".to_string()]);
        assert_eq!(mapping.columns("taxes"), Some(&[][..]));
        assert_eq!(mapping.columns("hoa"), None);

        let names: Vec<&str> = mapping.tables().map(|(t, _)| t).collect();
        assert_eq!(names, vec!["leads", "property", "taxes"]);
    }

    #[test]
    fn test_resolve_never_crosses_tables() {
        let entries = vec![
            FieldConfigEntry::new("a", "one"),
            FieldConfigEntry::new("b", "two"),
            FieldConfigEntry::new("c", "one"),
        ];
        let dataset = columns(&["a", "b", "c"]);
        let mapping = FieldMapping::resolve(&entries, &dataset);

        for (table, cols) in mapping.tables() {
            for col in cols {
                assert!(dataset.contains(col));
                assert!(entries
                    .iter()
                    .any(|e| e.column_name == *col && e.target_table == table));
            }
        }
    }

    #[test]
    fn test_gaps() {
        let entries = vec![
            FieldConfigEntry::new("a", "hoa"),
            FieldConfigEntry::new("zzz", "rehab"),
        ];
        let mapping = FieldMapping::resolve(&entries, &columns(&["a"]));
        let gaps = mapping.gaps(["hoa", "rehab", "taxes"]);
        assert_eq!(gaps, vec![MappingGap::new("rehab"), MappingGap::new("taxes")]);
    }
}
