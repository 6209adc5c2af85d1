//! Input readers: the raw listing CSV and the field configuration sheet.

use crate::config::LoadConfig;
use crate::error::LoadError;
use crate::mapping::{parse_config_table, FieldConfigEntry};
use crate::types::{RawDataset, Row};
use calamine::{open_workbook_auto, Data, Reader};
use csv::{ReaderBuilder, Trim};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

static INTEGER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?\d+$").unwrap());

static DECIMAL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d+\.\d*|\.\d+|\d+(\.\d*)?[eE][+-]?\d+)$").unwrap()
});

/// Trim, lowercase, and replace spaces with underscores
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Type a raw cell: null markers become null, numeric text becomes a number,
/// everything else stays text. Integers with a leading zero (zip codes) stay text.
pub fn parse_cell(raw: &str, config: &LoadConfig) -> Value {
    if config.is_null_marker(raw) {
        return Value::Null;
    }
    let text = raw.trim();

    if INTEGER_REGEX.is_match(text) {
        let digits = text.trim_start_matches(&['+', '-'][..]);
        if digits.len() > 1 && digits.starts_with('0') {
            return Value::String(text.to_string());
        }
        if let Ok(n) = text.parse::<i64>() {
            return Value::Number(n.into());
        }
    }

    if DECIMAL_REGEX.is_match(text) {
        if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }

    Value::String(text.to_string())
}

/// Read the raw dataset CSV
pub fn read_dataset<P: AsRef<Path>>(path: P, config: &LoadConfig) -> Result<RawDataset, LoadError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let dataset = read_dataset_from_reader(file, config)?;
    info!(
        path = %path.display(),
        rows = dataset.len(),
        columns = dataset.columns.len(),
        "loaded dataset"
    );
    Ok(dataset)
}

/// Read a dataset from any CSV source. Headers are normalized and aliased,
/// short rows are padded with nulls.
pub fn read_dataset_from_reader<R: Read>(reader: R, config: &LoadConfig) -> Result<RawDataset, LoadError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::Headers)
        .flexible(true)
        .from_reader(reader);

    let mut columns: Vec<String> = Vec::new();
    for header in reader.headers()?.iter() {
        let name = config.dataset_header(header);
        if columns.contains(&name) {
            debug!(column = %name, "duplicate header, later column wins");
        }
        columns.push(name);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            let value = record
                .get(idx)
                .map(|raw| parse_cell(raw, config))
                .unwrap_or(Value::Null);
            row.insert(name.clone(), value);
        }
        rows.push(row);
    }

    let mut unique = Vec::with_capacity(columns.len());
    for name in columns {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }

    Ok(RawDataset::new(unique, rows))
}

/// Read the field configuration from a workbook (xlsx/xls/ods) or a CSV file.
///
/// `sheet` selects a worksheet by name; the first sheet is used when it is `None`.
pub fn read_field_config<P: AsRef<Path>>(
    path: P,
    sheet: Option<&str>,
) -> Result<Vec<FieldConfigEntry>, LoadError> {
    let path = path.as_ref();
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

    let table = if is_csv {
        let file = File::open(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        read_csv_table(file)?
    } else {
        read_workbook_table(path, sheet)?
    };

    let entries = parse_config_table(&table)?;
    info!(path = %path.display(), entries = entries.len(), "loaded field configuration");
    Ok(entries)
}

/// Read a CSV source as a grid of cell texts, header row included
pub fn read_csv_table<R: Read>(reader: R) -> Result<Vec<Vec<String>>, LoadError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut table = Vec::new();
    for record in reader.records() {
        let record = record?;
        table.push(record.iter().map(str::to_string).collect());
    }
    Ok(table)
}

fn read_workbook_table(path: &Path, sheet: Option<&str>) -> Result<Vec<Vec<String>>, LoadError> {
    let mut workbook = open_workbook_auto(path)?;

    let range = match sheet {
        Some(name) => {
            if !workbook.sheet_names().iter().any(|s| s == name) {
                return Err(LoadError::config(format!(
                    "sheet `{}` not found in {}",
                    name,
                    path.display()
                )));
            }
            workbook.worksheet_range(name)?
        }
        None => workbook
            .worksheet_range_at(0)
            .ok_or_else(|| LoadError::config(format!("no worksheet found in {}", path.display())))??,
    };

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Property Title "), "property_title");
        assert_eq!(normalize_name("HOA_Flag"), "hoa_flag");
        assert_eq!(normalize_name("Zip"), "zip");
    }

    #[test]
    fn test_parse_cell_types() {
        let config = LoadConfig::default();
        assert_eq!(parse_cell("42", &config), json!(42));
        assert_eq!(parse_cell("-3.5", &config), json!(-3.5));
        assert_eq!(parse_cell("1e3", &config), json!(1000.0));
        assert_eq!(parse_cell("02134", &config), json!("02134"));
        assert_eq!(parse_cell("0", &config), json!(0));
        assert_eq!(parse_cell(" Yes ", &config), json!("Yes"));
        assert_eq!(parse_cell("", &config), Value::Null);
        assert_eq!(parse_cell("N/A", &config), Value::Null);
    }

    #[test]
    fn test_read_dataset_normalizes_headers() {
        let csv = "Property Title, Address ,HOA_Flag,BasementYesNo\nA,1 Main,Yes,\nB,2 Oak\n";
        let dataset = read_dataset_from_reader(csv.as_bytes(), &LoadConfig::default()).unwrap();

        assert_eq!(
            dataset.columns,
            vec!["property_title", "address", "hoa_flag", "basement_yes_no"]
        );
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.rows[0]["hoa_flag"], json!("Yes"));
        assert_eq!(dataset.rows[0]["basement_yes_no"], Value::Null);
        assert_eq!(dataset.rows[1]["hoa_flag"], Value::Null);
    }

    #[test]
    fn test_read_field_config_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Column Name,Target Table").unwrap();
        writeln!(file, "Property_Title,Property").unwrap();
        writeln!(file, "Reviewed Status,Leads").unwrap();
        file.flush().unwrap();

        let entries = read_field_config(file.path(), None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].column_name, "Reviewed Status");
        assert_eq!(entries[1].target_table, "Leads");
    }

    const WORKBOOK: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/field_config.xlsx");

    #[test]
    fn test_read_field_config_workbook_first_sheet() {
        let entries = read_field_config(WORKBOOK, None).unwrap();
        assert_eq!(
            entries,
            vec![
                FieldConfigEntry::new("Property_Title", "Property"),
                FieldConfigEntry::new("2019", "Valuation"),
            ]
        );
    }

    #[test]
    fn test_read_field_config_workbook_named_sheet() {
        let entries = read_field_config(WORKBOOK, Some("Sheet1")).unwrap();
        assert_eq!(entries, vec![FieldConfigEntry::new("Taxes", "Taxes")]);

        let err = read_field_config(WORKBOOK, Some("Missing")).unwrap_err();
        assert!(matches!(err, LoadError::Config(ref m) if m.contains("`Missing`")));
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&Data::Float(2019.0)), "2019");
        assert_eq!(cell_text(&Data::Float(7.5)), "7.5");
        assert_eq!(cell_text(&Data::Int(12)), "12");
        assert_eq!(cell_text(&Data::String("Leads".into())), "Leads");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[test]
    fn test_read_missing_dataset_is_io_error() {
        let err = read_dataset("/nonexistent/data.csv", &LoadConfig::default()).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
