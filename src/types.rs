use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};

/// One row of a table: column name to cell value, in column order
pub type Row = Map<String, Value>;

/// Identifier assigned by the store to an inserted row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub i64);

impl RowId {
    pub fn new(id: i64) -> Self {
        RowId(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<RowId> for Value {
    fn from(id: RowId) -> Self {
        Value::from(id.0)
    }
}

/// Real-world attribute values that identify an entity independently of
/// any store-assigned identifier, e.g. `(title, address)` for a property.
///
/// Null parts compare equal to each other, so a property without an
/// address still has a usable key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NaturalKey(pub Vec<Value>);

impl NaturalKey {
    pub fn new(values: Vec<Value>) -> Self {
        NaturalKey(values)
    }

    /// Build a key from the given columns of a row; missing columns become null
    pub fn from_row(row: &Row, columns: &[String]) -> Self {
        NaturalKey(
            columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// True when the key has no parts or every part is null
    pub fn is_null(&self) -> bool {
        self.0.iter().all(Value::is_null)
    }
}

impl Hash for NaturalKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for part in &self.0 {
            hash_value(part, state);
        }
    }
}

/// Hash a JSON value consistently with its `PartialEq`: `0.0` and `-0.0`
/// hash alike, and objects ignore key order.
fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Number(n) => {
            2u8.hash(state);
            if let Some(i) = n.as_i64() {
                0u8.hash(state);
                i.hash(state);
            } else if let Some(u) = n.as_u64() {
                1u8.hash(state);
                u.hash(state);
            } else {
                let f = n.as_f64().unwrap_or_default();
                let f = if f == 0.0 { 0.0 } else { f };
                2u8.hash(state);
                f.to_bits().hash(state);
            }
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            5u8.hash(state);
            map.len().hash(state);
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(Value::to_string).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// A transformed row together with where it came from.
///
/// `key` is the natural key the row is resolved by: its own key for
/// reference tables (property, reviewers), and the key of the property
/// built from the same source row for dependent tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyedRow {
    /// Zero-based index of the raw dataset row this was built from
    pub source_index: usize,

    pub key: NaturalKey,

    /// Cleaned cells under canonical column names
    pub data: Row,
}

impl KeyedRow {
    pub fn new(source_index: usize, key: NaturalKey, data: Row) -> Self {
        KeyedRow {
            source_index,
            key,
            data,
        }
    }
}

/// The raw dataset after header normalization and cell typing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDataset {
    /// Normalized column names in file order
    pub columns: Vec<String>,

    pub rows: Vec<Row>,
}

impl RawDataset {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        RawDataset { columns, rows }
    }

    /// Build a dataset from rows, taking the column order of first appearance
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for name in row.keys() {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }
        RawDataset { columns, rows }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
