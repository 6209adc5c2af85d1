use super::{validate_identifier, InsertStatement, KeyLookup, Store, UpsertStatement};
use crate::error::StoreError;
use crate::types::{Row, RowId};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{Number, Value};
use std::path::Path;
use tracing::debug;

/// A store backed by a SQLite database file (or memory)
#[derive(Debug)]
pub struct SqliteStore {
    connection: Connection,
    in_transaction: bool,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(connection: Connection) -> Result<Self, StoreError> {
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(SqliteStore {
            connection,
            in_transaction: false,
        })
    }

    /// The underlying connection, for schema setup
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn delete_all(&self, tables: &[String]) -> Result<(), StoreError> {
        let has_sequence: bool = self
            .connection
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
                [],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        self.connection.execute_batch("BEGIN;")?;
        let result = tables.iter().try_for_each(|table| -> Result<(), StoreError> {
            self.connection.execute(&format!("DELETE FROM {}", table), [])?;
            if has_sequence {
                self.connection
                    .execute("DELETE FROM sqlite_sequence WHERE name = ?1", [table])?;
            }
            Ok(())
        });
        match result {
            Ok(()) => self.connection.execute_batch("COMMIT;")?,
            Err(_) => self.connection.execute_batch("ROLLBACK;")?,
        }
        result
    }
}

impl Store for SqliteStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            return Err(StoreError::TransactionOpen);
        }
        self.connection.execute_batch("BEGIN;")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        self.connection.execute_batch("COMMIT;")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        self.in_transaction = false;
        self.connection.execute_batch("ROLLBACK;")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn insert(&mut self, stmt: &InsertStatement) -> Result<RowId, StoreError> {
        let sql = stmt.sql();
        debug!(%sql, "insert");
        self.connection
            .execute(&sql, params_from_iter(stmt.values().iter().map(to_sql)))?;
        Ok(RowId::new(self.connection.last_insert_rowid()))
    }

    fn upsert(&mut self, stmt: &UpsertStatement) -> Result<RowId, StoreError> {
        let sql = stmt.sql();
        debug!(%sql, "upsert");
        let id = self.connection.query_row(
            &sql,
            params_from_iter(stmt.insert().values().iter().map(to_sql)),
            |row| row.get::<_, i64>(0),
        )?;
        Ok(RowId::new(id))
    }

    fn find_id(&mut self, lookup: &KeyLookup) -> Result<Option<RowId>, StoreError> {
        let sql = lookup.sql();
        debug!(%sql, "lookup");
        let id = self
            .connection
            .query_row(
                &sql,
                params_from_iter(lookup.values().iter().map(to_sql)),
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(id.map(RowId::new))
    }

    fn read_table(&mut self, table: &str) -> Result<Vec<Row>, StoreError> {
        validate_identifier(table)?;
        let mut statement = self.connection.prepare(&format!("SELECT * FROM {}", table))?;
        let names: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let rows = statement.query_map([], |row| {
            let mut out = Row::new();
            for (idx, name) in names.iter().enumerate() {
                out.insert(name.clone(), from_sql(row.get_ref(idx)?));
            }
            Ok(out)
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn truncate(&mut self, tables: &[String]) -> Result<(), StoreError> {
        for table in tables {
            validate_identifier(table)?;
        }
        if self.in_transaction {
            // PRAGMA foreign_keys is a no-op inside a transaction
            return Err(StoreError::TransactionOpen);
        }

        self.connection.execute_batch("PRAGMA foreign_keys = OFF;")?;
        let result = self.delete_all(tables);
        self.connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        result
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: &str = "
        CREATE TABLE property (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT, address TEXT);
        CREATE TABLE reviewers (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT UNIQUE, school_average REAL);
        CREATE TABLE taxes (id INTEGER PRIMARY KEY AUTOINCREMENT,
                            property_id INTEGER REFERENCES property(id), taxes REAL);
    ";

    fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.connection().execute_batch(SCHEMA).unwrap();
        store
    }

    fn insert(table: &str, value: Value) -> InsertStatement {
        let row: Row = serde_json::from_value(value).unwrap();
        InsertStatement::from_row(table, &row).unwrap()
    }

    #[test]
    fn test_insert_and_read_back() {
        let mut store = store();
        let id = store
            .insert(&insert("property", json!({"title": "A", "address": "1 Main"})))
            .unwrap();
        assert_eq!(id.get(), 1);

        let rows = store.read_table("property").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], json!("A"));
        assert_eq!(rows[0]["id"], json!(1));
    }

    #[test]
    fn test_find_id_with_null_part() {
        let mut store = store();
        let id = store
            .insert(&insert("property", json!({"title": "A", "address": null})))
            .unwrap();
        let lookup = KeyLookup::new(
            "property",
            "id",
            &["title".into(), "address".into()],
            &[json!("A"), Value::Null],
        )
        .unwrap();
        assert_eq!(store.find_id(&lookup).unwrap(), Some(id));
    }

    #[test]
    fn test_upsert_returns_existing_id() {
        let mut store = store();
        let upsert = |avg: f64| {
            UpsertStatement::new(
                insert("reviewers", json!({"name": "Ann", "school_average": avg})),
                vec!["name".into()],
                "id",
            )
            .unwrap()
        };
        let first = store.upsert(&upsert(6.5)).unwrap();
        let second = store.upsert(&upsert(9.0)).unwrap();
        assert_eq!(first, second);

        let rows = store.read_table("reviewers").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["school_average"], json!(9.0));
    }

    #[test]
    fn test_foreign_key_enforced_and_rollback() {
        let mut store = store();
        store.begin().unwrap();
        let err = store
            .insert(&insert("taxes", json!({"property_id": 42, "taxes": 10.0})))
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
        store.rollback().unwrap();
        assert!(store.read_table("taxes").unwrap().is_empty());
    }

    #[test]
    fn test_truncate_with_children() {
        let mut store = store();
        let id = store.insert(&insert("property", json!({"title": "A"}))).unwrap();
        store
            .insert(&insert("taxes", json!({"property_id": id.get()})))
            .unwrap();

        store
            .truncate(&["property".to_string(), "taxes".to_string()])
            .unwrap();
        assert!(store.read_table("property").unwrap().is_empty());
        assert!(store.read_table("taxes").unwrap().is_empty());

        let fresh = store.insert(&insert("property", json!({"title": "B"}))).unwrap();
        assert_eq!(fresh.get(), 1);

        let enabled: i64 = store
            .connection()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
