use crate::compiler::{quote_ident, ColumnType, Schema, Table};
use crate::error::Result;
use crate::value::{Record, Value, DATETIME_FORMAT};
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;

/// One association-table row linking two records.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRow {
    pub table: String,
    pub local_column: String,
    pub remote_column: String,
    pub local_pk: String,
    pub remote_pk: String,
}

/// The in-memory relational database holding the loaded content.
/// Lives for one build and is never written to disk.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        // References are checked by the loader, which knows the policy and
        // which tables are still to come.
        conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        Ok(Database { conn })
    }

    /// Create every table of the compiled schema.
    pub fn create_schema(&self, schema: &Schema) -> Result<()> {
        let ddl = schema.create_statements();
        log::debug!("Creating {} database table(s)...", ddl.len());
        self.conn.execute_batch(&ddl.join("\n"))?;
        Ok(())
    }

    // ── Writes (load phase only) ─────────────────────────────────────

    /// Insert one record row and its link rows atomically.
    pub fn insert_record(
        &self,
        table: &Table,
        row: &[(String, Value)],
        links: &[LinkRow],
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        let columns: Vec<String> = row.iter().map(|(c, _)| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&table.name),
            columns.join(", "),
            placeholders.join(", ")
        );
        tx.execute(&sql, params_from_iter(row.iter().map(|(_, v)| v)))?;

        for link in links {
            insert_link(&tx, link)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Insert a link row outside a record insert (deferred links).
    pub fn insert_link(&self, link: &LinkRow) -> Result<()> {
        insert_link(&self.conn, link)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Whether `table` has a row with primary key `pk`.
    pub fn contains(&self, table: &str, pk: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE \"pk\" = ?1", quote_ident(table));
        let found = self
            .conn
            .query_row(&sql, params![pk], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Run a `SELECT` whose result columns are exactly `table.columns`, in
    /// order, and decode each row into a record.
    pub fn select_records(&self, table: &Table, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            let mut pk = String::new();
            let mut fields = BTreeMap::new();
            for (idx, column) in table.columns.iter().enumerate() {
                let value = decode(row.get_ref(idx)?, column.column_type);
                if column.primary_key {
                    pk = value.to_string();
                } else {
                    fields.insert(column.name.clone(), value);
                }
            }
            Ok(Record {
                model: table.name.clone(),
                pk,
                fields,
            })
        })?;

        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }

    /// Run a single-value `SELECT`, decoding the result as `column_type`
    /// (integers when none is given).
    pub fn select_scalar(
        &self,
        sql: &str,
        params: &[Value],
        column_type: Option<ColumnType>,
    ) -> Result<Value> {
        let value = self
            .conn
            .query_row(sql, params_from_iter(params.iter()), |row| {
                Ok(decode(row.get_ref(0)?, column_type.unwrap_or(ColumnType::Integer)))
            })?;
        Ok(value)
    }
}

fn insert_link(conn: &Connection, link: &LinkRow) -> Result<()> {
    // Reciprocal declarations can list the same pair from both sides.
    let sql = format!(
        "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2)",
        quote_ident(&link.table),
        quote_ident(&link.local_column),
        quote_ident(&link.remote_column)
    );
    conn.execute(&sql, params![link.local_pk, link.remote_pk])?;
    Ok(())
}

fn decode(value: ValueRef<'_>, column_type: ColumnType) -> Value {
    match (value, column_type) {
        (ValueRef::Null, _) => Value::Null,
        (ValueRef::Integer(i), ColumnType::Boolean) => Value::Boolean(i != 0),
        (ValueRef::Integer(i), ColumnType::Integer) => Value::Integer(i),
        (ValueRef::Integer(i), _) => Value::String(i.to_string()),
        (ValueRef::Real(f), ColumnType::Integer) => Value::Integer(f as i64),
        (ValueRef::Real(f), _) => Value::String(f.to_string()),
        (ValueRef::Text(bytes), ColumnType::DateTime) => {
            let text = String::from_utf8_lossy(bytes);
            match chrono::NaiveDateTime::parse_from_str(&text, DATETIME_FORMAT) {
                Ok(dt) => Value::DateTime(dt),
                Err(_) => Value::String(text.into_owned()),
            }
        }
        (ValueRef::Text(bytes), _) | (ValueRef::Blob(bytes), _) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
