//! SQLite provider
//!
//! `scheme://table/key` addresses one row: the namespace is the table and
//! the joined path is the key column's value. Rows travel as JSON objects.

use std::collections::HashMap;
use std::path::Path;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ToSql};
use serde_json::{json, Map, Value};
use super::schema::create_table_sql;
use crate::metadata::TypeMetadata;
use crate::provider::{size_mismatch, BatchResult, Provider};
use crate::query::{render, validate_identifier, Condition, Operand, QueryRegistry, Rendered, Statement};
use crate::uri::ResourceUri;
use crate::watch::{WatchCallback, WatchHandle};
use crate::{Error, Result};

/// SQL provider settings
#[derive(Debug, Clone)]
pub struct SqlConfig {
    /// Column that holds the URI path
    pub key_column: String,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            key_column: "id".to_string(),
        }
    }
}

type Row = Map<String, Value>;

/// Provider backed by one SQLite connection
pub struct SqliteProvider {
    conn: Mutex<Connection>,
    config: SqlConfig,
    queries: QueryRegistry,
}

impl SqliteProvider {
    pub fn new(conn: Connection, config: SqlConfig) -> Result<Self> {
        validate_identifier(&config.key_column)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
            queries: QueryRegistry::new(),
        })
    }

    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        tracing::debug!("Opening SQLite database at {}", path.display());
        Self::new(Connection::open(path)?, SqlConfig::default())
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?, SqlConfig::default())
    }

    pub fn config(&self) -> &SqlConfig {
        &self.config
    }

    /// Run raw SQL (schema setup, migrations)
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    // ========== Named Queries ==========

    pub fn register_query(&self, name: impl Into<String>, stmt: Statement) -> Result<()> {
        self.queries.register(name, stmt)
    }

    pub fn get_query(&self, name: &str) -> Result<Statement> {
        Ok(self.queries.get(name)?.as_ref().clone())
    }

    pub fn unregister_query(&self, name: &str) -> Result<()> {
        self.queries.unregister(name).map(|_| ())
    }

    /// Registered query names, sorted
    pub fn list_queries(&self) -> Vec<String> {
        self.queries.names()
    }

    /// Run a named query.
    ///
    /// Selects return an array of row objects; anything else returns
    /// `{"rows_affected": n}`.
    pub fn execute_query(&self, name: &str, params: &Map<String, Value>) -> Result<Value> {
        let stmt = self.queries.get(name)?;
        let rendered = render(&stmt, params)?;
        tracing::debug!("Executing query {}: {}", name, rendered.sql);
        let conn = self.conn.lock();
        if stmt.is_select() {
            let rows = query_rows(&conn, &rendered)?;
            Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
        } else {
            let affected = execute_rendered(&conn, &rendered)?;
            Ok(json!({ "rows_affected": affected }))
        }
    }

    // ========== Schema ==========

    /// DDL for a described type; runs it first when `execute` is set
    pub fn create_table(&self, meta: &TypeMetadata, execute: bool) -> Result<String> {
        let sql = create_table_sql(meta);
        if execute {
            tracing::info!("Creating table for {}", meta.name);
            self.execute_batch(&sql)?;
        }
        Ok(sql)
    }

    // ========== Row Operations ==========

    /// Table and key addressed by a URI
    fn locate(&self, uri: &ResourceUri) -> Result<(String, String)> {
        if !uri.is_valid() {
            return Err(Error::InvalidUri(uri.to_uri_string()));
        }
        validate_identifier(uri.namespace())?;
        let key = uri.joined_path();
        if key.is_empty() {
            return Err(Error::InvalidUri(format!("{} (missing key)", uri)));
        }
        Ok((uri.namespace().to_string(), key))
    }

    fn key_filter(&self, key: &str) -> Condition {
        Condition::eq(self.config.key_column.as_str(), Operand::value(key))
    }

    fn read_row(&self, uri: &ResourceUri) -> Result<Vec<u8>> {
        let (table, key) = self.locate(uri)?;
        let stmt = Statement::select(table).filter(self.key_filter(&key)).limit(1);
        let rendered = render(&stmt, &Map::new())?;
        let rows = query_rows(&self.conn.lock(), &rendered)?;
        match rows.into_iter().next() {
            Some(row) => Ok(serde_json::to_vec(&row)?),
            None => Err(Error::NotFound(uri.to_uri_string())),
        }
    }

    fn write_row(&self, uri: &ResourceUri, value: &[u8]) -> Result<()> {
        let (table, key) = self.locate(uri)?;
        let mut row = match serde_json::from_slice::<Value>(value) {
            Ok(Value::Object(row)) => row,
            Ok(other) => {
                return Err(Error::InvalidPayload(format!(
                    "{} expects a JSON object, got {}",
                    uri,
                    json_kind(&other)
                )));
            }
            Err(e) => return Err(Error::InvalidPayload(format!("{}: {}", uri, e))),
        };
        row.insert(self.config.key_column.clone(), Value::String(key));

        let stmt = Statement::Insert {
            table,
            values: row.into_iter().map(|(c, v)| (c, Operand::Value(v))).collect(),
            upsert_key: Some(self.config.key_column.clone()),
        };
        let rendered = render(&stmt, &Map::new())?;
        execute_rendered(&self.conn.lock(), &rendered)?;
        Ok(())
    }

    fn delete_row(&self, uri: &ResourceUri) -> Result<()> {
        let (table, key) = self.locate(uri)?;
        let stmt = Statement::delete(table).filter(self.key_filter(&key));
        let rendered = render(&stmt, &Map::new())?;
        match execute_rendered(&self.conn.lock(), &rendered)? {
            0 => Err(Error::NotFound(uri.to_uri_string())),
            _ => Ok(()),
        }
    }

    fn row_exists(&self, uri: &ResourceUri) -> Result<bool> {
        let (table, key) = self.locate(uri)?;
        let stmt = Statement::select(table)
            .columns([self.config.key_column.as_str()])
            .filter(self.key_filter(&key))
            .limit(1);
        let rendered = render(&stmt, &Map::new())?;
        Ok(!query_rows(&self.conn.lock(), &rendered)?.is_empty())
    }

    /// One `IN` select per table; a failing table falls back to per-row reads
    fn read_rows(&self, uris: &[ResourceUri]) -> BatchResult<Vec<u8>> {
        let mut results: BatchResult<Vec<u8>> = uris
            .iter()
            .map(|u| Err(Error::NotFound(u.to_uri_string())))
            .collect();

        let mut by_table: HashMap<String, Vec<(usize, String)>> = HashMap::new();
        for (i, uri) in uris.iter().enumerate() {
            match self.locate(uri) {
                Ok((table, key)) => by_table.entry(table).or_default().push((i, key)),
                Err(e) => results[i] = Err(e),
            }
        }

        for (table, entries) in by_table {
            let keys = entries.iter().map(|(_, k)| Operand::value(k.as_str())).collect();
            let stmt = Statement::select(table.as_str())
                .filter(Condition::is_in(self.config.key_column.as_str(), keys));
            let rows = render(&stmt, &Map::new())
                .and_then(|rendered| query_rows(&self.conn.lock(), &rendered));

            let rows = match rows {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::debug!("Batch read on {} failed ({}), reading rows one by one", table, e);
                    for (i, _) in &entries {
                        results[*i] = self.read_row(&uris[*i]);
                    }
                    continue;
                }
            };

            let mut found: HashMap<String, Row> = HashMap::new();
            for row in rows {
                if let Some(key) = row.get(&self.config.key_column).map(key_text) {
                    found.insert(key, row);
                }
            }
            for (i, key) in entries {
                if let Some(row) = found.get(&key) {
                    results[i] = serde_json::to_vec(row).map_err(Error::from);
                }
            }
        }
        results
    }
}

#[async_trait]
impl Provider for SqliteProvider {
    async fn get(&self, uri: &ResourceUri) -> Result<Vec<u8>> {
        tracing::debug!("sql get {}", uri);
        self.read_row(uri)
    }

    async fn set(&self, uri: &ResourceUri, value: &[u8]) -> Result<()> {
        tracing::debug!("sql set {}", uri);
        self.write_row(uri, value)
    }

    async fn delete(&self, uri: &ResourceUri) -> Result<()> {
        tracing::debug!("sql delete {}", uri);
        self.delete_row(uri)
    }

    async fn exists(&self, uri: &ResourceUri) -> Result<bool> {
        self.row_exists(uri)
    }

    /// Run the named query given by the URI's last segment.
    ///
    /// The payload is a JSON object of parameters; empty or `null` means none.
    async fn execute(&self, uri: &ResourceUri, payload: &[u8]) -> Result<Vec<u8>> {
        let name = uri
            .last_segment()
            .ok_or_else(|| Error::InvalidUri(format!("{} (missing query name)", uri)))?;
        let params = if payload.iter().all(u8::is_ascii_whitespace) {
            Map::new()
        } else {
            match serde_json::from_slice::<Value>(payload) {
                Ok(Value::Object(params)) => params,
                Ok(Value::Null) => Map::new(),
                Ok(other) => {
                    return Err(Error::InvalidPayload(format!(
                        "query parameters must be a JSON object, got {}",
                        json_kind(&other)
                    )));
                }
                Err(e) => return Err(Error::InvalidPayload(e.to_string())),
            }
        };
        let result = self.execute_query(name, &params)?;
        Ok(serde_json::to_vec(&result)?)
    }

    async fn sync(&self, uri: &ResourceUri, _callback: WatchCallback) -> Result<WatchHandle> {
        Err(Error::NotSupported(format!("sync on {} (no change feed)", uri)))
    }

    async fn batch_get(&self, uris: &[ResourceUri]) -> BatchResult<Vec<u8>> {
        self.read_rows(uris)
    }

    /// Item by item with no transaction: a later failure leaves earlier
    /// writes in place.
    async fn batch_set(&self, uris: &[ResourceUri], values: &[Vec<u8>]) -> BatchResult<()> {
        if let Some(mismatch) = size_mismatch(uris, values) {
            return mismatch;
        }
        uris.iter()
            .zip(values)
            .map(|(uri, value)| self.write_row(uri, value))
            .collect()
    }

    async fn batch_delete(&self, uris: &[ResourceUri]) -> BatchResult<()> {
        uris.iter().map(|uri| self.delete_row(uri)).collect()
    }

    async fn close(&self) -> Result<()> {
        self.queries.clear();
        tracing::info!("sql provider closed");
        Ok(())
    }
}

// ========== Value Conversion ==========

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// How a column's declared type shapes the JSON read back from it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnShape {
    Plain,
    /// `BOOLEAN` / `BOOL`: integers read back as `true`/`false`
    Bool,
    /// `JSON`, `JSONB` or an array type: text holds encoded JSON
    Json,
}

impl ColumnShape {
    fn from_decltype(decltype: Option<&str>) -> Self {
        let Some(decltype) = decltype else {
            return ColumnShape::Plain;
        };
        let decltype = decltype.trim().to_ascii_uppercase();
        if decltype == "JSON" || decltype == "JSONB" || decltype.ends_with("[]") {
            ColumnShape::Json
        } else if decltype == "BOOLEAN" || decltype == "BOOL" {
            ColumnShape::Bool
        } else {
            ColumnShape::Plain
        }
    }
}

fn sql_to_json(value: ValueRef<'_>, shape: ColumnShape) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if shape == ColumnShape::Bool => Value::Bool(i != 0),
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(raw) => {
            let text = String::from_utf8_lossy(raw);
            if shape == ColumnShape::Json {
                if let Ok(nested) = serde_json::from_str::<Value>(&text) {
                    return nested;
                }
            }
            Value::String(text.into_owned())
        }
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

fn key_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn bind_values(rendered: &Rendered) -> Vec<(&str, SqlValue)> {
    rendered
        .bindings
        .iter()
        .map(|(name, value)| (name.as_str(), json_to_sql(value)))
        .collect()
}

fn query_rows(conn: &Connection, rendered: &Rendered) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(&rendered.sql)?;
    let columns: Vec<(String, ColumnShape)> = stmt
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), ColumnShape::from_decltype(c.decl_type())))
        .collect();
    let bound = bind_values(rendered);
    let params: Vec<(&str, &dyn ToSql)> = bound.iter().map(|(n, v)| (*n, v as &dyn ToSql)).collect();

    let mut rows = stmt.query(params.as_slice())?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut obj = Map::new();
        for (i, (name, shape)) in columns.iter().enumerate() {
            obj.insert(name.clone(), sql_to_json(row.get_ref(i)?, *shape));
        }
        out.push(obj);
    }
    Ok(out)
}

fn execute_rendered(conn: &Connection, rendered: &Rendered) -> Result<usize> {
    let bound = bind_values(rendered);
    let params: Vec<(&str, &dyn ToSql)> = bound.iter().map(|(n, v)| (*n, v as &dyn ToSql)).collect();
    Ok(conn.execute(&rendered.sql, params.as_slice())?)
}
