//! Vector database abstraction and the SQLite + sqlite-vec backend.
//!
//! Each memory table is an ordinary SQLite table whose `embedding` column holds
//! a float32 blob. Ranking uses sqlite-vec's scalar functions, so a table can
//! hold vectors of more than one width; a search only considers rows with the
//! query's width.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Once};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};

use super::schema::{TableSchema, VECTOR_COLUMN};

/// A scalar column value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            FieldValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// Named column values of one row.
pub type Fields = BTreeMap<String, FieldValue>;

/// A row to insert.
#[derive(Debug, Clone)]
pub struct Row {
    pub vector: Vec<f32>,
    pub fields: Fields,
}

impl Row {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            fields: Fields::new(),
        }
    }

    pub fn field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }
}

/// A nearest-neighbour match.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub fields: Fields,
    /// L2 distance to the query vector (lower is closer).
    pub distance: f32,
}

/// Row selection for [`VectorDatabase::query`].
#[derive(Debug, Clone)]
pub enum RowFilter {
    All,
    Eq(String, FieldValue),
    AnyOf(String, Vec<FieldValue>),
}

/// Storage operations the memory store needs from a vector database.
#[async_trait]
pub trait VectorDatabase: Send + Sync {
    /// Names of all memory tables.
    async fn table_names(&self) -> Result<Vec<String>>;

    async fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.table_names().await?.iter().any(|t| t == name))
    }

    /// Create an empty table. Fails if the table already exists.
    async fn create_empty_table(&self, name: &str, schema: &TableSchema) -> Result<()>;

    /// Drop a table. Dropping a missing table is not an error.
    async fn drop_table(&self, name: &str) -> Result<()>;

    async fn add(&self, table: &str, rows: Vec<Row>) -> Result<()>;

    /// The `limit` nearest rows to `vector`, closest first. Rows whose vector
    /// width differs from `vector.len()` are never returned.
    async fn search(&self, table: &str, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>>;

    /// Rows matching `filter`, without vectors.
    async fn query(&self, table: &str, filter: RowFilter) -> Result<Vec<Fields>>;
}

static REGISTER_SQLITE_VEC: Once = Once::new();

/// Register sqlite-vec as an auto extension for every new connection.
fn register_sqlite_vec() {
    REGISTER_SQLITE_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(
                *mut rusqlite::ffi::sqlite3,
                *mut *mut std::os::raw::c_char,
                *const rusqlite::ffi::sqlite3_api_routines,
            ) -> std::os::raw::c_int,
        >(
            sqlite_vec::sqlite3_vec_init as *const ()
        )));
    });
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn vector_json(vector: &[f32]) -> Result<String> {
    serde_json::to_string(vector).context("Failed to encode vector")
}

fn read_fields(row: &rusqlite::Row<'_>, names: &[String]) -> rusqlite::Result<Fields> {
    let mut fields = Fields::new();
    for (i, name) in names.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => FieldValue::Null,
            ValueRef::Integer(v) => FieldValue::Integer(v),
            ValueRef::Real(v) => FieldValue::Real(v),
            ValueRef::Text(v) => FieldValue::Text(String::from_utf8_lossy(v).into_owned()),
            // Raw vectors are never surfaced
            ValueRef::Blob(_) => continue,
        };
        fields.insert(name.clone(), value);
    }
    Ok(fields)
}

/// [`VectorDatabase`] backed by a single SQLite connection with sqlite-vec.
pub struct SqliteVecDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVecDatabase {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self> {
        register_sqlite_vec();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open vector database at {:?}", path))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        register_sqlite_vec();
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let version: String = conn
            .query_row("SELECT vec_version()", [], |row| row.get(0))
            .context("sqlite-vec extension is not available")?;
        tracing::debug!("Opened vector database (sqlite-vec {})", version);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .context("Database task failed")?
    }
}

#[async_trait]
impl VectorDatabase for SqliteVecDatabase {
    async fn table_names(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
                 ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
        .await
        .context("Failed to list tables")
    }

    async fn create_empty_table(&self, name: &str, schema: &TableSchema) -> Result<()> {
        let sql = format!(
            "CREATE TABLE {} ({})",
            quote_ident(name),
            schema.column_definitions()
        );
        let table = name.to_string();
        self.with_conn(move |conn| {
            conn.execute(&sql, [])
                .with_context(|| format!("Failed to create table '{}'", table))?;
            Ok(())
        })
        .await?;
        tracing::debug!(table = %name, dimension = schema.dimension, "Created vector table");
        Ok(())
    }

    async fn drop_table(&self, name: &str) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(name));
        let table = name.to_string();
        self.with_conn(move |conn| {
            conn.execute(&sql, [])
                .with_context(|| format!("Failed to drop table '{}'", table))?;
            Ok(())
        })
        .await?;
        tracing::debug!(table = %name, "Dropped vector table");
        Ok(())
    }

    async fn add(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let table = table.to_string();
        let count = rows.len();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for row in &rows {
                let mut columns = vec![quote_ident(VECTOR_COLUMN)];
                let mut values: Vec<FieldValue> = vec![FieldValue::Text(vector_json(&row.vector)?)];
                for (name, value) in &row.fields {
                    columns.push(quote_ident(name));
                    values.push(value.clone());
                }
                let placeholders = std::iter::once("vec_f32(?1)".to_string())
                    .chain((2..=values.len()).map(|i| format!("?{}", i)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "INSERT INTO {}({}) VALUES ({})",
                    quote_ident(&table),
                    columns.join(", "),
                    placeholders
                );
                tx.execute(&sql, params_from_iter(values.iter()))
                    .with_context(|| format!("Failed to insert into '{}'", table))?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;
        tracing::debug!("Inserted {} rows", count);
        Ok(())
    }

    async fn search(&self, table: &str, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let column = quote_ident(VECTOR_COLUMN);
        let sql = format!(
            "SELECT *, vec_distance_l2({col}, vec_f32(?1)) AS distance FROM {table} \
             WHERE vec_length({col}) = ?2 ORDER BY distance LIMIT ?3",
            col = column,
            table = quote_ident(table)
        );
        let query = vector_json(vector)?;
        let width = vector.len() as i64;
        let k = limit as i64;
        let table = table.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .with_context(|| format!("Failed to prepare search on '{}'", table))?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let hits = stmt
                .query_map(rusqlite::params![query, width, k], |row| read_fields(row, &names))?
                .collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .map(|mut fields| {
                    let distance = match fields.remove("distance") {
                        Some(FieldValue::Real(d)) => d as f32,
                        Some(FieldValue::Integer(d)) => d as f32,
                        _ => f32::MAX,
                    };
                    SearchHit { fields, distance }
                })
                .collect();
            Ok(hits)
        })
        .await
    }

    async fn query(&self, table: &str, filter: RowFilter) -> Result<Vec<Fields>> {
        let (clause, params) = match filter {
            RowFilter::All => (String::new(), Vec::new()),
            RowFilter::Eq(column, value) => {
                (format!(" WHERE {} = ?1", quote_ident(&column)), vec![value])
            }
            RowFilter::AnyOf(_, values) if values.is_empty() => return Ok(Vec::new()),
            RowFilter::AnyOf(column, values) => {
                let placeholders = (1..=values.len())
                    .map(|i| format!("?{}", i))
                    .collect::<Vec<_>>()
                    .join(", ");
                (
                    format!(" WHERE {} IN ({})", quote_ident(&column), placeholders),
                    values,
                )
            }
        };
        let sql = format!("SELECT * FROM {}{}", quote_ident(table), clause);
        let table = table.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .with_context(|| format!("Failed to prepare query on '{}'", table))?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| read_fields(row, &names))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}
