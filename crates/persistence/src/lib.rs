#![deny(warnings)]

//! Append-only event recording: row builders, pluggable backends, and the
//! market-activity parquet export.
//!
//! The simulation core treats output as an opaque sink: it builds rows with
//! [`EventLog::new_event`] and never sees where they land. Rows buffer in
//! the log and flush to every registered backend once the dump count is
//! reached, on an explicit flush, and on close.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parquet::basic::{ConvertedType, Repetition, Type as PhysicalType};
use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::Type;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row as _, SqlitePool};
use tracing::{debug, info};

/// Number of rows buffered between flushes to backends, by default.
pub const DEFAULT_DUMP_COUNT: usize = 10_000;

/// A single cell value. The sink is schemaless; backends derive column
/// types from the first row of each table.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Double(f64),
    Text(String),
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Value {
        Value::UInt(v as u64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Value {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Text(v)
    }
}

/// One recorded row: a table name plus named values in insertion order.
#[derive(Clone, Debug)]
pub struct Row {
    pub table: String,
    pub vals: Vec<(String, Value)>,
}

impl Row {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vals.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Receives flushed rows. Backends are registered once and notified in
/// registration order.
pub trait EventBackend {
    fn notify(&mut self, rows: &[Row]) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects and buffers rows for all registered backends.
pub struct EventLog {
    buf: Vec<Row>,
    dump_count: usize,
    backends: Vec<Box<dyn EventBackend>>,
}

impl EventLog {
    pub fn new() -> EventLog {
        EventLog::with_dump_count(DEFAULT_DUMP_COUNT)
    }

    /// A dump count of zero flushes every row as it is recorded.
    pub fn with_dump_count(dump_count: usize) -> EventLog {
        EventLog {
            buf: Vec::new(),
            dump_count,
            backends: Vec::new(),
        }
    }

    pub fn register_backend(&mut self, backend: Box<dyn EventBackend>) {
        self.backends.push(backend);
    }

    /// Starts a new row in `table`.
    pub fn new_event(&mut self, table: &str) -> EventBuilder<'_> {
        EventBuilder {
            log: self,
            row: Row {
                table: table.to_string(),
                vals: Vec::new(),
            },
        }
    }

    fn record_row(&mut self, row: Row) -> Result<()> {
        self.buf.push(row);
        if self.buf.len() > self.dump_count {
            self.flush()?;
        }
        Ok(())
    }

    /// Pushes all buffered rows to every backend.
    pub fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        debug!(rows = self.buf.len(), "flushing event buffer");
        for backend in &mut self.backends {
            backend.notify(&self.buf)?;
        }
        self.buf.clear();
        Ok(())
    }

    /// Flushes remaining rows and closes every backend.
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        for backend in &mut self.backends {
            backend.close()?;
        }
        Ok(())
    }
}

impl Default for EventLog {
    fn default() -> Self {
        EventLog::new()
    }
}

/// Fluent row builder returned by [`EventLog::new_event`].
pub struct EventBuilder<'a> {
    log: &'a mut EventLog,
    row: Row,
}

impl EventBuilder<'_> {
    pub fn add_val(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.row.vals.push((name.to_string(), value.into()));
        self
    }

    pub fn record(self) -> Result<()> {
        self.log.record_row(self.row)
    }
}

/// Read handle onto the rows collected by a [`MemBackend`].
#[derive(Clone, Default)]
pub struct MemHandle {
    rows: Rc<RefCell<Vec<Row>>>,
}

impl MemHandle {
    /// All rows recorded so far, in order.
    pub fn rows(&self) -> Vec<Row> {
        self.rows.borrow().clone()
    }

    /// Rows recorded into `table`, in order.
    pub fn table(&self, table: &str) -> Vec<Row> {
        self.rows
            .borrow()
            .iter()
            .filter(|r| r.table == table)
            .cloned()
            .collect()
    }

    pub fn count(&self, table: &str) -> usize {
        self.rows.borrow().iter().filter(|r| r.table == table).count()
    }
}

/// In-memory backend; the default for tests and short headless runs.
pub struct MemBackend {
    handle: MemHandle,
}

impl MemBackend {
    pub fn new() -> (MemBackend, MemHandle) {
        let handle = MemHandle::default();
        (
            MemBackend {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl EventBackend for MemBackend {
    fn notify(&mut self, rows: &[Row]) -> Result<()> {
        self.handle.rows.borrow_mut().extend_from_slice(rows);
        Ok(())
    }
}

/// Durable backend over SQLite. Tables are created lazily from the shape
/// of the first row seen for each table name.
pub struct SqliteBackend {
    rt: tokio::runtime::Runtime,
    pool: SqlitePool,
    created: BTreeSet<String>,
}

impl SqliteBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SqliteBackend> {
        let opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        SqliteBackend::connect(opts)
    }

    pub fn in_memory() -> Result<SqliteBackend> {
        SqliteBackend::connect(SqliteConnectOptions::new().filename(":memory:"))
    }

    fn connect(opts: SqliteConnectOptions) -> Result<SqliteBackend> {
        // A current-thread runtime: the backend is driven synchronously
        // from the single-threaded simulation, one connection at a time.
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        // A single long-lived connection keeps in-memory databases
        // coherent across flushes.
        let pool = rt.block_on(
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .connect_with(opts),
        )?;
        Ok(SqliteBackend {
            rt,
            pool,
            created: BTreeSet::new(),
        })
    }

    fn sql_type(value: &Value) -> &'static str {
        match value {
            Value::Int(_) | Value::UInt(_) => "INTEGER",
            Value::Double(_) => "REAL",
            Value::Text(_) => "TEXT",
        }
    }

    fn ensure_table(&mut self, row: &Row) -> Result<()> {
        if self.created.contains(&row.table) {
            return Ok(());
        }
        let cols: Vec<String> = row
            .vals
            .iter()
            .map(|(name, v)| format!("\"{name}\" {}", SqliteBackend::sql_type(v)))
            .collect();
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            row.table,
            cols.join(", ")
        );
        self.rt
            .block_on(sqlx::query(&ddl).execute(&self.pool))?;
        self.created.insert(row.table.clone());
        Ok(())
    }

    /// Number of rows currently stored in `table`.
    pub fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS n FROM \"{table}\"");
        let row = self.rt.block_on(sqlx::query(&sql).fetch_one(&self.pool))?;
        Ok(row.try_get("n")?)
    }
}

impl EventBackend for SqliteBackend {
    fn notify(&mut self, rows: &[Row]) -> Result<()> {
        for row in rows {
            self.ensure_table(row)?;
        }
        let pool = self.pool.clone();
        self.rt.block_on(async move {
            let mut tx = pool.begin().await?;
            for row in rows {
                let cols: Vec<String> =
                    row.vals.iter().map(|(n, _)| format!("\"{n}\"")).collect();
                let marks: Vec<&str> = row.vals.iter().map(|_| "?").collect();
                let sql = format!(
                    "INSERT INTO \"{}\" ({}) VALUES ({})",
                    row.table,
                    cols.join(", "),
                    marks.join(", ")
                );
                let mut query = sqlx::query(&sql);
                for (_, v) in &row.vals {
                    query = match v {
                        Value::Int(i) => query.bind(*i),
                        Value::UInt(u) => query.bind(*u as i64),
                        Value::Double(d) => query.bind(*d),
                        Value::Text(t) => query.bind(t.clone()),
                    };
                }
                query.execute(&mut *tx).await?;
            }
            tx.commit().await?;
            Ok::<(), anyhow::Error>(())
        })?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.rt.block_on(self.pool.close());
        info!("sqlite backend closed");
        Ok(())
    }
}

/// One row of the scheduler's per-commodity supply/demand diagnostics.
#[derive(Clone, Debug)]
pub struct MarketActivityRow {
    pub commodity: String,
    pub time: i32,
    pub offered: f64,
    pub requested: f64,
}

/// Writes market activity diagnostics to a parquet file at `path`.
pub fn write_market_activity_parquet<P: AsRef<Path>>(
    path: P,
    rows: &[MarketActivityRow],
) -> Result<()> {
    let fields = vec![
        Type::primitive_type_builder("commodity", PhysicalType::BYTE_ARRAY)
            .with_converted_type(ConvertedType::UTF8)
            .with_repetition(Repetition::REQUIRED)
            .build()?,
        Type::primitive_type_builder("time", PhysicalType::INT32)
            .with_repetition(Repetition::REQUIRED)
            .build()?,
        Type::primitive_type_builder("offered", PhysicalType::DOUBLE)
            .with_repetition(Repetition::REQUIRED)
            .build()?,
        Type::primitive_type_builder("requested", PhysicalType::DOUBLE)
            .with_repetition(Repetition::REQUIRED)
            .build()?,
    ];
    let fields_ptrs: Vec<Arc<Type>> = fields.into_iter().map(Arc::new).collect();
    let schema = Type::group_type_builder("market_activity")
        .with_fields(fields_ptrs)
        .build()?;

    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let props = WriterProperties::builder().build();
    let mut writer = SerializedFileWriter::new(file, Arc::new(schema), Arc::new(props))?;

    let commodities: Vec<ByteArray> = rows
        .iter()
        .map(|r| ByteArray::from(r.commodity.as_str()))
        .collect();
    let times: Vec<i32> = rows.iter().map(|r| r.time).collect();
    let offered: Vec<f64> = rows.iter().map(|r| r.offered).collect();
    let requested: Vec<f64> = rows.iter().map(|r| r.requested).collect();

    let mut row_group = writer.next_row_group()?;
    {
        let mut col = row_group
            .next_column()?
            .ok_or_else(|| anyhow!("no column"))?;
        match col.untyped() {
            ColumnWriter::ByteArrayColumnWriter(w) => {
                let _ = w.write_batch(&commodities, None, None)?;
            }
            _ => return Err(anyhow!("unexpected column type for commodity")),
        }
        col.close()?;
    }
    {
        let mut col = row_group
            .next_column()?
            .ok_or_else(|| anyhow!("no column"))?;
        match col.untyped() {
            ColumnWriter::Int32ColumnWriter(w) => {
                let _ = w.write_batch(&times, None, None)?;
            }
            _ => return Err(anyhow!("unexpected column type for time")),
        }
        col.close()?;
    }
    {
        let mut col = row_group
            .next_column()?
            .ok_or_else(|| anyhow!("no column"))?;
        match col.untyped() {
            ColumnWriter::DoubleColumnWriter(w) => {
                let _ = w.write_batch(&offered, None, None)?;
            }
            _ => return Err(anyhow!("unexpected column type for offered")),
        }
        col.close()?;
    }
    {
        let mut col = row_group
            .next_column()?
            .ok_or_else(|| anyhow!("no column"))?;
        match col.untyped() {
            ColumnWriter::DoubleColumnWriter(w) => {
                let _ = w.write_batch(&requested, None, None)?;
            }
            _ => return Err(anyhow!("unexpected column type for requested")),
        }
        col.close()?;
    }
    row_group.close()?;
    writer.close()?;
    info!("market activity parquet written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_backend_sees_flushed_rows() {
        let (backend, handle) = MemBackend::new();
        let mut log = EventLog::with_dump_count(2);
        log.register_backend(Box::new(backend));

        log.new_event("Agents")
            .add_val("ID", 1u32)
            .add_val("Kind", "Facility")
            .record()
            .unwrap();
        // Below the dump count: nothing flushed yet.
        assert_eq!(handle.count("Agents"), 0);

        log.new_event("Agents").add_val("ID", 2u32).record().unwrap();
        log.new_event("Agents").add_val("ID", 3u32).record().unwrap();
        // Third record pushed the buffer past the dump count.
        assert_eq!(handle.count("Agents"), 3);

        log.new_event("AgentDeaths")
            .add_val("AgentID", 1u32)
            .add_val("DeathDate", 5i64)
            .record()
            .unwrap();
        log.close().unwrap();
        assert_eq!(handle.count("AgentDeaths"), 1);
        let death = &handle.table("AgentDeaths")[0];
        assert_eq!(death.get("DeathDate"), Some(&Value::Int(5)));
    }

    #[test]
    fn zero_dump_count_flushes_immediately() {
        let (backend, handle) = MemBackend::new();
        let mut log = EventLog::with_dump_count(0);
        log.register_backend(Box::new(backend));
        log.new_event("Resources").add_val("ID", 9u32).record().unwrap();
        assert_eq!(handle.count("Resources"), 1);
    }

    #[test]
    fn sqlite_backend_roundtrips_rows() {
        let mut backend = SqliteBackend::in_memory().unwrap();
        let rows = vec![
            Row {
                table: "Transactions".into(),
                vals: vec![
                    ("ID".into(), Value::UInt(1)),
                    ("Commodity".into(), Value::Text("fuel".into())),
                    ("Price".into(), Value::Double(1.5)),
                    ("Time".into(), Value::Int(0)),
                ],
            },
            Row {
                table: "Transactions".into(),
                vals: vec![
                    ("ID".into(), Value::UInt(2)),
                    ("Commodity".into(), Value::Text("fuel".into())),
                    ("Price".into(), Value::Double(1.5)),
                    ("Time".into(), Value::Int(1)),
                ],
            },
        ];
        backend.notify(&rows).unwrap();
        assert_eq!(backend.row_count("Transactions").unwrap(), 2);
        backend.close().unwrap();
    }

    #[test]
    fn parquet_export_writes_a_file() {
        let base = Path::new("target/tmp_market_activity");
        std::fs::create_dir_all(base).unwrap();
        let path = base.join("activity.parquet");
        let rows = vec![
            MarketActivityRow {
                commodity: "fuel".into(),
                time: 0,
                offered: 100.0,
                requested: 30.0,
            },
            MarketActivityRow {
                commodity: "fuel".into(),
                time: 1,
                offered: 170.0,
                requested: 30.0,
            },
        ];
        write_market_activity_parquet(&path, &rows).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.len() > 0);
    }
}
