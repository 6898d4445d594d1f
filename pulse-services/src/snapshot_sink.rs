//! Snapshot history sink
//!
//! Append-only audit log of every snapshot and generated insight. The
//! pipeline spawns these writes and never awaits them, so a slow or broken
//! sink only ever costs a log line. SQLite calls run on the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pulse_core::{DerivedInsight, MarketSnapshot};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[async_trait]
pub trait SnapshotSink: Send + Sync {
    fn name(&self) -> &str;

    async fn save_snapshot(&self, snapshot: &MarketSnapshot) -> Result<(), SnapshotSinkError>;

    async fn save_insight(&self, insight: &DerivedInsight) -> Result<(), SnapshotSinkError>;
}

/// SQLite-backed snapshot history
pub struct SqliteSnapshotSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotSink {
    /// Open (or create) the database file and its tables
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, SnapshotSinkError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SnapshotSinkError::Io(format!("Failed to create database directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)?;
        let sink = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    pub fn new_in_memory() -> Result<Self, SnapshotSinkError> {
        let conn = Connection::open_in_memory()?;
        let sink = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    fn init_schema(&self) -> Result<(), SnapshotSinkError> {
        let conn = self.conn.lock().map_err(|_| SnapshotSinkError::LockError)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS market_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fetched_at TEXT NOT NULL,
                current_price TEXT NOT NULL,
                sentiment TEXT NOT NULL,
                buy_sell_ratio TEXT NOT NULL,
                total_volume TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_fetched_at
            ON market_snapshots(fetched_at);

            CREATE TABLE IF NOT EXISTS insight_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                generated_at TEXT NOT NULL,
                source TEXT NOT NULL,
                triggered_by TEXT,
                sentiment TEXT NOT NULL,
                confidence REAL NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_insights_generated_at
            ON insight_history(generated_at);
            "#,
        )?;

        Ok(())
    }

    pub fn insert_snapshot(&self, snapshot: &MarketSnapshot) -> Result<i64, SnapshotSinkError> {
        let conn = self.conn.lock().map_err(|_| SnapshotSinkError::LockError)?;
        write_snapshot(&conn, snapshot)
    }

    pub fn insert_insight(&self, insight: &DerivedInsight) -> Result<i64, SnapshotSinkError> {
        let conn = self.conn.lock().map_err(|_| SnapshotSinkError::LockError)?;
        write_insight(&conn, insight)
    }

    /// Run `f` against the connection on tokio's blocking pool
    async fn run_blocking<T, F>(&self, f: F) -> Result<T, SnapshotSinkError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, SnapshotSinkError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| SnapshotSinkError::LockError)?;
            f(&conn)
        })
        .await
        .map_err(|e| SnapshotSinkError::Task(e.to_string()))?
    }

    /// Most recently stored snapshot
    pub fn latest_snapshot(&self) -> Result<Option<MarketSnapshot>, SnapshotSinkError> {
        let conn = self.conn.lock().map_err(|_| SnapshotSinkError::LockError)?;

        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM market_snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|p| serde_json::from_str(&p))
            .transpose()
            .map_err(SnapshotSinkError::from)
    }

    /// Newest insights first
    pub fn recent_insights(&self, limit: usize) -> Result<Vec<DerivedInsight>, SnapshotSinkError> {
        let conn = self.conn.lock().map_err(|_| SnapshotSinkError::LockError)?;

        let mut stmt =
            conn.prepare("SELECT payload FROM insight_history ORDER BY id DESC LIMIT ?1")?;
        let payloads = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(SnapshotSinkError::from))
            .collect()
    }

    pub fn snapshot_count(&self) -> Result<usize, SnapshotSinkError> {
        let conn = self.conn.lock().map_err(|_| SnapshotSinkError::LockError)?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM market_snapshots", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

fn write_snapshot(conn: &Connection, snapshot: &MarketSnapshot) -> Result<i64, SnapshotSinkError> {
    let payload = serde_json::to_string(snapshot)?;

    conn.execute(
        r#"
        INSERT INTO market_snapshots
            (fetched_at, current_price, sentiment, buy_sell_ratio, total_volume, payload)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            snapshot.fetched_at().to_rfc3339(),
            snapshot.current_price.to_string(),
            snapshot.sentiment.to_string(),
            snapshot.buy_sell_ratio.to_string(),
            snapshot.total_volume().to_string(),
            payload,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

fn write_insight(conn: &Connection, insight: &DerivedInsight) -> Result<i64, SnapshotSinkError> {
    let payload = serde_json::to_string(insight)?;
    let source = serde_json::to_value(insight.source)?
        .as_str()
        .unwrap_or_default()
        .to_string();

    conn.execute(
        r#"
        INSERT INTO insight_history
            (generated_at, source, triggered_by, sentiment, confidence, payload)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            insight.generated_at.to_rfc3339(),
            source,
            insight.triggered_by,
            insight.sentiment.to_string(),
            insight.confidence,
            payload,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

#[async_trait]
impl SnapshotSink for SqliteSnapshotSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save_snapshot(&self, snapshot: &MarketSnapshot) -> Result<(), SnapshotSinkError> {
        let snapshot = snapshot.clone();
        self.run_blocking(move |conn| write_snapshot(conn, &snapshot))
            .await
            .map(|_| ())
    }

    async fn save_insight(&self, insight: &DerivedInsight) -> Result<(), SnapshotSinkError> {
        let insight = insight.clone();
        self.run_blocking(move |conn| write_insight(conn, &insight))
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for SqliteSnapshotSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSnapshotSink").finish()
    }
}

/// Snapshot sink errors
#[derive(Debug, Error)]
pub enum SnapshotSinkError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Failed to acquire lock")]
    LockError,

    #[error("Blocking task failed: {0}")]
    Task(String),
}
