//! `DuckDB` ops store
//!
//! A single connection behind a mutex; every statement is its own implicit
//! transaction.

use async_trait::async_trait;
use duckdb::Connection;
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, instrument};

use crate::schema::{self, tables};
use crate::{ClusterStatsSnapshot, RegistryAccessor, StoreError, migrations};

/// Raw snapshot row as `DuckDB` returns it
type SnapshotRow = (
    String,
    i64,
    i64,
    i64,
    i64,
    i64,
    f64,
    f64,
    f64,
    f64,
    String,
);

/// Main storage handle
pub struct DuckStore {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl DuckStore {
    /// Open or create database at path
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if directory creation, database opening, or
    /// migration execution fails.
    #[instrument]
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!(path = %path.display(), "Opening DuckDB ops store");

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_string_lossy().to_string(),
        };

        store.run_migrations()?;

        Ok(store)
    }

    /// Open in-memory database (for testing)
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if in-memory database setup or migrations fail.
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: ":memory:".to_string(),
        };

        store.run_migrations()?;

        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::QueryError("connection mutex poisoned".to_string()))
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        migrations::run_all(&conn)
    }

    #[must_use]
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Add a cluster to the registry table; existing names are left alone
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    pub fn register_cluster(&self, name: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (cluster_name) VALUES (?) ON CONFLICT DO NOTHING",
                tables::CLUSTERS
            ),
            duckdb::params![name],
        )?;
        Ok(())
    }

    /// Cluster names in registration order
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn cluster_names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT cluster_name FROM {} ORDER BY rowid",
            tables::CLUSTERS
        ))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Replace the snapshot row for its cluster
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a count does not fit the column or the write fails.
    pub fn write_snapshot(&self, snapshot: &ClusterStatsSnapshot) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                tables::CLUSTER_STATS,
                schema::snapshot_column_list(),
                schema::snapshot_placeholders()
            ),
            duckdb::params![
                snapshot.cluster_name,
                to_column(snapshot.total)?,
                to_column(snapshot.active)?,
                to_column(snapshot.inactive)?,
                to_column(snapshot.failed)?,
                to_column(snapshot.invalid)?,
                snapshot.last_24h_power,
                snapshot.last_epoch_power,
                snapshot.yesterday_reward,
                snapshot.today_reward,
                snapshot.expected_reward_text(),
            ],
        )?;
        Ok(())
    }

    /// Read back the stored snapshot for a cluster
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails or a stored value is malformed.
    pub fn get_snapshot(&self, cluster: &str) -> Result<Option<ClusterStatsSnapshot>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE cluster_name = ?",
            schema::snapshot_column_list(),
            tables::CLUSTER_STATS
        ))?;

        let mut rows = stmt.query_map(duckdb::params![cluster], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
            ))
        })?;

        match rows.next() {
            Some(row) => Ok(Some(snapshot_from_row(row?)?)),
            None => Ok(None),
        }
    }

    /// Number of stored snapshot rows
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn snapshot_count(&self) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let count = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", tables::CLUSTER_STATS),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn to_column(count: u64) -> Result<i64, StoreError> {
    i64::try_from(count)
        .map_err(|_| StoreError::QueryError(format!("count {count} exceeds BIGINT")))
}

fn from_column(value: i64, column: &str) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::QueryError(format!("negative {column} in stored snapshot")))
}

fn snapshot_from_row(row: SnapshotRow) -> Result<ClusterStatsSnapshot, StoreError> {
    let (
        cluster_name,
        total,
        active,
        inactive,
        failed,
        invalid,
        last_24h_power,
        last_epoch_power,
        yesterday_reward,
        today_reward,
        expected_reward,
    ) = row;

    let expected_reward = Decimal::from_str(&expected_reward).map_err(|e| {
        StoreError::QueryError(format!("malformed expected_reward '{expected_reward}': {e}"))
    })?;

    Ok(ClusterStatsSnapshot {
        cluster_name,
        total: from_column(total, "total")?,
        active: from_column(active, "active")?,
        inactive: from_column(inactive, "inactive")?,
        failed: from_column(failed, "failed")?,
        invalid: from_column(invalid, "invalid")?,
        last_24h_power,
        last_epoch_power,
        yesterday_reward,
        today_reward,
        expected_reward,
    })
}

#[async_trait]
impl RegistryAccessor for DuckStore {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    async fn list_clusters(&self) -> Result<Vec<String>, StoreError> {
        self.cluster_names()
    }

    async fn upsert_snapshot(&self, snapshot: &ClusterStatsSnapshot) -> Result<(), StoreError> {
        self.write_snapshot(snapshot)
    }
}
