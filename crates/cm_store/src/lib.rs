//! `cm_store` - Operations store for the cluster monitor
//!
//! This crate provides:
//! - The [`RegistryAccessor`] trait: cluster list and snapshot upsert
//! - [`DuckStore`], a `DuckDB` backend with schema migrations
//! - [`MySqlRegistry`], the MySQL backend for an existing ops database
//! - [`connect`], which picks a backend from the ops DSN

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub mod duck;
pub mod migrations;
pub mod mysql;
pub mod schema;

pub use duck::DuckStore;
pub use mysql::MySqlRegistry;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] duckdb::Error),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Invalid ops DSN: {0}")]
    InvalidDsn(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// The persisted per-cluster row; only ever replaced as a whole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatsSnapshot {
    pub cluster_name: String,
    pub total: u64,
    pub active: u64,
    pub inactive: u64,
    pub failed: u64,
    pub invalid: u64,
    pub last_24h_power: f64,
    pub last_epoch_power: f64,
    pub yesterday_reward: f64,
    pub today_reward: f64,
    pub expected_reward: Decimal,
}

impl ClusterStatsSnapshot {
    /// Exact decimal text written to the `expected_reward` column
    #[must_use]
    pub fn expected_reward_text(&self) -> String {
        decimal_text(self.expected_reward)
    }
}

/// Render a decimal without trailing fractional zeros (`2000.000` -> `2000`)
#[must_use]
pub fn decimal_text(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Read/write capability over the operational snapshot table
#[async_trait]
pub trait RegistryAccessor: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Cluster names, in the order the store returns them
    async fn list_clusters(&self) -> Result<Vec<String>, StoreError>;

    /// Insert or fully overwrite the snapshot row for its cluster
    async fn upsert_snapshot(&self, snapshot: &ClusterStatsSnapshot) -> Result<(), StoreError>;
}

/// Open the ops store named by `dsn`.
///
/// - `mysql://...` connects to MySQL
/// - `duckdb::memory:` opens an in-memory `DuckDB`
/// - `duckdb://<path>` or a bare path opens a `DuckDB` file
///
/// # Errors
///
/// Returns [`StoreError`] if the DSN scheme is unsupported or the store
/// cannot be opened.
pub async fn connect(dsn: &str) -> Result<Arc<dyn RegistryAccessor>, StoreError> {
    if dsn.starts_with("mysql://") {
        return Ok(Arc::new(MySqlRegistry::connect(dsn).await?));
    }
    if dsn == "duckdb::memory:" {
        return Ok(Arc::new(DuckStore::open_memory()?));
    }
    if let Some(path) = dsn.strip_prefix("duckdb://") {
        return Ok(Arc::new(DuckStore::open(Path::new(path))?));
    }
    if dsn.contains("://") {
        return Err(StoreError::InvalidDsn(
            "expected mysql://, duckdb:// or a file path".to_string(),
        ));
    }
    Ok(Arc::new(DuckStore::open(Path::new(dsn))?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(expected: Decimal) -> ClusterStatsSnapshot {
        ClusterStatsSnapshot {
            cluster_name: "c1".to_string(),
            total: 0,
            active: 0,
            inactive: 0,
            failed: 0,
            invalid: 0,
            last_24h_power: 0.0,
            last_epoch_power: 0.0,
            yesterday_reward: 0.0,
            today_reward: 0.0,
            expected_reward: expected,
        }
    }

    #[test]
    fn test_decimal_text_drops_trailing_zeros() {
        assert_eq!(decimal_text(Decimal::new(2_000_000, 3)), "2000");
        assert_eq!(decimal_text(Decimal::new(70_000, 1)), "7000");
        assert_eq!(decimal_text(Decimal::new(1_500, 3)), "1.5");
        assert_eq!(decimal_text(Decimal::ZERO), "0");
    }

    #[test]
    fn test_decimal_text_keeps_full_precision() {
        let value: Decimal = "0.1234567890123456789012345678".parse().unwrap();
        assert_eq!(decimal_text(value), "0.1234567890123456789012345678");
    }

    #[test]
    fn test_expected_reward_text() {
        let snap = snapshot(Decimal::new(12_340, 4));
        assert_eq!(snap.expected_reward_text(), "1.234");
    }

    #[test]
    fn test_snapshot_serializes_decimal_as_string() {
        let snap = snapshot(Decimal::new(7, 1));
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["expected_reward"], "0.7");
    }

    #[tokio::test]
    async fn test_connect_memory() {
        let store = connect("duckdb::memory:").await.unwrap();
        assert_eq!(store.name(), "duckdb");
        assert!(store.list_clusters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let result = connect("postgres://ops@localhost/ops").await;
        assert!(matches!(result, Err(StoreError::InvalidDsn(_))));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::MigrationError("boom".to_string());
        assert_eq!(err.to_string(), "Migration error: boom");
    }
}
