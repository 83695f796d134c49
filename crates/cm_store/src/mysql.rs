//! MySQL ops store
//!
//! Works against an existing ops database; no schema is created here.

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tracing::{info, instrument};

use crate::schema::{self, SNAPSHOT_COLUMNS, tables};
use crate::{ClusterStatsSnapshot, RegistryAccessor, StoreError};

/// [`RegistryAccessor`] over the MySQL ops database
pub struct MySqlRegistry {
    pool: MySqlPool,
}

impl MySqlRegistry {
    /// Connect with a single session and verify it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the DSN is not a MySQL URL or the connection
    /// cannot be established.
    #[instrument(skip(dsn))]
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        if !dsn.starts_with("mysql://") {
            return Err(StoreError::InvalidDsn("expected a mysql:// URL".to_string()));
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .test_before_acquire(true)
            .connect(dsn)
            .await?;

        info!("Ops database connected");
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

/// `INSERT ... ON DUPLICATE KEY UPDATE` overwriting every non-key column
fn upsert_sql() -> String {
    let updates = SNAPSHOT_COLUMNS
        .iter()
        .skip(1)
        .map(|col| format!("{col} = VALUES({col})"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
        tables::CLUSTER_STATS,
        schema::snapshot_column_list(),
        schema::snapshot_placeholders(),
        updates
    )
}

#[async_trait]
impl RegistryAccessor for MySqlRegistry {
    fn name(&self) -> &'static str {
        "mysql"
    }

    async fn list_clusters(&self) -> Result<Vec<String>, StoreError> {
        let names: Vec<String> =
            sqlx::query_scalar(&format!("SELECT cluster_name FROM {}", tables::CLUSTERS))
                .fetch_all(&self.pool)
                .await?;
        Ok(names)
    }

    async fn upsert_snapshot(&self, snapshot: &ClusterStatsSnapshot) -> Result<(), StoreError> {
        sqlx::query(&upsert_sql())
            .bind(&snapshot.cluster_name)
            .bind(snapshot.total)
            .bind(snapshot.active)
            .bind(snapshot.inactive)
            .bind(snapshot.failed)
            .bind(snapshot.invalid)
            .bind(snapshot.last_24h_power)
            .bind(snapshot.last_epoch_power)
            .bind(snapshot.yesterday_reward)
            .bind(snapshot.today_reward)
            .bind(snapshot.expected_reward_text())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
