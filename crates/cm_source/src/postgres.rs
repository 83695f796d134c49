//! PostgreSQL source store
//!
//! Machine counts, reward sums and network averages are aggregated in SQL.
//! Power rates fetch the raw samples and reduce them with [`crate::power`].

use async_trait::async_trait;
use chrono::DateTime;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};

use crate::{
    EpochSample, MachineStatusCounts, NetworkRewardParameters, QueryContext, SourceAccessor,
    SourceError, calendar, power,
};

/// Cluster-to-account membership, shared by every per-cluster query
const CLUSTER_ACCOUNTS: &str = "SELECT id FROM miner_account WHERE name = $1";

const MACHINE_COUNTS_SQL: &str = r"
    SELECT COUNT(m.id)::bigint AS total,
           COALESCE(SUM(CASE WHEN m.last_commit_solution >= $2 - 600 THEN 1 ELSE 0 END), 0)::bigint AS active,
           COALESCE(SUM(CASE WHEN m.last_commit_solution < $2 - 600
                              AND m.last_commit_solution >= $2 - 86400 THEN 1 ELSE 0 END), 0)::bigint AS inactive,
           COALESCE(SUM(CASE WHEN m.last_commit_solution < $2 - 86400 THEN 1 ELSE 0 END), 0)::bigint AS failed,
           COALESCE(SUM(CASE WHEN m.last_commit_solution IS NULL THEN 1 ELSE 0 END), 0)::bigint AS invalid
    FROM machine m
    JOIN miner_account ma ON m.miner_account_id = ma.id
    WHERE ma.name = $1
";

const AVG_SOLUTION_REWARD_SQL: &str = r"
    SELECT ROUND(COALESCE(AVG(s.reward) / 1000000::numeric, 0), 18)
    FROM solution s
    JOIN block b ON b.height = s.height
    WHERE b.timestamp > $1
";

const AVG_PROOF_TARGET_SQL: &str = r"
    SELECT ROUND(COALESCE(AVG(b.proof_target)::numeric, 0), 6)
    FROM block b
    WHERE b.timestamp > $1
";

/// [`SourceAccessor`] over the mining database
pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    /// Connect with a single session and verify it.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the DSN is not a PostgreSQL URL or the
    /// connection cannot be established.
    #[instrument(skip(dsn))]
    pub async fn connect(dsn: &str) -> Result<Self, SourceError> {
        if !(dsn.starts_with("postgres://") || dsn.starts_with("postgresql://")) {
            return Err(SourceError::InvalidDsn(
                "expected a postgres:// or postgresql:// URL".to_string(),
            ));
        }

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .test_before_acquire(true)
            .connect(dsn)
            .await?;

        info!("Source database connected");
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Epoch samples for the cluster, optionally since an instant, newest first
    async fn epoch_samples(
        &self,
        cluster: &str,
        since: Option<DateTime<chrono::Utc>>,
        limit: Option<i64>,
    ) -> Result<Vec<EpochSample>, SourceError> {
        let sql = format!(
            "SELECT (EXTRACT(EPOCH FROM epoch_time) * 1000)::bigint AS epoch_ms, \
                    COALESCE(hash_count, 0)::float8 AS hash_count, \
                    COALESCE(reward, 0)::float8 AS reward \
             FROM epoch_distributor \
             WHERE miner_account_id IN ({CLUSTER_ACCOUNTS}) \
               AND ($2::timestamptz IS NULL OR epoch_time >= $2) \
             ORDER BY epoch_time DESC \
             LIMIT $3"
        );

        let rows: Vec<(i64, f64, f64)> = sqlx::query_as(&sql)
            .bind(cluster)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(epoch_ms, hash_count, reward)| {
                let at = DateTime::from_timestamp_millis(epoch_ms).ok_or_else(|| {
                    SourceError::DecodeError(format!("epoch_time out of range: {epoch_ms}ms"))
                })?;
                Ok(EpochSample {
                    at,
                    hash_count,
                    reward,
                })
            })
            .collect()
    }
}

fn to_count(value: i64, column: &str) -> Result<u64, SourceError> {
    u64::try_from(value)
        .map_err(|_| SourceError::DecodeError(format!("negative {column} count: {value}")))
}

#[async_trait]
impl SourceAccessor for PgSource {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn machine_counts(&self, ctx: &QueryContext) -> Result<MachineStatusCounts, SourceError> {
        let (total, active, inactive, failed, invalid): (i64, i64, i64, i64, i64) =
            sqlx::query_as(MACHINE_COUNTS_SQL)
                .bind(&ctx.cluster)
                .bind(ctx.observed_at.timestamp())
                .fetch_one(&self.pool)
                .await?;

        Ok(MachineStatusCounts {
            total: to_count(total, "total")?,
            active: to_count(active, "active")?,
            inactive: to_count(inactive, "inactive")?,
            failed: to_count(failed, "failed")?,
            invalid: to_count(invalid, "invalid")?,
        })
    }

    async fn last_24h_power(&self, ctx: &QueryContext) -> Result<f64, SourceError> {
        let samples = self
            .epoch_samples(&ctx.cluster, Some(ctx.day_ago()), None)
            .await?;
        Ok(power::window_power(&samples))
    }

    async fn last_epoch_power(&self, ctx: &QueryContext) -> Result<f64, SourceError> {
        let samples = self.epoch_samples(&ctx.cluster, None, Some(2)).await?;
        Ok(power::latest_epoch_power(&samples))
    }

    async fn yesterday_reward(&self, ctx: &QueryContext) -> Result<f64, SourceError> {
        let yesterday = calendar::previous_reference_date(ctx.observed_at, ctx.reference_offset);
        let sql = format!(
            "SELECT COALESCE(SUM(reward), 0)::float8 \
             FROM distributor \
             WHERE miner_account_id IN ({CLUSTER_ACCOUNTS}) \
               AND distributor_date = $2"
        );

        let reward: f64 = sqlx::query_scalar(&sql)
            .bind(&ctx.cluster)
            .bind(yesterday)
            .fetch_one(&self.pool)
            .await?;
        Ok(reward)
    }

    async fn today_reward(&self, ctx: &QueryContext) -> Result<f64, SourceError> {
        let today = calendar::reference_date(ctx.observed_at, ctx.reference_offset);
        let (start, end) = calendar::day_bounds(today, ctx.reference_offset);
        let sql = format!(
            "SELECT COALESCE(SUM(reward), 0)::float8 \
             FROM epoch_distributor \
             WHERE miner_account_id IN ({CLUSTER_ACCOUNTS}) \
               AND epoch_time >= $2 AND epoch_time < $3"
        );

        let reward: f64 = sqlx::query_scalar(&sql)
            .bind(&ctx.cluster)
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool)
            .await?;
        Ok(reward)
    }

    async fn network_parameters(
        &self,
        ctx: &QueryContext,
    ) -> Result<NetworkRewardParameters, SourceError> {
        let since = ctx.observed_at.timestamp() - 86_400;

        let avg_reward: Decimal = sqlx::query_scalar(AVG_SOLUTION_REWARD_SQL)
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        let avg_proof_target: Decimal = sqlx::query_scalar(AVG_PROOF_TARGET_SQL)
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        Ok(NetworkRewardParameters {
            avg_reward,
            avg_proof_target,
        })
    }
}
