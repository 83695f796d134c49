#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Once;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use cm_collect::CollectStep;
use cm_source::{
    BlockRecord, EpochSample, MachineStatusCounts, MemorySource, NetworkRewardParameters,
    QueryContext, SourceAccessor, SourceError,
};
use rust_decimal::Decimal;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Initialize tracing once for integration tests.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer())
            .with(filter)
            .init();
    });
}

/// Generate a unique temporary DuckDB path for a test.
pub fn temp_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!("cm_{test_name}_{nanos}.duckdb"))
}

/// Build a valid config whose ops store is a test-scoped DuckDB file.
pub fn temp_config(test_name: &str) -> cm_config::MonitorConfig {
    let mut config = cm_config::MonitorConfig::default();
    config.stores.source_dsn = Some("postgres://reader@localhost/mining".to_string());
    config.stores.ops_dsn = Some(format!("duckdb://{}", temp_db_path(test_name).display()));
    config
}

/// Add a cluster with one active and one never-reporting machine, plus
/// epoch samples ten minutes apart ending at `now`.
pub fn with_cluster(
    source: MemorySource,
    cluster: &str,
    now: DateTime<Utc>,
    hash_counts: &[f64],
) -> MemorySource {
    let mut source = source
        .with_machine(cluster, Some(now - Duration::seconds(30)))
        .with_machine(cluster, None);

    let last = hash_counts.len() as i64 - 1;
    for (i, hash_count) in hash_counts.iter().enumerate() {
        let at = now - Duration::minutes(10 * (last - i as i64));
        source = source.with_epoch(cluster, EpochSample::new(at, *hash_count).with_reward(1.0));
    }
    source
}

/// One recent block: proof target 100 (aux 864), mean solution reward 0.001
pub fn with_network(source: MemorySource, now: DateTime<Utc>) -> MemorySource {
    source.with_block(BlockRecord {
        at: now - Duration::minutes(1),
        proof_target: Decimal::from(100),
        solution_rewards: vec![Decimal::from(1_000)],
    })
}

/// Wraps a source and fails one step for one cluster.
///
/// `CollectStep::ExpectedReward` is injected as a non-finite 24h power.
pub struct StepFailingSource<S> {
    pub inner: S,
    pub cluster: String,
    pub step: CollectStep,
}

impl<S> StepFailingSource<S> {
    pub fn new(inner: S, cluster: &str, step: CollectStep) -> Self {
        Self {
            inner,
            cluster: cluster.to_string(),
            step,
        }
    }

    fn check(&self, ctx: &QueryContext, step: CollectStep) -> Result<(), SourceError> {
        if ctx.cluster == self.cluster && self.step == step {
            return Err(SourceError::DecodeError(format!("injected failure at {step}")));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: SourceAccessor> SourceAccessor for StepFailingSource<S> {
    fn name(&self) -> &'static str {
        "step-failing"
    }

    async fn machine_counts(&self, ctx: &QueryContext) -> Result<MachineStatusCounts, SourceError> {
        self.check(ctx, CollectStep::MachineCounts)?;
        self.inner.machine_counts(ctx).await
    }

    async fn last_24h_power(&self, ctx: &QueryContext) -> Result<f64, SourceError> {
        self.check(ctx, CollectStep::Last24hPower)?;
        if ctx.cluster == self.cluster && self.step == CollectStep::ExpectedReward {
            return Ok(f64::NAN);
        }
        self.inner.last_24h_power(ctx).await
    }

    async fn last_epoch_power(&self, ctx: &QueryContext) -> Result<f64, SourceError> {
        self.check(ctx, CollectStep::LastEpochPower)?;
        self.inner.last_epoch_power(ctx).await
    }

    async fn yesterday_reward(&self, ctx: &QueryContext) -> Result<f64, SourceError> {
        self.check(ctx, CollectStep::YesterdayReward)?;
        self.inner.yesterday_reward(ctx).await
    }

    async fn today_reward(&self, ctx: &QueryContext) -> Result<f64, SourceError> {
        self.check(ctx, CollectStep::TodayReward)?;
        self.inner.today_reward(ctx).await
    }

    async fn network_parameters(
        &self,
        ctx: &QueryContext,
    ) -> Result<NetworkRewardParameters, SourceError> {
        self.check(ctx, CollectStep::NetworkParameters)?;
        self.inner.network_parameters(ctx).await
    }
}
