//! Per-cluster metrics aggregation
//!
//! Runs the six source queries in a fixed order, derives the expected reward,
//! and assembles the snapshot. The first failure ends aggregation for the
//! cluster; nothing partial is returned.

use chrono::{DateTime, FixedOffset, Utc};
use cm_source::{QueryContext, SourceAccessor};
use cm_store::{ClusterStatsSnapshot, decimal_text};
use std::sync::Arc;
use tracing::debug;

use crate::{CollectError, CollectStep, StepError, reward};

/// Computes one cluster's snapshot from the source store
pub struct MetricsAggregator {
    source: Arc<dyn SourceAccessor>,
    reference_offset: FixedOffset,
}

impl MetricsAggregator {
    pub fn new(source: Arc<dyn SourceAccessor>, reference_offset: FixedOffset) -> Self {
        Self {
            source,
            reference_offset,
        }
    }

    /// Query context for `cluster` observed at `observed_at`
    #[must_use]
    pub fn context(&self, cluster: &str, observed_at: DateTime<Utc>) -> QueryContext {
        QueryContext::at(cluster, observed_at, self.reference_offset)
    }

    /// Aggregate `cluster` as observed now
    ///
    /// # Errors
    ///
    /// Returns the first [`StepError`] encountered.
    pub async fn aggregate_now(&self, cluster: &str) -> Result<ClusterStatsSnapshot, StepError> {
        self.aggregate(&self.context(cluster, Utc::now())).await
    }

    /// Run every step for the context cluster
    ///
    /// # Errors
    ///
    /// Returns the first [`StepError`] encountered; later steps are not run.
    pub async fn aggregate(&self, ctx: &QueryContext) -> Result<ClusterStatsSnapshot, StepError> {
        let cluster = ctx.cluster.as_str();

        let counts = self
            .source
            .machine_counts(ctx)
            .await
            .map_err(at_step(CollectStep::MachineCounts, cluster))?;
        debug!(
            cluster,
            total = counts.total,
            active = counts.active,
            inactive = counts.inactive,
            failed = counts.failed,
            invalid = counts.invalid,
            "Machine counts"
        );

        let last_24h_power = self
            .source
            .last_24h_power(ctx)
            .await
            .map_err(at_step(CollectStep::Last24hPower, cluster))?;
        debug!(cluster, last_24h_power, "Last 24h power");

        let last_epoch_power = self
            .source
            .last_epoch_power(ctx)
            .await
            .map_err(at_step(CollectStep::LastEpochPower, cluster))?;
        debug!(cluster, last_epoch_power, "Last epoch power");

        let yesterday_reward = self
            .source
            .yesterday_reward(ctx)
            .await
            .map_err(at_step(CollectStep::YesterdayReward, cluster))?;
        debug!(cluster, yesterday_reward, "Yesterday reward");

        let today_reward = self
            .source
            .today_reward(ctx)
            .await
            .map_err(at_step(CollectStep::TodayReward, cluster))?;
        debug!(cluster, today_reward, "Today reward");

        let network = self
            .source
            .network_parameters(ctx)
            .await
            .map_err(at_step(CollectStep::NetworkParameters, cluster))?;
        debug!(
            cluster,
            avg_reward = %network.avg_reward,
            avg_proof_target = %network.avg_proof_target,
            "Network parameters"
        );

        let expected_reward = reward::derive_expected_reward(
            network.avg_reward,
            network.avg_proof_target,
            last_24h_power,
        )
        .map_err(at_step(CollectStep::ExpectedReward, cluster))?;
        debug!(cluster, expected_reward = %decimal_text(expected_reward), "Expected reward");

        Ok(ClusterStatsSnapshot {
            cluster_name: ctx.cluster.clone(),
            total: counts.total,
            active: counts.active,
            inactive: counts.inactive,
            failed: counts.failed,
            invalid: counts.invalid,
            last_24h_power,
            last_epoch_power,
            yesterday_reward,
            today_reward,
            expected_reward,
        })
    }
}

fn at_step<E: Into<CollectError>>(
    step: CollectStep,
    cluster: &str,
) -> impl FnOnce(E) -> StepError + '_ {
    move |e| StepError::new(step, cluster, e)
}
