//! In-memory source store
//!
//! Holds fixture data with the same shape as the source schema and answers
//! every [`SourceAccessor`] query with the same semantics as [`PgSource`].
//!
//! [`PgSource`]: crate::PgSource

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::{
    EpochSample, MachineStatusCounts, NetworkRewardParameters, QueryContext, SourceAccessor,
    SourceError, calendar, power,
};

/// Source reward units per whole reward unit
const MICRO_PER_UNIT: i64 = 1_000_000;

/// A network block with its solution rewards (source micro units)
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub at: DateTime<Utc>,
    pub proof_target: Decimal,
    pub solution_rewards: Vec<Decimal>,
}

#[derive(Debug, Clone, Default)]
struct ClusterData {
    machines: Vec<Option<DateTime<Utc>>>,
    epochs: Vec<EpochSample>,
    daily_rewards: HashMap<NaiveDate, f64>,
}

/// Fixture-backed [`SourceAccessor`]
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    clusters: HashMap<String, ClusterData>,
    blocks: Vec<BlockRecord>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a machine with its last activity (`None` = never reported)
    #[must_use]
    pub fn with_machine(mut self, cluster: &str, last_activity: Option<DateTime<Utc>>) -> Self {
        self.cluster_mut(cluster).machines.push(last_activity);
        self
    }

    /// Add an epoch sample
    #[must_use]
    pub fn with_epoch(mut self, cluster: &str, sample: EpochSample) -> Self {
        self.cluster_mut(cluster).epochs.push(sample);
        self
    }

    /// Set the stored daily reward total for a reference day
    #[must_use]
    pub fn with_daily_reward(mut self, cluster: &str, date: NaiveDate, reward: f64) -> Self {
        self.cluster_mut(cluster).daily_rewards.insert(date, reward);
        self
    }

    /// Add a network block
    #[must_use]
    pub fn with_block(mut self, block: BlockRecord) -> Self {
        self.blocks.push(block);
        self
    }

    fn cluster_mut(&mut self, cluster: &str) -> &mut ClusterData {
        self.clusters.entry(cluster.to_string()).or_default()
    }

    fn cluster(&self, cluster: &str) -> Option<&ClusterData> {
        self.clusters.get(cluster)
    }

    fn epochs(&self, ctx: &QueryContext) -> &[EpochSample] {
        self.cluster(&ctx.cluster)
            .map(|c| c.epochs.as_slice())
            .unwrap_or_default()
    }

    fn recent_blocks<'a>(&'a self, ctx: &QueryContext) -> impl Iterator<Item = &'a BlockRecord> {
        let since = ctx.observed_at.timestamp() - 86_400;
        self.blocks.iter().filter(move |b| b.at.timestamp() > since)
    }
}

fn mean(values: impl IntoIterator<Item = Decimal>) -> Result<Decimal, SourceError> {
    let mut sum = Decimal::ZERO;
    let mut count = 0u32;
    for value in values {
        sum = sum
            .checked_add(value)
            .ok_or_else(|| SourceError::DecodeError("average overflow".to_string()))?;
        count += 1;
    }
    if count == 0 {
        return Ok(Decimal::ZERO);
    }
    sum.checked_div(Decimal::from(count))
        .ok_or_else(|| SourceError::DecodeError("average overflow".to_string()))
}

#[async_trait]
impl SourceAccessor for MemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn machine_counts(&self, ctx: &QueryContext) -> Result<MachineStatusCounts, SourceError> {
        let Some(cluster) = self.cluster(&ctx.cluster) else {
            return Ok(MachineStatusCounts::default());
        };
        Ok(MachineStatusCounts::tally(
            cluster.machines.iter().map(|m| m.map(|at| at.timestamp())),
            ctx.observed_at.timestamp(),
        ))
    }

    async fn last_24h_power(&self, ctx: &QueryContext) -> Result<f64, SourceError> {
        let since = ctx.day_ago();
        let window: Vec<EpochSample> = self
            .epochs(ctx)
            .iter()
            .filter(|s| s.at >= since)
            .copied()
            .collect();
        Ok(power::window_power(&window))
    }

    async fn last_epoch_power(&self, ctx: &QueryContext) -> Result<f64, SourceError> {
        Ok(power::latest_epoch_power(self.epochs(ctx)))
    }

    async fn yesterday_reward(&self, ctx: &QueryContext) -> Result<f64, SourceError> {
        let yesterday = calendar::previous_reference_date(ctx.observed_at, ctx.reference_offset);
        Ok(self
            .cluster(&ctx.cluster)
            .and_then(|c| c.daily_rewards.get(&yesterday))
            .copied()
            .unwrap_or(0.0))
    }

    async fn today_reward(&self, ctx: &QueryContext) -> Result<f64, SourceError> {
        let today = calendar::reference_date(ctx.observed_at, ctx.reference_offset);
        let (start, end) = calendar::day_bounds(today, ctx.reference_offset);
        Ok(self
            .epochs(ctx)
            .iter()
            .filter(|s| s.at >= start && s.at < end)
            .map(|s| s.reward)
            .sum())
    }

    async fn network_parameters(
        &self,
        ctx: &QueryContext,
    ) -> Result<NetworkRewardParameters, SourceError> {
        let avg_micro = mean(
            self.recent_blocks(ctx)
                .flat_map(|b| b.solution_rewards.iter().copied()),
        )?;
        let avg_proof_target = mean(self.recent_blocks(ctx).map(|b| b.proof_target))?;

        Ok(NetworkRewardParameters {
            avg_reward: avg_micro / Decimal::from(MICRO_PER_UNIT),
            avg_proof_target,
        })
    }
}
