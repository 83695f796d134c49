//! `cm_source` - Read access to the mining/fleet source store
//!
//! This crate provides:
//! - The [`SourceAccessor`] trait: everything the aggregator reads per cluster
//! - [`PgSource`], the PostgreSQL implementation
//! - [`MemorySource`], an in-memory implementation for tests and dry runs
//! - Pure power-rate math and reference-calendar helpers shared by both
//!
//! # Query contract
//!
//! 1. **Zero, not error**: a cluster with no machines, samples or reward rows
//!    yields zero for that metric
//! 2. **Context-relative windows**: every time window is derived from
//!    [`QueryContext::observed_at`], never from a store-side clock
//! 3. **Exact network averages**: network-wide averages are returned as
//!    [`Decimal`], never as binary floating point

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod calendar;
pub mod memory;
pub mod postgres;
pub mod power;

pub use memory::{BlockRecord, MemorySource};
pub use postgres::PgSource;

/// Source query errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Invalid source DSN: {0}")]
    InvalidDsn(String),

    #[error("Failed to decode value: {0}")]
    DecodeError(String),
}

/// Machines per cluster, bucketed by recency of last reported activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStatusCounts {
    pub total: u64,
    pub active: u64,
    pub inactive: u64,
    pub failed: u64,
    pub invalid: u64,
}

impl MachineStatusCounts {
    /// Reported within this many seconds counts as active
    pub const ACTIVE_WITHIN_SECS: i64 = 600;

    /// Reported within this many seconds (but not active) counts as inactive
    pub const INACTIVE_WITHIN_SECS: i64 = 86_400;

    /// Tally last-activity timestamps (Unix seconds, `None` = never reported)
    pub fn tally(last_activity: impl IntoIterator<Item = Option<i64>>, now_secs: i64) -> Self {
        let mut counts = Self::default();
        for last in last_activity {
            counts.total += 1;
            match last {
                None => counts.invalid += 1,
                Some(ts) if ts >= now_secs - Self::ACTIVE_WITHIN_SECS => counts.active += 1,
                Some(ts) if ts >= now_secs - Self::INACTIVE_WITHIN_SECS => counts.inactive += 1,
                Some(_) => counts.failed += 1,
            }
        }
        counts
    }

    /// Whether the buckets partition the population
    #[must_use]
    pub fn is_partition(&self) -> bool {
        self.active + self.inactive + self.failed + self.invalid == self.total
    }
}

/// One timestamped hash-count/reward observation for a cluster
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochSample {
    pub at: DateTime<Utc>,
    /// Hashes accumulated since the previous sample
    pub hash_count: f64,
    /// Reward credited for this epoch, in the source's native unit
    pub reward: f64,
}

impl EpochSample {
    pub fn new(at: DateTime<Utc>, hash_count: f64) -> Self {
        Self {
            at,
            hash_count,
            reward: 0.0,
        }
    }

    #[must_use]
    pub fn with_reward(mut self, reward: f64) -> Self {
        self.reward = reward;
        self
    }
}

/// 24-hour network-wide reward averages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRewardParameters {
    /// Mean reward per solution, in whole reward units
    pub avg_reward: Decimal,
    /// Mean block proof target
    pub avg_proof_target: Decimal,
}

/// Per-cluster query context, fixed once per cluster per cycle
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Cluster being queried
    pub cluster: String,

    /// Instant all windows are measured from
    pub observed_at: DateTime<Utc>,

    /// Offset that defines the reward calendar day
    pub reference_offset: FixedOffset,
}

impl QueryContext {
    /// Create a context observed at a fixed instant
    pub fn at(
        cluster: impl Into<String>,
        observed_at: DateTime<Utc>,
        reference_offset: FixedOffset,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            observed_at,
            reference_offset,
        }
    }

    /// Start of the trailing 24-hour window
    #[must_use]
    pub fn day_ago(&self) -> DateTime<Utc> {
        self.observed_at - chrono::Duration::hours(24)
    }
}

/// Read capability over fleet and reward data
///
/// Implementations must be usable from a single sequential task; calls are
/// awaited one at a time and never overlap.
#[async_trait]
pub trait SourceAccessor: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Machine counts for the context cluster, bucketed by last activity
    async fn machine_counts(&self, ctx: &QueryContext) -> Result<MachineStatusCounts, SourceError>;

    /// Average hash rate over the trailing 24 hours, in millions/sec
    async fn last_24h_power(&self, ctx: &QueryContext) -> Result<f64, SourceError>;

    /// Hash rate across the two most recent samples, in millions/sec
    async fn last_epoch_power(&self, ctx: &QueryContext) -> Result<f64, SourceError>;

    /// Stored daily reward total for the reference day before today
    async fn yesterday_reward(&self, ctx: &QueryContext) -> Result<f64, SourceError>;

    /// Sum of epoch rewards on the current reference day
    async fn today_reward(&self, ctx: &QueryContext) -> Result<f64, SourceError>;

    /// Network-wide 24-hour averages (not cluster-scoped)
    async fn network_parameters(
        &self,
        ctx: &QueryContext,
    ) -> Result<NetworkRewardParameters, SourceError>;
}
