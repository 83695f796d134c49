//! `cm_collect` - Cluster metrics collection for the cluster monitor
//!
//! This crate provides:
//! - [`MetricsAggregator`]: the six source queries plus the expected-reward
//!   derivation for one cluster
//! - [`reward`]: exact decimal reward math
//! - [`Scheduler`]: the sequential polling loop over every registered cluster
//!
//! # Collection principles
//!
//! 1. **Whole rows only**: a snapshot is written only when every step for the
//!    cluster succeeded
//! 2. **Abandon and advance**: a failed cluster waits for the next cycle; the
//!    rest of the cycle proceeds
//! 3. **One task**: clusters are processed strictly one after another

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod aggregator;
pub mod reward;
pub mod scheduler;

pub use aggregator::MetricsAggregator;
pub use scheduler::{CycleSummary, Scheduler, SchedulerConfig};

/// Collection errors
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("Source error: {0}")]
    Source(#[from] cm_source::SourceError),

    #[error("Store error: {0}")]
    Store(#[from] cm_store::StoreError),

    #[error("Decimal overflow computing {0}")]
    Overflow(&'static str),

    #[error("Power is not a finite number: {0}")]
    NonFinitePower(f64),
}

/// One unit of work in processing a cluster, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectStep {
    MachineCounts,
    Last24hPower,
    LastEpochPower,
    YesterdayReward,
    TodayReward,
    NetworkParameters,
    ExpectedReward,
    Persist,
}

impl CollectStep {
    /// Every step, in execution order
    pub const ALL: [Self; 8] = [
        Self::MachineCounts,
        Self::Last24hPower,
        Self::LastEpochPower,
        Self::YesterdayReward,
        Self::TodayReward,
        Self::NetworkParameters,
        Self::ExpectedReward,
        Self::Persist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MachineCounts => "machine_counts",
            Self::Last24hPower => "last_24h_power",
            Self::LastEpochPower => "last_epoch_power",
            Self::YesterdayReward => "yesterday_reward",
            Self::TodayReward => "today_reward",
            Self::NetworkParameters => "network_parameters",
            Self::ExpectedReward => "expected_reward",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for CollectStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed step, with the cluster it was running for
#[derive(Error, Debug)]
#[error("cluster {cluster}: step {step} failed: {error}")]
pub struct StepError {
    pub step: CollectStep,
    pub cluster: String,
    #[source]
    pub error: CollectError,
}

impl StepError {
    pub fn new(step: CollectStep, cluster: impl Into<String>, error: impl Into<CollectError>) -> Self {
        Self {
            step,
            cluster: cluster.into(),
            error: error.into(),
        }
    }
}
