//! Sequential polling scheduler
//!
//! One cycle fetches the cluster list and processes each cluster in order.
//! A cluster failure is throttled by one interval and the cycle moves on to
//! the next cluster; the failed cluster is not retried until the next cycle.
//! The same interval separates cycles.

use cm_store::RegistryAccessor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};

use crate::{CollectStep, MetricsAggregator, StepError};

// ============================================================================
// Configuration
// ============================================================================

/// Scheduler timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between cycles and after every failure
    pub interval: Duration,
}

impl SchedulerConfig {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    #[must_use]
    pub fn from_minutes(minutes: u64) -> Self {
        Self::new(Duration::from_secs(minutes.saturating_mul(60)))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_minutes(2)
    }
}

// ============================================================================
// Cycle summary
// ============================================================================

/// Outcome of one cycle over the cluster list
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    /// Whether the cluster list could be fetched
    pub fetch_ok: bool,
    pub clusters_seen: usize,
    pub clusters_succeeded: usize,
    pub clusters_failed: usize,
    /// Failed clusters with the step that failed
    pub failures: Vec<(String, CollectStep)>,
    /// Wall time of the cycle, including failure pauses
    pub duration: Duration,
}

impl CycleSummary {
    fn record_failure(&mut self, err: &StepError) {
        self.clusters_failed += 1;
        self.failures.push((err.cluster.clone(), err.step));
    }

    /// Whether every listed cluster was written
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.fetch_ok && self.clusters_failed == 0
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Drives the aggregator over every registered cluster
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<dyn RegistryAccessor>,
    aggregator: MetricsAggregator,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<dyn RegistryAccessor>,
        aggregator: MetricsAggregator,
    ) -> Self {
        Self {
            config,
            registry,
            aggregator,
        }
    }

    /// Poll forever. Each cycle is followed by one interval of sleep,
    /// including a cycle whose cluster fetch failed.
    pub async fn run(&self) {
        info!(
            registry = self.registry.name(),
            interval_secs = self.config.interval.as_secs(),
            "Scheduler started"
        );
        loop {
            self.tick().await;
        }
    }

    /// One cycle plus the pause that follows it
    pub async fn tick(&self) -> CycleSummary {
        let summary = self.run_cycle().await;
        sleep(self.config.interval).await;
        summary
    }

    /// Process every cluster once, without the trailing pause
    pub async fn run_cycle(&self) -> CycleSummary {
        let start = Instant::now();
        let mut summary = CycleSummary::default();

        let clusters = match self.registry.list_clusters().await {
            Ok(clusters) => clusters,
            Err(e) => {
                warn!(
                    registry = self.registry.name(),
                    error = %e,
                    "Failed to fetch cluster list, restarting cycle after interval"
                );
                summary.duration = start.elapsed();
                return summary;
            }
        };
        summary.fetch_ok = true;
        summary.clusters_seen = clusters.len();

        info!(cluster_count = clusters.len(), "Starting collection cycle");

        for cluster in &clusters {
            match self.process_cluster(cluster).await {
                Ok(()) => summary.clusters_succeeded += 1,
                Err(e) => {
                    warn!(
                        cluster = %e.cluster,
                        step = %e.step,
                        error = %e.error,
                        "Step failed, abandoning cluster"
                    );
                    summary.record_failure(&e);
                    sleep(self.config.interval).await;
                }
            }
        }

        summary.duration = start.elapsed();

        info!(
            clusters_succeeded = summary.clusters_succeeded,
            clusters_failed = summary.clusters_failed,
            duration_ms = summary.duration.as_millis(),
            "Collection cycle complete"
        );

        summary
    }

    /// Aggregate and persist one cluster
    #[instrument(skip(self))]
    async fn process_cluster(&self, cluster: &str) -> Result<(), StepError> {
        let snapshot = self.aggregator.aggregate_now(cluster).await?;

        self.registry
            .upsert_snapshot(&snapshot)
            .await
            .map_err(|e| StepError::new(CollectStep::Persist, cluster, e))?;

        debug!(
            expected_reward = %snapshot.expected_reward_text(),
            "Snapshot persisted"
        );
        Ok(())
    }
}
