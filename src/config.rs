use std::time::Duration;

use anyhow::Result;
use figment::{
    providers::{Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::scheduler::framework::{DEFAULT_MAX_CLUSTER_DECISION_COUNT, parallelizer::DEFAULT_NUM_WORKERS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub dev: bool,
    /// Workers the framework uses to fan plugin calls out across clusters.
    pub worker_count: usize,
    /// Worker tasks consuming the placement-key queue.
    pub scheduler_worker_count: usize,
    /// Cap on decisions recorded in a policy snapshot status.
    pub max_cluster_decision_count: usize,
    /// Upper bound on now minus last heartbeat for cluster eligibility.
    pub heartbeat_freshness_window_secs: u64,
    /// Base delay for requeueing a placement after a retryable failure.
    pub requeue_base_delay_ms: u64,
    /// Ceiling on the exponential requeue backoff.
    pub requeue_max_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dev: false,
            worker_count: DEFAULT_NUM_WORKERS,
            scheduler_worker_count: 4,
            max_cluster_decision_count: DEFAULT_MAX_CLUSTER_DECISION_COUNT,
            heartbeat_freshness_window_secs: 300,
            requeue_base_delay_ms: 100,
            requeue_max_delay_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn from_path(path: &str) -> Result<SchedulerConfig> {
        let config_str = std::fs::read_to_string(path)?;
        let config: SchedulerConfig =
            Figment::from(Serialized::defaults(SchedulerConfig::default()))
                .merge(Yaml::string(&config_str))
                .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(anyhow::anyhow!("worker_count must be at least 1"));
        }
        if self.scheduler_worker_count == 0 {
            return Err(anyhow::anyhow!("scheduler_worker_count must be at least 1"));
        }
        if self.max_cluster_decision_count == 0 {
            return Err(anyhow::anyhow!(
                "max_cluster_decision_count must be at least 1"
            ));
        }
        if self.heartbeat_freshness_window_secs == 0 {
            return Err(anyhow::anyhow!(
                "heartbeat_freshness_window_secs must be at least 1"
            ));
        }
        Ok(())
    }

    pub fn heartbeat_freshness_window(&self) -> Duration {
        Duration::from_secs(self.heartbeat_freshness_window_secs)
    }

    pub fn requeue_base_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_base_delay_ms)
    }

    pub fn requeue_max_delay(&self) -> Duration {
        Duration::from_secs(self.requeue_max_delay_secs)
    }
}
