use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::SchedulerConfig,
    scheduler::{
        framework::{plugin::Handle, Framework, FrameworkOptions},
        plugins::default_profile,
        queue::WorkQueue,
        watcher::ClusterWatcher,
        Scheduler,
    },
    store::memory::InMemoryStore,
};

/// Wires the store, the cluster watcher, and the scheduler workers together
/// and runs them until shutdown.
pub struct Service {
    pub config: SchedulerConfig,
    pub store: Arc<InMemoryStore>,
    pub queue: Arc<WorkQueue>,
    pub scheduler: Arc<Scheduler>,
    pub watcher: Arc<ClusterWatcher>,
    pub shutdown: CancellationToken,
}

impl Service {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(WorkQueue::new(
            config.requeue_base_delay(),
            config.requeue_max_delay(),
        ));

        let handle = Handle {
            store: store.clone(),
            heartbeat_freshness_window: config.heartbeat_freshness_window(),
        };
        let framework = Arc::new(Framework::new(
            default_profile(&handle),
            store.clone(),
            FrameworkOptions {
                num_workers: config.worker_count,
                max_cluster_decision_count: config.max_cluster_decision_count,
                heartbeat_freshness_window: config.heartbeat_freshness_window(),
            },
        ));

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            framework,
            queue.clone(),
            config.scheduler_worker_count,
        ));
        let watcher = Arc::new(ClusterWatcher::new(
            store.clone(),
            queue.clone(),
            config.heartbeat_freshness_window(),
        ));

        Ok(Self {
            config,
            store,
            queue,
            scheduler,
            watcher,
            shutdown: CancellationToken::new(),
        })
    }

    pub async fn start(&self) -> Result<()> {
        let watcher = self.watcher.clone();
        let watcher_token = self.shutdown.clone();
        let watcher_task = tokio::spawn(async move { watcher.run(watcher_token).await });

        let workers = self.scheduler.start(&self.shutdown);
        info!(
            workers = self.config.scheduler_worker_count,
            "placement scheduler started"
        );

        signal::ctrl_c().await?;
        info!("shutdown signal received");
        self.shutdown.cancel();
        self.queue.shut_down();

        watcher_task.await?;
        for worker in workers {
            worker.await?;
        }
        Ok(())
    }
}
