//! Recurring intake: one tokio task per enabled channel, one sweep per tick.
//!
//! Channels never share a task, so a slow or failing mailbox does not delay
//! the others. Shutdown is cooperative: a sweep in progress finishes before
//! its task exits.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::fleet::CompanySelector;
use crate::pipeline::reconciler::{ChannelSource, Reconciler};
use crate::pipeline::sweep::{ChannelReport, ingest_once};

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub interval: Duration,
    /// Companies whose channels run. Empty means every configured channel.
    pub companies: Vec<CompanySelector>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300), // 5 minutes
            companies: Vec::new(),
        }
    }
}

/// Owns the configured channel sources and drives their sweeps.
pub struct IntakeScheduler {
    reconciler: Arc<Reconciler>,
    sources: Vec<Arc<ChannelSource>>,
    config: ScheduleConfig,
}

impl IntakeScheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        sources: Vec<ChannelSource>,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            reconciler,
            sources: sources.into_iter().map(Arc::new).collect(),
            config,
        }
    }

    /// Sources whose company is enabled.
    pub fn enabled_sources(&self) -> Vec<Arc<ChannelSource>> {
        self.sources
            .iter()
            .filter(|source| {
                self.config.companies.is_empty()
                    || self
                        .config
                        .companies
                        .iter()
                        .any(|selector| selector.matches(&source.company))
            })
            .cloned()
            .collect()
    }

    /// Sweep every enabled channel once, concurrently.
    pub async fn run_once(&self) -> Vec<ChannelReport> {
        let sources = self.enabled_sources();
        join_all(
            sources
                .iter()
                .map(|source| ingest_once(&self.reconciler, source)),
        )
        .await
    }

    /// Spawn one recurring task per enabled channel. The first sweep runs
    /// immediately.
    pub fn start(&self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sources = self.enabled_sources();

        info!(
            channels = sources.len(),
            interval_secs = self.config.interval.as_secs(),
            "Intake scheduler started"
        );

        let tasks = sources
            .into_iter()
            .map(|source| {
                spawn_channel_task(
                    Arc::clone(&self.reconciler),
                    source,
                    self.config.interval,
                    shutdown_rx.clone(),
                )
            })
            .collect();

        SchedulerHandle { shutdown_tx, tasks }
    }
}

fn spawn_channel_task(
    reconciler: Arc<Reconciler>,
    source: Arc<ChannelSource>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    ingest_once(&reconciler, &source).await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(channel = %source.name, "Channel task stopped");
    })
}

/// Handle to the running channel tasks.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Ask every channel task to stop after its current sweep.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every channel task to exit.
    pub async fn join(self) {
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Channel task panicked");
            }
        }
        info!("Intake scheduler stopped");
    }
}
