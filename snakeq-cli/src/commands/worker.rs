use anyhow::Result;
use clap::Args;
use snakeq::{DaemonConfig, config::WorkerConfig};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::Client;
use crate::utils::display::JobTable;
use crate::utils::validation::parse_duration;

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ProcessArgs {
    #[arg(short, long, default_value_t = 1, help = "Maximum number of jobs to run")]
    pub count: u32,
    #[arg(short = 'm', long, allow_negative_numbers = true, help = "Only jobs with priority <= this value")]
    pub max_priority: Option<i32>,
    #[arg(short = 'n', long, help = "Only jobs from this queue")]
    pub queue: Option<String>,
}

impl ProcessArgs {
    pub async fn execute(&self, client: &Client, worker: &WorkerConfig) -> Result<()> {
        let processed = client
            .process_batch(
                self.count,
                self.max_priority.or(worker.max_priority),
                self.queue.as_deref().or(worker.queue.as_deref()),
            )
            .await?;

        if processed.is_empty() {
            println!("No eligible jobs");
            return Ok(());
        }

        let failed = processed.values().filter(|job| job.is_failed()).count();
        println!("{}", processed.values().collect::<JobTable>());
        println!(
            "Processed {} job(s), {} failed",
            processed.len(),
            failed
        );
        Ok(())
    }
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct DaemonArgs {
    #[arg(short = 'b', long, help = "Jobs reserved per batch")]
    pub batch_size: Option<u32>,
    #[arg(short = 's', long, value_parser = parse_duration, help = "Sleep when the queue is empty (e.g. 500, 2s)")]
    pub idle_sleep: Option<Duration>,
    #[arg(short = 'm', long, allow_negative_numbers = true, help = "Only jobs with priority <= this value")]
    pub max_priority: Option<i32>,
    #[arg(short = 'n', long, help = "Only jobs from this queue")]
    pub queue: Option<String>,
    #[arg(long, value_parser = parse_duration, help = "Reclaim jobs stuck in flight this long (e.g. 1h)")]
    pub reclaim_after: Option<Duration>,
}

impl DaemonArgs {
    /// Command line flags override the `[worker]` configuration.
    pub fn daemon_config(&self, worker: &WorkerConfig) -> DaemonConfig {
        let mut config = DaemonConfig::from(worker);
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(idle_sleep) = self.idle_sleep {
            config.idle_sleep = idle_sleep;
        }
        if self.max_priority.is_some() {
            config.max_priority = self.max_priority;
        }
        if self.queue.is_some() {
            config.queue = self.queue.clone();
        }
        if self.reclaim_after.is_some() {
            config.reclaim_after = self.reclaim_after;
        }
        config
    }

    pub async fn execute(&self, client: &Client, worker: &WorkerConfig) -> Result<()> {
        let config = self.daemon_config(worker);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received interrupt, finishing current job"),
                Err(e) => warn!("Failed to listen for interrupt: {}", e),
            }
            shutdown_tx.send(()).await.ok();
        });

        client.run_daemon(config, shutdown_rx).await?;
        Ok(())
    }
}
