//! The long-running consumer loop.
//!
//! [`SnakeClient::run_daemon`] processes one batch at a time until told to stop. Shutdown
//! goes through a `tokio::sync::mpsc` channel: the signal is checked before every batch and
//! raced against every idle sleep, so a job that has already started always runs to its end.
//!
//! ```rust,no_run
//! use snakeq::{DaemonConfig, JobRegistry, SnakeClient, queue::test::TestQueue};
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//!
//! # #[tokio::main]
//! # async fn main() -> snakeq::Result<()> {
//! let client = SnakeClient::new(TestQueue::new(), JobRegistry::new());
//! let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
//!
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     shutdown_tx.send(()).await.ok();
//! });
//!
//! let config = DaemonConfig::new().with_idle_sleep(Duration::from_secs(2));
//! client.run_daemon(config, shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

use crate::{Result, client::SnakeClient, config::WorkerConfig, queue::DatabaseQueue};
use std::time::Duration;
use tokio::{
    sync::mpsc::{self, error::TryRecvError},
    time::sleep,
};
use tracing::{debug, error, info};

/// How the daemon polls.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// Pause after a batch that found nothing to do, and after a backend error.
    pub idle_sleep: Duration,
    pub batch_size: u32,
    pub max_priority: Option<i32>,
    pub queue: Option<String>,
    /// When set, jobs stuck in flight for this long are reclaimed at idle boundaries.
    pub reclaim_after: Option<Duration>,
}

impl DaemonConfig {
    pub fn new() -> Self {
        Self {
            idle_sleep: Duration::from_secs(1),
            batch_size: 1,
            max_priority: None,
            queue: None,
            reclaim_after: None,
        }
    }

    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_priority(mut self, max_priority: i32) -> Self {
        self.max_priority = Some(max_priority);
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_reclaim_after(mut self, period: Duration) -> Self {
        self.reclaim_after = Some(period);
        self
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&WorkerConfig> for DaemonConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            idle_sleep: config.idle_sleep,
            batch_size: config.batch_size,
            max_priority: config.max_priority,
            queue: config.queue.clone(),
            reclaim_after: config.reclaim_after,
        }
    }
}

impl<Q: DatabaseQueue> SnakeClient<Q> {
    /// Process batches until a shutdown signal arrives or every sender is dropped.
    ///
    /// Backend errors are logged and followed by an idle sleep; they never end the loop.
    pub async fn run_daemon(
        &self,
        config: DaemonConfig,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        info!(
            "Daemon started (queue: {}, batch size: {})",
            config.queue.as_deref().unwrap_or("*"),
            config.batch_size
        );

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            let idle = match self
                .process_batch(
                    config.batch_size,
                    config.max_priority,
                    config.queue.as_deref(),
                )
                .await
            {
                Ok(processed) => {
                    debug!("Processed {} job(s)", processed.len());
                    processed.is_empty()
                }
                Err(e) => {
                    error!("Error processing batch: {}", e);
                    true
                }
            };

            if !idle {
                continue;
            }

            if let Some(period) = config.reclaim_after {
                if let Err(e) = self.reset_stuck(period).await {
                    error!("Error reclaiming stuck jobs: {}", e);
                }
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(config.idle_sleep) => {}
            }
        }

        info!("Daemon shutting down");
        Ok(())
    }
}
