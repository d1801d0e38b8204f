use anyhow::Result;
use clap::Args;
use snakeq::{DatabaseQueue, JobStatus};
use std::time::Duration;
use tracing::info;

use super::Client;
use crate::utils::display::{CountTable, JobTable};
use crate::utils::validation::{parse_duration, parse_status};

/// Selection filters shared by `peek` and `process`.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct SelectArgs {
    #[arg(short, long, default_value_t = 10, help = "Maximum number of jobs")]
    pub count: u32,
    #[arg(short = 'm', long, allow_negative_numbers = true, help = "Only jobs with priority <= this value")]
    pub max_priority: Option<i32>,
    #[arg(short = 'n', long, help = "Only jobs from this queue")]
    pub queue: Option<String>,
}

impl SelectArgs {
    pub async fn peek(&self, client: &Client, default_queue: Option<&str>) -> Result<()> {
        let jobs = client
            .peek(
                self.count,
                self.max_priority,
                self.queue.as_deref().or(default_queue),
            )
            .await?;

        if jobs.is_empty() {
            println!("No eligible jobs");
            return Ok(());
        }
        println!("{}", jobs.iter().collect::<JobTable>());
        Ok(())
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ListArgs {
    #[arg(short, long, value_parser = parse_status, help = "Status name or code")]
    pub status: JobStatus,
}

impl ListArgs {
    pub async fn execute(&self, client: &Client) -> Result<()> {
        let jobs = client.jobs_with_status(self.status).await?;
        if jobs.is_empty() {
            println!("No {} jobs", self.status);
            return Ok(());
        }
        println!("{}", jobs.iter().collect::<JobTable>());
        Ok(())
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct CountArgs {
    #[arg(short, long, value_parser = parse_status, help = "Status to count; all statuses when omitted")]
    pub status: Option<JobStatus>,
}

impl CountArgs {
    pub async fn execute(&self, client: &Client) -> Result<()> {
        match self.status {
            Some(status) => {
                println!("{}", client.count_with_status(status).await?);
            }
            None => {
                let mut table = CountTable::new();
                for status in JobStatus::ALL {
                    table.add_count_row(status, client.count_with_status(status).await?);
                }
                println!("{}", table);
            }
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ClearArgs {
    #[arg(short, long, help = "Confirm deleting every job")]
    pub yes: bool,
}

impl ClearArgs {
    pub async fn execute(&self, client: &Client) -> Result<()> {
        if !self.yes {
            anyhow::bail!("Refusing to delete every job without --yes");
        }
        let removed = client.clear().await?;
        info!("Cleared {} job(s)", removed);
        println!("🗑️  Removed {} job(s)", removed);
        Ok(())
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ResetStuckArgs {
    #[arg(long, value_parser = parse_duration, help = "Reclaim in-flight jobs created at least this long ago (e.g. 30m, 1h)")]
    pub older_than: Duration,
}

impl ResetStuckArgs {
    pub async fn execute(&self, client: &Client) -> Result<()> {
        let reclaimed = client.reset_stuck(self.older_than).await?;
        println!("🔄 Moved {} stuck job(s) to retry", reclaimed);
        Ok(())
    }
}

pub async fn init(client: &Client) -> Result<()> {
    client.queue().create_tables().await?;
    println!("✅ Table {} is ready", snakeq::queue::TABLE_NAME);
    Ok(())
}
