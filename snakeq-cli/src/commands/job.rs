use anyhow::Result;
use clap::Args;
use snakeq::{JobId, NewJob, Target};
use std::time::Duration;
use tracing::info;

use super::Client;
use crate::utils::display::{job_details, status_icon};
use crate::utils::validation::{parse_argument, parse_target, validate_queue_name};

#[derive(Args, Debug, Clone, PartialEq)]
pub struct EnqueueArgs {
    #[arg(value_parser = parse_target, help = "Target to run, as module::symbol")]
    pub target: Target,
    #[arg(short, long = "arg", help = "Positional argument (JSON, or a plain string); repeatable")]
    pub args: Vec<String>,
    #[arg(long = "system-arg", help = "System argument (JSON, or a plain string); repeatable")]
    pub system_args: Vec<String>,
    #[arg(short, long, default_value_t = snakeq::job::DEFAULT_PRIORITY, allow_negative_numbers = true, help = "Priority, lower runs first")]
    pub priority: i32,
    #[arg(short, long, help = "Seconds before the job becomes eligible")]
    pub delay: Option<u64>,
    #[arg(short = 'n', long, help = "Queue name")]
    pub queue: Option<String>,
}

impl EnqueueArgs {
    pub fn to_new_job(&self, default_queue: Option<&str>) -> Result<NewJob> {
        let mut job = NewJob::new(self.target.clone())
            .with_arguments(self.args.iter().map(|raw| parse_argument(raw)).collect())
            .with_system_arguments(self.system_args.iter().map(|raw| parse_argument(raw)).collect())
            .with_priority(self.priority);

        if let Some(delay) = self.delay {
            job = job.with_delay(Duration::from_secs(delay));
        }
        if let Some(queue) = self.queue.as_deref().or(default_queue) {
            validate_queue_name(queue)?;
            job = job.on_queue(queue);
        }
        Ok(job)
    }

    pub async fn execute(&self, client: &Client, default_queue: Option<&str>) -> Result<()> {
        let job = self.to_new_job(default_queue)?;
        let queue_name = job.queue_name.clone();
        let id = client.enqueue(job).await?;

        info!("Enqueued job {} on queue {}", id, queue_name);
        println!("✅ Enqueued job {} ({}) on queue '{}'", id, self.target, queue_name);
        Ok(())
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct JobIdArgs {
    #[arg(help = "Job ID")]
    pub job_id: JobId,
}

impl JobIdArgs {
    pub async fn status(&self, client: &Client) -> Result<()> {
        match client.status(self.job_id).await? {
            Some(status) => println!("{} {}", status_icon(status), status),
            None => anyhow::bail!("Job {} not found", self.job_id),
        }
        Ok(())
    }

    pub async fn show(&self, client: &Client) -> Result<()> {
        let job = client.require_job(self.job_id).await?;
        println!("{}", job_details(&job));
        Ok(())
    }

    pub async fn remove(&self, client: &Client) -> Result<()> {
        if client.remove(self.job_id).await? {
            println!("🗑️  Removed job {}", self.job_id);
            Ok(())
        } else {
            anyhow::bail!("Job {} not found", self.job_id)
        }
    }
}
