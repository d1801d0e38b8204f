//! The queue engine: producer and consumer operations over any [`DatabaseQueue`].
//!
//! ```rust
//! use snakeq::{JobRegistry, JobStatus, NewJob, SnakeClient, Target, queue::test::TestQueue};
//! use snakeq::registry::JobContext;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = JobRegistry::new().with_handler("math", "add", |ctx: JobContext| async move {
//!     let sum: i64 = ctx.arguments.iter().filter_map(|v| v.as_i64()).sum();
//!     Ok(json!(sum))
//! });
//! let client = SnakeClient::new(TestQueue::new(), registry);
//!
//! let id = client
//!     .enqueue(NewJob::new(Target::named("math", "add")).with_arguments(vec![json!(1), json!(2)]))
//!     .await?;
//!
//! let processed = client.process_batch(1, None, None).await?;
//! assert_eq!(processed[&id].status, JobStatus::Success);
//! assert_eq!(processed[&id].result, Some(json!(3)));
//! # Ok(())
//! # }
//! ```

use crate::{
    Result, SnakeError,
    job::{FailureReport, Job, JobId, JobStatus, NewJob, from_epoch},
    queue::DatabaseQueue,
    registry::{JobContext, JobOutput, JobRegistry, ResolvedTarget},
};
use chrono::Utc;
use serde_json::Value;
use std::{any::Any, collections::BTreeMap, time::Duration};
use tracing::{debug, warn};

/// Runs jobs stored in a [`DatabaseQueue`] with handlers from a [`JobRegistry`].
pub struct SnakeClient<Q: DatabaseQueue> {
    queue: Q,
    registry: JobRegistry,
}

impl<Q: DatabaseQueue> SnakeClient<Q> {
    pub fn new(queue: Q, registry: JobRegistry) -> Self {
        Self { queue, registry }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub async fn enqueue(&self, job: NewJob) -> Result<JobId> {
        let id = self.queue.enqueue(job).await?;
        debug!("Enqueued job {}", id);
        Ok(id)
    }

    /// Reserve up to `count` eligible jobs and run each of them to completion.
    ///
    /// Jobs run one after another in `(priority, id)` order. A job whose target cannot be
    /// decoded or resolved, or whose handler returns an error or panics, is stored as
    /// `Failure` and the batch moves on. Backend errors abort the batch; jobs already
    /// reserved stay `Reserved`/`Started` until [`reset_stuck`](Self::reset_stuck) reclaims them.
    pub async fn process_batch(
        &self,
        count: u32,
        max_priority: Option<i32>,
        queue_name: Option<&str>,
    ) -> Result<BTreeMap<JobId, Job>> {
        let jobs = self
            .queue
            .lock_and_fetch(count, max_priority, queue_name)
            .await?;

        let mut processed = BTreeMap::new();
        for job in jobs {
            if let Some(job) = self.process_job(job).await? {
                processed.insert(job.id, job);
            }
        }
        Ok(processed)
    }

    /// Run one reserved job. `None` when its row disappeared before it could be started.
    async fn process_job(&self, mut job: Job) -> Result<Option<Job>> {
        let started = self
            .queue
            .update_status(job.id, JobStatus::Started, None, None)
            .await?;
        if !started {
            warn!("Job {} was removed after reservation, skipping", job.id);
            return Ok(None);
        }
        job.status = JobStatus::Started;
        job.started_at.get_or_insert_with(now);
        debug!("Started job {} on queue {}", job.id, job.queue_name);

        let output = JobOutput::new();
        let outcome = match self.prepare(&job, output.clone()) {
            Ok((resolved, ctx)) => run_handler(resolved, ctx).await,
            Err(err) => Err(err),
        };

        let (status, result) = match outcome {
            Ok(value) => (JobStatus::Success, value),
            Err(err) => {
                warn!("Job {} failed: {}", job.id, err);
                (JobStatus::Failure, FailureReport::from_error(&err).to_value())
            }
        };
        let output = output.take();

        self.queue
            .update_status(job.id, status, Some(&result), output.as_deref())
            .await?;
        debug!("Job {} finished with status {}", job.id, status);

        // timestamps come from the store's clock; the local copy only covers a row that
        // was removed while the job ran
        if let Some(stored) = self.queue.get_job(job.id).await? {
            return Ok(Some(stored));
        }
        job.status = status;
        job.result = Some(result);
        if output.is_some() {
            job.output = output;
        }
        job.finished_at.get_or_insert_with(now);
        Ok(Some(job))
    }

    fn prepare(&self, job: &Job, output: JobOutput) -> Result<(ResolvedTarget, JobContext)> {
        let target = job.target()?;
        let resolved = self.registry.resolve(&target)?;
        let ctx = JobContext {
            job_id: job.id,
            queue_name: job.queue_name.clone(),
            arguments: job.arguments()?,
            system_arguments: job.system_arguments()?,
            env: resolved.env.clone(),
            output,
        };
        Ok((resolved, ctx))
    }

    pub async fn status(&self, job_id: JobId) -> Result<Option<JobStatus>> {
        self.queue.status(job_id).await
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        self.queue.get_job(job_id).await
    }

    /// Like [`get_job`](Self::get_job), but a missing job is an error.
    pub async fn require_job(&self, job_id: JobId) -> Result<Job> {
        self.queue
            .get_job(job_id)
            .await?
            .ok_or(SnakeError::JobNotFound { id: job_id })
    }

    pub async fn peek(
        &self,
        count: u32,
        max_priority: Option<i32>,
        queue_name: Option<&str>,
    ) -> Result<Vec<Job>> {
        self.queue.peek(count, max_priority, queue_name).await
    }

    /// Reserve jobs without running them, for consumers that execute jobs themselves.
    /// The caller owns the remaining transitions through [`DatabaseQueue::update_status`].
    pub async fn lock_and_fetch(
        &self,
        count: u32,
        max_priority: Option<i32>,
        queue_name: Option<&str>,
    ) -> Result<Vec<Job>> {
        self.queue
            .lock_and_fetch(count, max_priority, queue_name)
            .await
    }

    pub async fn remove(&self, job_id: JobId) -> Result<bool> {
        self.queue.remove(job_id).await
    }

    pub async fn clear(&self) -> Result<u64> {
        self.queue.clear().await
    }

    pub async fn count_with_status(&self, status: JobStatus) -> Result<u64> {
        self.queue.count_with_status(status).await
    }

    pub async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        self.queue.jobs_with_status(status).await
    }

    pub async fn reset_stuck(&self, period: Duration) -> Result<u64> {
        let reclaimed = self.queue.reset_stuck(period).await?;
        if reclaimed > 0 {
            tracing::info!("Moved {} stuck job(s) back to retry", reclaimed);
        }
        Ok(reclaimed)
    }
}

/// Handlers run on their own task so a panic fails the job instead of the consumer.
async fn run_handler(resolved: ResolvedTarget, ctx: JobContext) -> Result<Value> {
    // the handler is called inside the task; its synchronous prelude may panic too
    let handle = tokio::spawn(async move { (resolved.handler)(ctx).await });
    match handle.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(SnakeError::Invocation {
            message: err.to_string(),
        }),
        Err(join_err) if join_err.is_panic() => Err(SnakeError::Invocation {
            message: format!("handler panicked: {}", panic_message(join_err.into_panic())),
        }),
        Err(join_err) => Err(SnakeError::Invocation {
            message: join_err.to_string(),
        }),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn now() -> chrono::DateTime<Utc> {
    from_epoch(Utc::now().timestamp())
}
