//! In-memory test implementation of the job queue for testing purposes.
//!
//! This module provides a `TestQueue` that implements the `DatabaseQueue` trait
//! entirely in memory, making it ideal for unit tests and development without
//! requiring a database connection.
//!
//! - All operations are performed in-memory behind one async lock, so selection and
//!   reservation are atomic exactly like the SQL backends' transactions
//! - Time comes from a [`MockClock`], which makes delayed and stuck jobs testable
//!
//! # Examples
//!
//! ```rust
//! use snakeq::queue::test::TestQueue;
//! use snakeq::{JobStatus, NewJob, Target, queue::DatabaseQueue};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = TestQueue::new();
//!
//! let job_id = queue.enqueue(NewJob::new(Target::named("mailer", "send"))).await?;
//!
//! let reserved = queue.lock_and_fetch(1, None, None).await?;
//! assert_eq!(reserved[0].id, job_id);
//! assert_eq!(queue.status(job_id).await?, Some(JobStatus::Reserved));
//! # Ok(())
//! # }
//! ```

use crate::{
    Result,
    job::{Job, JobId, JobStatus, NewJob, from_epoch},
    queue::{DatabaseQueue, period_secs},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::RwLock;

/// Mock clock for controlling time in tests.
///
/// ```rust
/// use snakeq::queue::test::MockClock;
/// use chrono::Duration;
///
/// let clock = MockClock::new();
/// let initial_time = clock.now();
///
/// clock.advance(Duration::seconds(100));
///
/// assert_eq!((clock.now() - initial_time).num_seconds(), 100);
/// ```
#[derive(Clone, Debug)]
pub struct MockClock {
    current_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current time.
    pub fn new() -> Self {
        Self {
            current_time: Arc::new(Mutex::new(Utc::now())),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }

    pub fn advance(&self, duration: chrono::Duration) {
        *self.lock() += duration;
    }

    pub fn set_time(&self, time: DateTime<Utc>) {
        *self.lock() = time;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        self.current_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory storage for the test queue
#[derive(Debug, Default)]
struct TestStorage {
    /// All jobs by id; BTreeMap iteration gives FIFO order
    jobs: BTreeMap<JobId, Job>,
    /// Ids are never reused, even after `clear`
    last_id: JobId,
}

impl TestStorage {
    /// Eligible jobs in `(priority, id)` order.
    fn eligible(
        &self,
        now: DateTime<Utc>,
        count: u32,
        max_priority: Option<i32>,
        queue_name: Option<&str>,
    ) -> Vec<JobId> {
        let mut candidates: Vec<&Job> = self
            .jobs
            .values()
            .filter(|job| job.is_eligible_at(now))
            .filter(|job| max_priority.is_none_or(|max| job.priority <= max))
            .filter(|job| queue_name.is_none_or(|name| job.queue_name == name))
            .collect();

        candidates.sort_by_key(|job| (job.priority, job.id));
        candidates
            .into_iter()
            .take(count as usize)
            .map(|job| job.id)
            .collect()
    }
}

/// In-memory test implementation of the job queue.
///
/// `TestQueue` provides a complete implementation of the `DatabaseQueue` trait
/// that runs entirely in memory, making it perfect for unit testing your job
/// handlers and consumer logic without requiring a database connection.
///
/// ## Testing delayed jobs
///
/// ```rust
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use snakeq::queue::test::TestQueue;
/// use snakeq::{NewJob, Target, queue::DatabaseQueue};
/// use std::time::Duration;
///
/// let queue = TestQueue::new();
/// let clock = queue.clock();
///
/// let job = NewJob::new(Target::named("reports", "nightly")).with_delay(Duration::from_secs(100));
/// let job_id = queue.enqueue(job).await?;
///
/// assert!(queue.peek(1, None, None).await?.is_empty());
///
/// clock.advance(chrono::Duration::seconds(100));
///
/// assert_eq!(queue.peek(1, None, None).await?[0].id, job_id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TestQueue {
    storage: Arc<RwLock<TestStorage>>,
    clock: MockClock,
}

impl TestQueue {
    /// Create a new test queue with a fresh MockClock.
    pub fn new() -> Self {
        Self::with_clock(MockClock::new())
    }

    /// Create a new test queue sharing an existing clock.
    pub fn with_clock(clock: MockClock) -> Self {
        Self {
            storage: Arc::new(RwLock::new(TestStorage::default())),
            clock,
        }
    }

    pub fn clock(&self) -> MockClock {
        self.clock.clone()
    }

    /// Total number of stored jobs, whatever their status.
    pub async fn job_count(&self) -> usize {
        self.storage.read().await.jobs.len()
    }

    /// Store time has one-second resolution, like the SQL backends' epoch columns.
    fn now(&self) -> DateTime<Utc> {
        from_epoch(self.clock.now().timestamp())
    }
}

impl Default for TestQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseQueue for TestQueue {
    async fn create_tables(&self) -> Result<()> {
        Ok(())
    }

    async fn enqueue(&self, job: NewJob) -> Result<JobId> {
        let encoded = job.encode()?;
        let mut storage = self.storage.write().await;

        storage.last_id += 1;
        let id = storage.last_id;
        storage.jobs.insert(
            id,
            Job {
                id,
                target: encoded.target,
                arguments: encoded.arguments,
                system_arguments: encoded.system_arguments,
                priority: encoded.priority,
                queue_name: encoded.queue_name,
                delay: encoded.delay.map(i64::from),
                status: JobStatus::Pending,
                result: None,
                output: None,
                created_at: self.now(),
                started_at: None,
                finished_at: None,
            },
        );

        Ok(id)
    }

    async fn status(&self, job_id: JobId) -> Result<Option<JobStatus>> {
        let storage = self.storage.read().await;
        Ok(storage.jobs.get(&job_id).map(|job| job.status))
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let storage = self.storage.read().await;
        Ok(storage.jobs.get(&job_id).cloned())
    }

    async fn peek(
        &self,
        count: u32,
        max_priority: Option<i32>,
        queue_name: Option<&str>,
    ) -> Result<Vec<Job>> {
        let storage = self.storage.read().await;
        let ids = storage.eligible(self.now(), count, max_priority, queue_name);
        Ok(ids
            .iter()
            .filter_map(|id| storage.jobs.get(id).cloned())
            .collect())
    }

    async fn lock_and_fetch(
        &self,
        count: u32,
        max_priority: Option<i32>,
        queue_name: Option<&str>,
    ) -> Result<Vec<Job>> {
        let mut storage = self.storage.write().await;
        let ids = storage.eligible(self.now(), count, max_priority, queue_name);

        let mut reserved = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = storage.jobs.get_mut(&id) {
                job.status = JobStatus::Reserved;
                reserved.push(job.clone());
            }
        }
        Ok(reserved)
    }

    async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        result: Option<&Value>,
        output: Option<&str>,
    ) -> Result<bool> {
        let now = self.now();
        let mut storage = self.storage.write().await;
        let Some(job) = storage.jobs.get_mut(&job_id) else {
            return Ok(false);
        };

        job.status = status;
        if let Some(result) = result {
            job.result = Some(result.clone());
        }
        if let Some(output) = output {
            job.output = Some(output.to_string());
        }
        if status == JobStatus::Started {
            job.started_at.get_or_insert(now);
        } else if status.is_terminal() {
            job.finished_at.get_or_insert(now);
        }
        Ok(true)
    }

    async fn remove(&self, job_id: JobId) -> Result<bool> {
        let mut storage = self.storage.write().await;
        Ok(storage.jobs.remove(&job_id).is_some())
    }

    async fn clear(&self) -> Result<u64> {
        let mut storage = self.storage.write().await;
        let removed = storage.jobs.len() as u64;
        storage.jobs.clear();
        Ok(removed)
    }

    async fn count_with_status(&self, status: JobStatus) -> Result<u64> {
        let storage = self.storage.read().await;
        Ok(storage
            .jobs
            .values()
            .filter(|job| job.status == status)
            .count() as u64)
    }

    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let storage = self.storage.read().await;
        Ok(storage
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect())
    }

    async fn reset_stuck(&self, period: Duration) -> Result<u64> {
        // a period reaching before the earliest representable time reclaims nothing
        let Some(cutoff) = chrono::Duration::try_seconds(period_secs(period))
            .and_then(|period| self.now().checked_sub_signed(period))
        else {
            return Ok(0);
        };
        let mut storage = self.storage.write().await;

        let mut reclaimed = 0;
        for job in storage.jobs.values_mut() {
            if job.status.is_in_flight() && job.created_at <= cutoff {
                job.status = JobStatus::Retry;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Target;
    use serde_json::json;

    fn job(priority: i32) -> NewJob {
        NewJob::new(Target::named("tests", "noop")).with_priority(priority)
    }

    #[tokio::test]
    async fn test_basic_enqueue_and_reserve() {
        let queue = TestQueue::new();

        let job_id = queue.enqueue(job(1024)).await.unwrap();
        assert_eq!(queue.count_with_status(JobStatus::Pending).await.unwrap(), 1);

        let reserved = queue.lock_and_fetch(1, None, None).await.unwrap();
        assert_eq!(reserved.len(), 1);
        assert_eq!(reserved[0].id, job_id);
        assert_eq!(reserved[0].status, JobStatus::Reserved);

        assert_eq!(queue.count_with_status(JobStatus::Reserved).await.unwrap(), 1);
        assert_eq!(queue.count_with_status(JobStatus::Pending).await.unwrap(), 0);

        // reserved jobs are no longer eligible
        assert!(queue.lock_and_fetch(1, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ids_are_never_reused() {
        let queue = TestQueue::new();
        let first = queue.enqueue(job(1)).await.unwrap();
        queue.clear().await.unwrap();
        let second = queue.enqueue(job(1)).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_ordering_priority_then_fifo() {
        let queue = TestQueue::new();
        let a = queue.enqueue(job(10)).await.unwrap();
        let b = queue.enqueue(job(5)).await.unwrap();
        let c = queue.enqueue(job(10)).await.unwrap();
        let d = queue.enqueue(job(5)).await.unwrap();

        let ids: Vec<JobId> = queue
            .peek(10, None, None)
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(ids, vec![b, d, a, c]);
    }

    #[tokio::test]
    async fn test_filters() {
        let queue = TestQueue::new();
        let urgent = queue.enqueue(job(1).on_queue("critical")).await.unwrap();
        let _slow = queue.enqueue(job(2000).on_queue("critical")).await.unwrap();
        let other = queue.enqueue(job(1)).await.unwrap();

        let critical = queue.peek(10, None, Some("critical")).await.unwrap();
        assert_eq!(critical.len(), 2);

        let capped = queue.peek(10, Some(1024), None).await.unwrap();
        let ids: Vec<JobId> = capped.iter().map(|job| job.id).collect();
        assert_eq!(ids, vec![urgent, other]);

        let both = queue.peek(10, Some(1024), Some("critical")).await.unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].id, urgent);

        assert!(queue.peek(0, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_is_selectable() {
        let queue = TestQueue::new();
        let id = queue.enqueue(job(1)).await.unwrap();
        queue.lock_and_fetch(1, None, None).await.unwrap();
        queue
            .update_status(id, JobStatus::Retry, None, None)
            .await
            .unwrap();

        let reserved = queue.lock_and_fetch(1, None, None).await.unwrap();
        assert_eq!(reserved[0].id, id);
    }

    #[tokio::test]
    async fn test_update_status_timestamps_are_set_once() {
        let queue = TestQueue::new();
        let clock = queue.clock();
        let id = queue.enqueue(job(1)).await.unwrap();

        queue
            .update_status(id, JobStatus::Started, None, None)
            .await
            .unwrap();
        let started = queue.get_job(id).await.unwrap().unwrap().started_at;
        assert!(started.is_some());

        clock.advance(chrono::Duration::seconds(5));
        queue
            .update_status(id, JobStatus::Success, Some(&json!(1)), Some("out"))
            .await
            .unwrap();
        let finished = queue.get_job(id).await.unwrap().unwrap();
        assert_eq!(finished.started_at, started);
        assert_eq!(finished.output.as_deref(), Some("out"));
        assert_eq!(finished.result, Some(json!(1)));

        clock.advance(chrono::Duration::seconds(5));
        queue
            .update_status(id, JobStatus::Success, None, None)
            .await
            .unwrap();
        let again = queue.get_job(id).await.unwrap().unwrap();
        assert_eq!(again.finished_at, finished.finished_at);
        // omitted result and output leave the stored ones alone
        assert_eq!(again.result, Some(json!(1)));
        assert_eq!(again.output.as_deref(), Some("out"));
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let queue = TestQueue::new();
        assert!(
            !queue
                .update_status(99, JobStatus::Started, None, None)
                .await
                .unwrap()
        );
        assert!(!queue.remove(99).await.unwrap());
        assert_eq!(queue.status(99).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reset_stuck_moves_started_jobs_to_retry() {
        let queue = TestQueue::new();
        let clock = queue.clock();
        let id = queue.enqueue(job(1)).await.unwrap();
        queue.lock_and_fetch(1, None, None).await.unwrap();
        queue
            .update_status(id, JobStatus::Started, None, None)
            .await
            .unwrap();

        assert_eq!(queue.reset_stuck(Duration::from_secs(60)).await.unwrap(), 0);

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(queue.reset_stuck(Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(queue.status(id).await.unwrap(), Some(JobStatus::Retry));
    }

    #[tokio::test]
    async fn test_reset_stuck_with_huge_period_reclaims_nothing() {
        let queue = TestQueue::new();
        let id = queue.enqueue(job(1)).await.unwrap();
        queue.lock_and_fetch(1, None, None).await.unwrap();

        assert_eq!(queue.reset_stuck(Duration::MAX).await.unwrap(), 0);
        assert_eq!(
            queue.reset_stuck(Duration::from_secs(u64::MAX)).await.unwrap(),
            0
        );
        assert_eq!(
            queue.reset_stuck(Duration::from_secs(i64::MAX as u64)).await.unwrap(),
            0
        );
        assert_eq!(queue.status(id).await.unwrap(), Some(JobStatus::Reserved));
    }

    #[tokio::test]
    async fn test_reset_stuck_ignores_finished_jobs() {
        let queue = TestQueue::new();
        let clock = queue.clock();
        let id = queue.enqueue(job(1)).await.unwrap();
        queue
            .update_status(id, JobStatus::Failure, None, None)
            .await
            .unwrap();

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(queue.reset_stuck(Duration::from_secs(1)).await.unwrap(), 0);
        assert_eq!(queue.status(id).await.unwrap(), Some(JobStatus::Failure));
    }
}
