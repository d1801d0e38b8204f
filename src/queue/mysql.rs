//! MySQL implementation of the job queue.
//!
//! Selection for processing runs `SELECT ... FOR UPDATE` and the `UPDATE` to `Reserved`
//! inside one InnoDB transaction, so a second consumer scanning the same rows blocks on
//! the row locks until the first one commits and then no longer sees them as eligible.
//! Time comparisons use the server clock (`UNIX_TIMESTAMP()`), keeping every consumer on
//! the same time base.

use super::{DatabaseQueue, JOB_COLUMNS, JobRow, TABLE_NAME, into_jobs, period_secs};
use crate::{
    Result, SnakeError,
    job::{Job, JobId, JobStatus, NewJob},
};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{MySql, QueryBuilder};
use std::time::Duration;
use tracing::debug;

const NOW: &str = "UNIX_TIMESTAMP()";

impl crate::queue::JobQueue<MySql> {
    fn select_eligible<'a>(
        count: u32,
        max_priority: Option<i32>,
        queue_name: Option<&'a str>,
        for_update: bool,
    ) -> QueryBuilder<'a, MySql> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {} FROM {} WHERE status IN (",
            JOB_COLUMNS, TABLE_NAME
        ));
        query
            .push_bind(JobStatus::Pending.as_i32())
            .push(", ")
            .push_bind(JobStatus::Retry.as_i32())
            .push(format!(
                ") AND (delay IS NULL OR {} >= created_at + delay)",
                NOW
            ));

        if let Some(max_priority) = max_priority {
            query.push(" AND priority <= ").push_bind(max_priority);
        }
        if let Some(queue_name) = queue_name {
            query.push(" AND queue = ").push_bind(queue_name);
        }

        query
            .push(" ORDER BY priority ASC, id ASC LIMIT ")
            .push_bind(i64::from(count));
        if for_update {
            query.push(" FOR UPDATE");
        }
        query
    }
}

#[async_trait]
impl DatabaseQueue for crate::queue::JobQueue<MySql> {
    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_queue (
                id BIGINT NOT NULL AUTO_INCREMENT,
                job_classname LONGTEXT NOT NULL,
                arguments LONGTEXT NOT NULL,
                system_arguments LONGTEXT NOT NULL,
                priority INT NOT NULL DEFAULT 1024,
                delay INT NULL,
                status INT NOT NULL DEFAULT 1,
                result LONGTEXT NULL,
                output LONGTEXT NULL,
                queue VARCHAR(100) NOT NULL DEFAULT 'default',
                created_at BIGINT NOT NULL,
                started_at BIGINT NULL,
                finished_at BIGINT NULL,
                PRIMARY KEY (id),
                INDEX idx_task_queue_queue (queue),
                INDEX idx_task_queue_priority (priority),
                INDEX idx_task_queue_status (status),
                INDEX idx_task_queue_created_at (created_at)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Ensured MySQL table {} exists", TABLE_NAME);
        Ok(())
    }

    async fn enqueue(&self, job: NewJob) -> Result<JobId> {
        let encoded = job.encode()?;

        let result = sqlx::query(
            r#"
            INSERT INTO task_queue
            (job_classname, arguments, system_arguments, priority, delay, status, queue, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, UNIX_TIMESTAMP())
            "#,
        )
        .bind(&encoded.target)
        .bind(&encoded.arguments)
        .bind(&encoded.system_arguments)
        .bind(encoded.priority)
        .bind(encoded.delay)
        .bind(JobStatus::Pending.as_i32())
        .bind(&encoded.queue_name)
        .execute(&self.pool)
        .await
        .map_err(|e| SnakeError::Enqueue {
            message: e.to_string(),
        })?;

        Ok(result.last_insert_id() as JobId)
    }

    async fn status(&self, job_id: JobId) -> Result<Option<JobStatus>> {
        let status: Option<i32> = sqlx::query_scalar("SELECT status FROM task_queue WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        status.map(JobStatus::try_from).transpose()
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM {} WHERE id = ?",
            JOB_COLUMNS, TABLE_NAME
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::into_job).transpose()
    }

    async fn peek(
        &self,
        count: u32,
        max_priority: Option<i32>,
        queue_name: Option<&str>,
    ) -> Result<Vec<Job>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let rows = Self::select_eligible(count, max_priority, queue_name, false)
            .build_query_as::<JobRow>()
            .fetch_all(&self.pool)
            .await?;

        into_jobs(rows)
    }

    async fn lock_and_fetch(
        &self,
        count: u32,
        max_priority: Option<i32>,
        queue_name: Option<&str>,
    ) -> Result<Vec<Job>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await.map_err(SnakeError::from_statement)?;

        if let Some(timeout) = self.lock_wait_timeout {
            // innodb_lock_wait_timeout only has whole-second resolution
            let seconds = timeout.as_secs().max(1);
            let statement = format!("SET SESSION innodb_lock_wait_timeout = {}", seconds);
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(SnakeError::from_statement)?;
        }

        let rows = Self::select_eligible(count, max_priority, queue_name, true)
            .build_query_as::<JobRow>()
            .fetch_all(&mut *tx)
            .await
            .map_err(SnakeError::from_statement)?;

        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let mut update = QueryBuilder::<MySql>::new("UPDATE task_queue SET status = ");
        update
            .push_bind(JobStatus::Reserved.as_i32())
            .push(" WHERE id IN (");
        let mut ids = update.separated(", ");
        for row in &rows {
            ids.push_bind(row.id);
        }
        ids.push_unseparated(")");

        update
            .build()
            .execute(&mut *tx)
            .await
            .map_err(SnakeError::from_statement)?;
        tx.commit().await.map_err(SnakeError::from_statement)?;

        debug!("Reserved {} job(s)", rows.len());

        let mut jobs = into_jobs(rows)?;
        for job in &mut jobs {
            job.status = JobStatus::Reserved;
        }
        Ok(jobs)
    }

    async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        result: Option<&Value>,
        output: Option<&str>,
    ) -> Result<bool> {
        let mut query = QueryBuilder::<MySql>::new("UPDATE task_queue SET status = ");
        query.push_bind(status.as_i32());

        if let Some(result) = result {
            query
                .push(", result = ")
                .push_bind(serde_json::to_string(result)?);
        }
        if let Some(output) = output {
            query.push(", output = ").push_bind(output);
        }

        if status == JobStatus::Started {
            query.push(format!(", started_at = COALESCE(started_at, {})", NOW));
        } else if status.is_terminal() {
            query.push(format!(", finished_at = COALESCE(finished_at, {})", NOW));
        }

        query.push(" WHERE id = ").push_bind(job_id);

        let result = query
            .build()
            .execute(&self.pool)
            .await
            .map_err(SnakeError::from_statement)?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, job_id: JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM task_queue WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM task_queue")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn count_with_status(&self, status: JobStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_queue WHERE status = ?")
            .bind(status.as_i32())
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM {} WHERE status = ? ORDER BY id ASC",
            JOB_COLUMNS, TABLE_NAME
        ))
        .bind(status.as_i32())
        .fetch_all(&self.pool)
        .await?;

        into_jobs(rows)
    }

    async fn reset_stuck(&self, period: Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE task_queue
            SET status = ?
            WHERE status IN (?, ?)
            AND created_at <= CAST(UNIX_TIMESTAMP() AS SIGNED) - ?
            "#,
        )
        .bind(JobStatus::Retry.as_i32())
        .bind(JobStatus::Reserved.as_i32())
        .bind(JobStatus::Started.as_i32())
        .bind(period_secs(period))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
