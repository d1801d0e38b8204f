//! PostgreSQL implementation of the job queue.
//!
//! Reservation is one statement: `UPDATE ... WHERE id IN (SELECT ... FOR UPDATE SKIP
//! LOCKED) RETURNING ...`. Rows locked by a concurrent consumer are skipped rather than
//! waited on, and the selected rows flip to `Reserved` atomically with their selection.

use super::{DatabaseQueue, JOB_COLUMNS, JobRow, TABLE_NAME, into_jobs, period_secs};
use crate::{
    Result, SnakeError,
    job::{Job, JobId, JobStatus, NewJob},
};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::debug;

const NOW: &str = "EXTRACT(EPOCH FROM NOW())::BIGINT";

impl crate::queue::JobQueue<Postgres> {
    fn push_eligible_filter<'a>(
        query: &mut QueryBuilder<'a, Postgres>,
        max_priority: Option<i32>,
        queue_name: Option<&'a str>,
    ) {
        query
            .push(" WHERE status IN (")
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
    }
}

#[async_trait]
impl DatabaseQueue for crate::queue::JobQueue<Postgres> {
    async fn create_tables(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS task_queue (
                id BIGSERIAL PRIMARY KEY,
                job_classname TEXT NOT NULL,
                arguments TEXT NOT NULL,
                system_arguments TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 1024,
                delay INTEGER NULL,
                status INTEGER NOT NULL DEFAULT 1,
                result TEXT NULL,
                output TEXT NULL,
                queue VARCHAR(100) NOT NULL DEFAULT 'default',
                created_at BIGINT NOT NULL,
                started_at BIGINT NULL,
                finished_at BIGINT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_task_queue_queue ON task_queue (queue)",
            "CREATE INDEX IF NOT EXISTS idx_task_queue_priority ON task_queue (priority)",
            "CREATE INDEX IF NOT EXISTS idx_task_queue_status ON task_queue (status)",
            "CREATE INDEX IF NOT EXISTS idx_task_queue_created_at ON task_queue (created_at)",
        ];

        let mut tx = self.pool.begin().await?;
        for statement in statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!("Ensured PostgreSQL table {} exists", TABLE_NAME);
        Ok(())
    }

    async fn enqueue(&self, job: NewJob) -> Result<JobId> {
        let encoded = job.encode()?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO task_queue
            (job_classname, arguments, system_arguments, priority, delay, status, queue, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, EXTRACT(EPOCH FROM NOW())::BIGINT)
            RETURNING id
            "#,
        )
        .bind(&encoded.target)
        .bind(&encoded.arguments)
        .bind(&encoded.system_arguments)
        .bind(encoded.priority)
        .bind(encoded.delay)
        .bind(JobStatus::Pending.as_i32())
        .bind(&encoded.queue_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SnakeError::Enqueue {
            message: e.to_string(),
        })?;

        Ok(id)
    }

    async fn status(&self, job_id: JobId) -> Result<Option<JobStatus>> {
        let status: Option<i32> =
            sqlx::query_scalar("SELECT status FROM task_queue WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        status.map(JobStatus::try_from).transpose()
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM {} WHERE id = $1",
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

        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM {}",
            JOB_COLUMNS, TABLE_NAME
        ));
        Self::push_eligible_filter(&mut query, max_priority, queue_name);
        query
            .push(" ORDER BY priority ASC, id ASC LIMIT ")
            .push_bind(i64::from(count));

        let rows = query
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
            let statement = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis().max(1));
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(SnakeError::from_statement)?;
        }

        let mut query = QueryBuilder::<Postgres>::new("UPDATE task_queue SET status = ");
        query
            .push_bind(JobStatus::Reserved.as_i32())
            .push(" WHERE id IN (SELECT id FROM task_queue");
        Self::push_eligible_filter(&mut query, max_priority, queue_name);
        query
            .push(" ORDER BY priority ASC, id ASC LIMIT ")
            .push_bind(i64::from(count))
            .push(" FOR UPDATE SKIP LOCKED) RETURNING ")
            .push(JOB_COLUMNS);

        let mut rows = query
            .build_query_as::<JobRow>()
            .fetch_all(&mut *tx)
            .await
            .map_err(SnakeError::from_statement)?;

        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }
        tx.commit().await.map_err(SnakeError::from_statement)?;

        debug!("Reserved {} job(s)", rows.len());

        // RETURNING does not preserve the subquery order
        rows.sort_by_key(|row| (row.priority, row.id));
        into_jobs(rows)
    }

    async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        result: Option<&Value>,
        output: Option<&str>,
    ) -> Result<bool> {
        let mut query = QueryBuilder::<Postgres>::new("UPDATE task_queue SET status = ");
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
        let result = sqlx::query("DELETE FROM task_queue WHERE id = $1")
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
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM task_queue WHERE status = $1")
                .bind(status.as_i32())
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }

    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM {} WHERE status = $1 ORDER BY id ASC",
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
            SET status = $1
            WHERE status IN ($2, $3)
            AND created_at <= EXTRACT(EPOCH FROM NOW())::BIGINT - $4
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
