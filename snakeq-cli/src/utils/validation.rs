use anyhow::Result;
use serde_json::Value;
use snakeq::{JobStatus, Target, job::MAX_QUEUE_NAME_LEN};
use std::time::Duration;

/// Command line job arguments are JSON; anything that does not parse is taken as a string.
pub fn parse_argument(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn parse_target(target: &str) -> std::result::Result<Target, String> {
    target.parse()
}

pub fn parse_status(status: &str) -> std::result::Result<JobStatus, String> {
    status.parse()
}

pub fn parse_duration(duration: &str) -> std::result::Result<Duration, String> {
    snakeq::config::parse_duration(duration).map_err(|e| e.to_string())
}

pub fn validate_queue_name(queue: &str) -> Result<()> {
    if queue.is_empty() || queue.chars().count() > MAX_QUEUE_NAME_LEN {
        return Err(anyhow::anyhow!(
            "Invalid queue name '{}'. Must be 1 to {} characters",
            queue,
            MAX_QUEUE_NAME_LEN
        ));
    }
    Ok(())
}

pub fn validate_database_url(url: &str) -> Result<()> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") || url.starts_with("mysql://") {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Invalid database URL. Must start with postgres://, postgresql://, or mysql://"
        ))
    }
}
