//! The job record and its lifecycle states.
//!
//! A [`Job`] is one row of the `task_queue` table. Its target and argument lists are
//! kept in their encoded form so that a record whose payload can no longer be
//! decoded can still be selected, reserved and marked as failed. Use
//! [`Job::target`], [`Job::arguments`] and [`Job::system_arguments`] to decode them.
//!
//! New work is described with [`NewJob`]:
//!
//! ```rust
//! use snakeq::{NewJob, Target};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let job = NewJob::new(Target::named("mailer", "send_welcome"))
//!     .with_arguments(vec![json!("user@example.com")])
//!     .with_priority(10)
//!     .with_delay(Duration::from_secs(60))
//!     .on_queue("email");
//! assert_eq!(job.priority, 10);
//! assert_eq!(job.delay, Some(60));
//! ```

use crate::{Result, SnakeError, codec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr, time::Duration};

pub type JobId = i64;

/// Priority used when a producer does not pick one.
pub const DEFAULT_PRIORITY: i32 = 1024;

/// Queue (lane) used when a producer does not pick one.
pub const DEFAULT_QUEUE: &str = "default";

/// Longest queue name the `queue` column accepts.
pub const MAX_QUEUE_NAME_LEN: usize = 100;

/// Status of a job. The integer encoding is shared by every backend and must not change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Reserved,
    Started,
    Failure,
    Retry,
    Success,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Reserved,
        JobStatus::Started,
        JobStatus::Failure,
        JobStatus::Retry,
        JobStatus::Success,
    ];

    pub fn as_i32(self) -> i32 {
        match self {
            JobStatus::Pending => 1,
            JobStatus::Reserved => 2,
            JobStatus::Started => 3,
            JobStatus::Failure => 4,
            JobStatus::Retry => 5,
            JobStatus::Success => 6,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(JobStatus::Pending),
            2 => Some(JobStatus::Reserved),
            3 => Some(JobStatus::Started),
            4 => Some(JobStatus::Failure),
            5 => Some(JobStatus::Retry),
            6 => Some(JobStatus::Success),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Reserved => "reserved",
            JobStatus::Started => "started",
            JobStatus::Failure => "failure",
            JobStatus::Retry => "retry",
            JobStatus::Success => "success",
        }
    }

    /// `Success` and `Failure` end the lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }

    /// Statuses a consumer may select from.
    pub fn is_selectable(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retry)
    }

    /// Statuses held by a consumer that may have crashed.
    pub fn is_in_flight(self) -> bool {
        matches!(self, JobStatus::Reserved | JobStatus::Started)
    }
}

impl TryFrom<i32> for JobStatus {
    type Error = SnakeError;

    fn try_from(value: i32) -> Result<Self> {
        JobStatus::from_i32(value).ok_or_else(|| SnakeError::decode(format!("unknown job status {}", value)))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i32>() {
            return JobStatus::from_i32(code).ok_or_else(|| format!("Unknown status code: {}", code));
        }
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "Invalid status: {}. Valid statuses: pending, reserved, started, failure, retry, success",
                    s
                )
            })
    }
}

/// Reference to the callable a job runs.
///
/// `Named` points at a handler registered under `module::symbol`. `Closure` points at a
/// registered closure body and carries the state it captured, so the job can be rebuilt in
/// a process that never saw the original value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    Named { module: String, symbol: String },
    Closure { code: String, env: Value },
}

impl Target {
    pub fn named(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        Target::Named {
            module: module.into(),
            symbol: symbol.into(),
        }
    }

    pub fn closure(code: impl Into<String>, env: Value) -> Self {
        Target::Closure {
            code: code.into(),
            env,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Named { module, symbol } => write!(f, "{}::{}", module, symbol),
            Target::Closure { code, .. } => write!(f, "closure:{}", code),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    /// Parses `module::symbol`; the symbol is everything after the last `::`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().rsplit_once("::") {
            Some((module, symbol)) if !module.is_empty() && !symbol.is_empty() => {
                Ok(Target::named(module, symbol))
            }
            _ => Err(format!("Invalid target '{}', expected module::symbol", s)),
        }
    }
}

/// A job as stored in the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    /// Encoded [`Target`].
    pub target: String,
    /// Encoded positional arguments.
    pub arguments: String,
    /// Encoded arguments reserved for wrapping frameworks.
    pub system_arguments: String,
    pub priority: i32,
    pub queue_name: String,
    /// Seconds after `created_at` before the job may be selected.
    pub delay: Option<i64>,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn target(&self) -> Result<Target> {
        codec::decode(&self.target)
    }

    pub fn arguments(&self) -> Result<Vec<Value>> {
        codec::decode(&self.arguments)
    }

    pub fn system_arguments(&self) -> Result<Vec<Value>> {
        codec::decode(&self.system_arguments)
    }

    pub fn is_successful(&self) -> bool {
        self.status == JobStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failure
    }

    /// Earliest instant the job may be selected.
    pub fn available_at(&self) -> DateTime<Utc> {
        match self.delay {
            Some(delay) => self.created_at + chrono::Duration::seconds(delay),
            None => self.created_at,
        }
    }

    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_selectable() && now >= self.available_at()
    }
}

/// Everything a producer supplies for a new job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub target: Target,
    pub arguments: Vec<Value>,
    pub system_arguments: Vec<Value>,
    pub priority: i32,
    pub delay: Option<i64>,
    pub queue_name: String,
}

impl NewJob {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            arguments: Vec::new(),
            system_arguments: Vec::new(),
            priority: DEFAULT_PRIORITY,
            delay: None,
            queue_name: DEFAULT_QUEUE.to_string(),
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_argument(mut self, argument: Value) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn with_system_arguments(mut self, system_arguments: Vec<Value>) -> Self {
        self.system_arguments = system_arguments;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Delay is kept with one-second resolution.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(i64::try_from(delay.as_secs()).unwrap_or(i64::MAX));
        self
    }

    pub fn on_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    /// Validate and encode into the column values a backend inserts.
    pub fn encode(&self) -> Result<EncodedJob> {
        if self.queue_name.is_empty() || self.queue_name.chars().count() > MAX_QUEUE_NAME_LEN {
            return Err(SnakeError::Enqueue {
                message: format!(
                    "queue name must be 1..={} characters, got {:?}",
                    MAX_QUEUE_NAME_LEN, self.queue_name
                ),
            });
        }
        let delay = match self.delay {
            Some(delay) if delay < 0 || delay > i64::from(i32::MAX) => {
                return Err(SnakeError::Enqueue {
                    message: format!("delay of {} seconds is out of range", delay),
                });
            }
            Some(delay) => Some(delay as i32),
            None => None,
        };

        Ok(EncodedJob {
            target: codec::encode(&self.target)?,
            arguments: codec::encode(&self.arguments)?,
            system_arguments: codec::encode(&self.system_arguments)?,
            priority: self.priority,
            delay,
            queue_name: self.queue_name.clone(),
        })
    }
}

/// Column values for one insert.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedJob {
    pub target: String,
    pub arguments: String,
    pub system_arguments: String,
    pub priority: i32,
    pub delay: Option<i32>,
    pub queue_name: String,
}

/// What gets stored in `result` when a job fails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Decode,
    Invocation,
}

impl FailureReport {
    pub fn from_error(err: &SnakeError) -> Self {
        let (kind, message) = match err {
            SnakeError::Decode { message } => (FailureKind::Decode, message.clone()),
            SnakeError::Invocation { message } => (FailureKind::Invocation, message.clone()),
            other => (FailureKind::Invocation, other.to_string()),
        };
        Self { kind, message }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "kind": self.kind,
            "message": self.message,
        })
    }
}

pub(crate) fn from_epoch(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
