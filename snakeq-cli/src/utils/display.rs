use chrono::{DateTime, Utc};
use comfy_table::Table;
use snakeq::{Job, JobStatus};
use std::fmt;

pub fn status_icon(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "🟡",
        JobStatus::Reserved => "🔒",
        JobStatus::Started => "🔵",
        JobStatus::Failure => "🔴",
        JobStatus::Retry => "🟠",
        JobStatus::Success => "🟢",
    }
}

pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Decoded target, or a marker when the payload cannot be decoded.
pub fn target_label(job: &Job) -> String {
    job.target()
        .map(|target| target.to_string())
        .unwrap_or_else(|_| "<undecodable>".to_string())
}

pub struct JobTable {
    table: Table,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        let mut table = Table::new();
        table.set_header(vec![
            "ID",
            "Target",
            "Queue",
            "Status",
            "Priority",
            "Delay",
            "Created At",
            "Finished At",
        ]);
        Self { table }
    }

    pub fn add_job_row(&mut self, job: &Job) {
        self.table.add_row(vec![
            job.id.to_string(),
            target_label(job),
            job.queue_name.clone(),
            format!("{} {}", status_icon(job.status), job.status),
            job.priority.to_string(),
            job.delay.map(|d| format!("{}s", d)).unwrap_or_else(|| "-".to_string()),
            format_time(Some(job.created_at)),
            format_time(job.finished_at),
        ]);
    }

    pub fn len(&self) -> usize {
        self.table.row_iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> FromIterator<&'a Job> for JobTable {
    fn from_iter<I: IntoIterator<Item = &'a Job>>(iter: I) -> Self {
        let mut table = JobTable::new();
        for job in iter {
            table.add_job_row(job);
        }
        table
    }
}

impl fmt::Display for JobTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table)
    }
}

pub struct CountTable {
    table: Table,
}

impl Default for CountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CountTable {
    pub fn new() -> Self {
        let mut table = Table::new();
        table.set_header(vec!["Status", "Count"]);
        Self { table }
    }

    pub fn add_count_row(&mut self, status: JobStatus, count: u64) {
        self.table.add_row(vec![
            format!("{} {}", status_icon(status), status),
            count.to_string(),
        ]);
    }
}

impl fmt::Display for CountTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table)
    }
}

/// Multi-line detail view of one job.
pub fn job_details(job: &Job) -> String {
    let mut lines = vec![
        format!("Job ID:          {}", job.id),
        format!("Target:          {}", target_label(job)),
        format!("Queue:           {}", job.queue_name),
        format!("Status:          {} {}", status_icon(job.status), job.status),
        format!("Priority:        {}", job.priority),
    ];
    if let Some(delay) = job.delay {
        lines.push(format!("Delay:           {}s", delay));
    }
    match job.arguments() {
        Ok(arguments) => lines.push(format!(
            "Arguments:       {}",
            serde_json::Value::Array(arguments)
        )),
        Err(e) => lines.push(format!("Arguments:       <{}>", e)),
    }
    if let Ok(system_arguments) = job.system_arguments() {
        if !system_arguments.is_empty() {
            lines.push(format!(
                "System args:     {}",
                serde_json::Value::Array(system_arguments)
            ));
        }
    }
    lines.push(format!("Created At:      {}", format_time(Some(job.created_at))));
    lines.push(format!("Started At:      {}", format_time(job.started_at)));
    lines.push(format!("Finished At:     {}", format_time(job.finished_at)));
    if let Some(result) = &job.result {
        lines.push(format!("Result:          {}", result));
    }
    if let Some(output) = &job.output {
        lines.push("Output:".to_string());
        lines.extend(output.lines().map(|line| format!("  {}", line)));
    }
    lines.join("\n")
}
