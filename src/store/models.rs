//! Row types read from and written to the pipeline database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ── Documents and pages ──────────────────────────────────────────────────

/// A page row: identity only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRow {
    pub id: i64,
    pub document_id: i64,
    pub page_number: u32,
}

/// Wall-clock time of one model call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub time_taken_s: f64,
}

impl Timing {
    pub fn from_duration(d: std::time::Duration) -> Self {
        Self {
            time_taken_s: d.as_secs_f64(),
        }
    }
}

/// A stored page-type prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypePrediction {
    pub id: i64,
    pub page_id: i64,
    pub model: String,
    pub page_type: String,
    pub usage: Value,
    pub timing: Value,
    pub created_at: DateTime<Utc>,
}

/// A prediction about to be written.
#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub page_id: i64,
    pub model: String,
    pub page_type: String,
    pub usage: Value,
    pub timing: Timing,
}

/// An extraction about to be written.
#[derive(Debug, Clone)]
pub struct NewExtraction {
    pub page_id: i64,
    pub page_type: String,
    pub model: String,
    pub parsed_data: Value,
    pub usage: Value,
    pub timing: Timing,
}

/// Outcome of an insert-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    /// A new row was written.
    New(i64),
    /// A row with the same key already existed; nothing was written.
    Existing(i64),
}

impl Inserted {
    pub fn id(&self) -> i64 {
        match self {
            Inserted::New(id) | Inserted::Existing(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Inserted::New(_))
    }
}

// ── Jobs and events ──────────────────────────────────────────────────────

/// Lifecycle of a sync job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// One pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    pub project_id: i64,
    pub classifier_model: String,
    pub extractor_model: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The externally visible slice of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub status: JobStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&SyncJob> for JobStatusReport {
    fn from(job: &SyncJob) -> Self {
        Self {
            status: job.status,
            error: job.error.clone(),
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// Severity of a sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Info,
    Warning,
    Error,
    Success,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Info => "info",
            EventType::Warning => "warning",
            EventType::Error => "error",
            EventType::Success => "success",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(EventType::Info),
            "warning" => Ok(EventType::Warning),
            "error" => Ok(EventType::Error),
            "success" => Ok(EventType::Success),
            other => Err(format!("unknown event type '{other}'")),
        }
    }
}

/// One entry of a job's event stream. `id` is the insertion sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Job status plus its full ordered event stream, read in one go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job: JobStatusReport,
    pub events: Vec<SyncEvent>,
}

// ── Reports ──────────────────────────────────────────────────────────────

/// A document with at least one extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: i64,
    pub page_count: u32,
    pub title: Option<String>,
    /// Number of distinct extractor models with at least one record.
    pub model_count: u32,
}

/// Header of [`DocumentExtractions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: i64,
    pub page_count: u32,
    pub title: String,
}

/// One extraction as shown to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageExtraction {
    pub page_type: String,
    pub page_number: u32,
    pub parsed_data: Value,
    pub timing: Value,
    pub created_at: DateTime<Utc>,
}

/// Every extraction for one document, grouped by extractor model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentExtractions {
    pub document: DocumentInfo,
    pub models: BTreeMap<String, Vec<PageExtraction>>,
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub documents: u64,
    pub pages: u64,
    pub predictions: u64,
    pub extractions: u64,
    pub jobs: u64,
    pub events: u64,
}
