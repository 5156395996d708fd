use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    RenderDocument,
    NotifyReady,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::RenderDocument => "render_document",
            JobKind::NotifyReady => "notify_ready",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "render_document" => Some(JobKind::RenderDocument),
            "notify_ready" => Some(JobKind::NotifyReady),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch key. The invoice is referenced weakly: it may be edited or deleted
/// while the job is queued.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub invoice_id: i64,
    pub kind: JobKind,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.invoice_id)
    }
}

/// key: fulfillment-job -> unit of work submitted by the composer
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FulfillmentJob {
    pub invoice_id: i64,
    pub kind: JobKind,
}

impl FulfillmentJob {
    pub fn render_document(invoice_id: i64) -> Self {
        Self {
            invoice_id,
            kind: JobKind::RenderDocument,
        }
    }

    pub fn notify_ready(invoice_id: i64) -> Self {
        Self {
            invoice_id,
            kind: JobKind::NotifyReady,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            invoice_id: self.invoice_id,
            kind: self.kind,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Dead => "dead",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "running" => JobStatus::Running,
            "succeeded" => JobStatus::Succeeded,
            "dead" => JobStatus::Dead,
            _ => JobStatus::Pending,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// key: fulfillment-ledger-row -> operator-visible job state
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub invoice_id: i64,
    pub kind: JobKind,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Set while `running`. Past this instant any worker may reclaim the row.
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn key(&self) -> JobKey {
        JobKey {
            invoice_id: self.invoice_id,
            kind: self.kind,
        }
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running
            && self.lease_expires_at.map_or(true, |until| until <= now)
    }
}

/// What the ledger did with a claim request.
#[derive(Clone, Debug, PartialEq)]
pub enum ClaimOutcome {
    Claimed(JobRecord),
    InFlight(JobRecord),
    Completed(JobRecord),
}

/// What the queue did with an enqueue request.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Accepted,
    AlreadyInFlight,
    AlreadyCompleted,
}

impl From<&ClaimOutcome> for EnqueueOutcome {
    fn from(outcome: &ClaimOutcome) -> Self {
        match outcome {
            ClaimOutcome::Claimed(_) => EnqueueOutcome::Accepted,
            ClaimOutcome::InFlight(_) => EnqueueOutcome::AlreadyInFlight,
            ClaimOutcome::Completed(_) => EnqueueOutcome::AlreadyCompleted,
        }
    }
}
