use serde::{Deserialize, Serialize};

use crate::models::job::FaceMatch;

/// Events pushed to a per-job status stream.
///
/// Each variant maps to a named SSE event; only one shape is valid per name,
/// so the stream contract is a tagged union rather than one loose object.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum JobEvent {
    Status(JobStatus),
    Result(JobResult),
    Error(JobError),
    Ping {},
}

impl JobEvent {
    /// SSE event name for this payload.
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Status(_) => "status",
            JobEvent::Result(_) => "result",
            JobEvent::Error(_) => "error",
            JobEvent::Ping {} => "ping",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Result(_) | JobEvent::Error(_))
    }
}

/// Queue position snapshot for a non-terminal job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatus {
    pub position: Option<u64>,
    pub total_size: Option<u64>,
    pub start_time: i64,
    pub stage: String,
}

/// Terminal payload for a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub result: Vec<FaceMatch>,
    pub start_time: i64,
    pub finish_time: i64,
    pub stage: String,
}

/// Terminal payload for a failed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub error: String,
    pub start_time: i64,
    pub finish_time: i64,
    pub stage: String,
}

/// Events pushed to the admin dashboard aggregate stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum DashboardEvent {
    Initial(serde_json::Value),
    QueueUpdate(serde_json::Value),
    WorkersUpdate(serde_json::Value),
    PauseUpdate(serde_json::Value),
    Ping(serde_json::Value),
}

impl DashboardEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DashboardEvent::Initial(_) => "initial",
            DashboardEvent::QueueUpdate(_) => "queue-update",
            DashboardEvent::WorkersUpdate(_) => "workers-update",
            DashboardEvent::PauseUpdate(_) => "pause-update",
            DashboardEvent::Ping(_) => "ping",
        }
    }
}

/// Change notifications published on the shared pub/sub channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeNotification {
    Queue,
    Workers,
    Pause {
        #[serde(rename = "isPaused")]
        is_paused: bool,
    },
}

/// Per-job terminal notifications published alongside the state transition,
/// letting streams react without waiting for the next poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum JobNotification {
    Completed {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    Failed {
        #[serde(rename = "jobId")]
        job_id: String,
    },
}

impl JobNotification {
    pub fn job_id(&self) -> &str {
        match self {
            JobNotification::Completed { job_id } | JobNotification::Failed { job_id } => job_id,
        }
    }
}
