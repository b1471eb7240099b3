use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// State of a face-search job in the queue.
///
/// Legal transitions: `waiting -> active -> {completed | failed}`,
/// `waiting -> delayed -> waiting`, plus explicit removal from any state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Delayed,
        JobState::Completed,
        JobState::Failed,
    ];
}

/// Payload submitted by the end user: a base64 selfie plus routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobData {
    pub image: String,
    pub uid: String,
    pub stage: String,
    /// Submission time, epoch milliseconds.
    pub timestamp: i64,
}

/// A single gallery match returned by a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceMatch {
    pub id: String,
    pub score: f64,
}

/// Durable job record, stored as JSON in the coordination store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub data: JobData,
    pub state: JobState,
    pub priority: i32,
    pub attempts_made: u32,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Stamped when a worker picks the job up.
    pub processed_at: Option<i64>,
    /// Stamped on the terminal transition.
    pub finished_at: Option<i64>,
    pub return_value: Option<Vec<FaceMatch>>,
    pub failed_reason: Option<String>,
}

impl JobRecord {
    pub fn new(id: String, data: JobData) -> Self {
        Self {
            id,
            data,
            state: JobState::Waiting,
            priority: 0,
            attempts_made: 0,
            created_at: Utc::now().timestamp_millis(),
            processed_at: None,
            finished_at: None,
            return_value: None,
            failed_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Pointer from a user id to their single in-flight job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveJobPointer {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub stage: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(!JobState::Delayed.is_terminal());
    }

    #[test]
    fn test_state_serde_snake_case() {
        assert_eq!(serde_json::to_string(&JobState::Waiting).unwrap(), "\"waiting\"");
        let parsed: JobState = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(parsed, JobState::Failed);
        assert_eq!(JobState::Active.to_string(), "active");
    }

    #[test]
    fn test_record_roundtrip() {
        let record = JobRecord::new(
            "job_1_abc".to_string(),
            JobData {
                image: "data:image/png;base64,AAAA".to_string(),
                uid: "alice@example.com".to_string(),
                stage: "search".to_string(),
                timestamp: 1_700_000_000_000,
            },
        );
        let json = serde_json::to_string(&record).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.state, JobState::Waiting);
        assert_eq!(back.attempts_made, 0);
        assert!(back.return_value.is_none());
    }
}
