use garde::Validate;
use serde::{Deserialize, Serialize};

/// Body of `POST /create-job`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    /// Base64 data URL of the selfie (`data:image/...;base64,...`).
    #[garde(length(min = 1))]
    pub image: String,

    /// User id (email).
    #[garde(length(min = 1, max = 320))]
    pub uid: String,

    /// Gallery stage/session tag the search runs against.
    #[garde(length(min = 1, max = 100))]
    pub stage: String,
}

/// Response for a successful admission.
#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub timestamp: i64,
}

/// Per-job action requested through `PATCH /admin/queue`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum JobAction {
    Retry,
    Promote,
    SetPriority,
}

#[derive(Debug, Deserialize, Validate)]
pub struct JobActionRequest {
    #[garde(length(min = 1))]
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[garde(skip)]
    pub action: JobAction,
    #[garde(skip)]
    pub priority: Option<i32>,
}

/// Bulk action requested through `POST /admin/bulk`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BulkAction {
    RetryFailed,
    DeleteFailed,
    DeleteCompleted,
}

#[derive(Debug, Deserialize)]
pub struct BulkActionRequest {
    pub action: BulkAction,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WorkerActionRequest {
    #[garde(length(min = 1))]
    #[serde(rename = "workerId")]
    pub worker_id: String,
}

/// Mutation of the excluded-images set.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExcludedAction {
    Add,
    Remove,
    Clear,
}

#[derive(Debug, Deserialize)]
pub struct ExcludedImagesRequest {
    pub action: ExcludedAction,
    #[serde(rename = "imageIds", default)]
    pub image_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_job_validation() {
        let ok = CreateJobRequest {
            image: "data:image/png;base64,AAAA".to_string(),
            uid: "alice@example.com".to_string(),
            stage: "search".to_string(),
        };
        assert!(ok.validate().is_ok());

        let empty_uid = CreateJobRequest {
            image: "data:image/png;base64,AAAA".to_string(),
            uid: String::new(),
            stage: "search".to_string(),
        };
        assert!(empty_uid.validate().is_err());
    }

    #[test]
    fn test_action_wire_names() {
        let action: JobAction = serde_json::from_str("\"setPriority\"").unwrap();
        assert_eq!(action, JobAction::SetPriority);

        let bulk: BulkAction = serde_json::from_str("\"retry-failed\"").unwrap();
        assert_eq!(bulk, BulkAction::RetryFailed);

        let excluded: ExcludedAction = serde_json::from_str("\"clear\"").unwrap();
        assert_eq!(excluded, ExcludedAction::Clear);
    }

    #[test]
    fn test_excluded_request_defaults_ids() {
        let req: ExcludedImagesRequest = serde_json::from_str(r#"{"action":"clear"}"#).unwrap();
        assert!(req.image_ids.is_empty());
    }
}
