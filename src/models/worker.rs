use serde::{Deserialize, Serialize};
use strum::Display;

/// Derived liveness of a worker, computed from heartbeat age.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Offline,
}

/// Heartbeat record written by an external worker process.
///
/// This side never writes these (except deletion); parsing is deliberately
/// tolerant so a worker reporting extra or missing optional fields still lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub gpu_index: Option<u32>,
    #[serde(default)]
    pub gpu_name: Option<String>,
    #[serde(default)]
    pub use_cpu: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
    /// Epoch seconds.
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub uptime: Option<f64>,
    /// Epoch seconds of the most recent heartbeat.
    pub last_heartbeat: f64,
    #[serde(default)]
    pub jobs_processed: u64,
    #[serde(default)]
    pub jobs_failed: u64,
    #[serde(default)]
    pub current_job: Option<String>,
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    #[serde(default)]
    pub ram_percent: Option<f64>,
    #[serde(default)]
    pub ram_available_gb: Option<f64>,
    #[serde(default)]
    pub gpu_utilization: Option<f64>,
    #[serde(default)]
    pub gpu_memory_used_mb: Option<f64>,
    #[serde(default)]
    pub gpu_temperature: Option<f64>,
}

fn default_concurrency() -> u32 {
    1
}

impl WorkerRecord {
    /// Heartbeat age in seconds relative to `now` (epoch seconds).
    pub fn heartbeat_age(&self, now: f64) -> f64 {
        now - self.last_heartbeat
    }

    pub fn derive_status(&self, now: f64, online_cutoff_secs: f64) -> WorkerStatus {
        if self.heartbeat_age(now) < online_cutoff_secs {
            WorkerStatus::Online
        } else {
            WorkerStatus::Offline
        }
    }
}

/// Worker record enriched with derived status and pause flag, as served
/// to the admin dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    #[serde(flatten)]
    pub record: WorkerRecord,
    pub status: WorkerStatus,
    pub paused: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, last_heartbeat: f64) -> WorkerRecord {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "hostname": "gpu-box",
            "last_heartbeat": last_heartbeat,
        }))
        .unwrap()
    }

    #[test]
    fn test_status_derivation() {
        let now = 1_700_000_000.0;
        assert_eq!(
            record("w1", now - 5.0).derive_status(now, 15.0),
            WorkerStatus::Online
        );
        assert_eq!(
            record("w2", now - 20.0).derive_status(now, 15.0),
            WorkerStatus::Offline
        );
    }

    #[test]
    fn test_tolerant_parsing() {
        // Python workers report a richer shape; unknown fields must not break listing.
        let parsed: WorkerRecord = serde_json::from_str(
            r#"{
                "id": "host_gpu0_123",
                "hostname": "host",
                "status": "online",
                "gpu_index": 0,
                "gpu_name": "RTX 3090",
                "use_cpu": false,
                "concurrency": 2,
                "start_time": 1700000000.0,
                "last_heartbeat": 1700000100.5,
                "jobs_processed": 12,
                "jobs_failed": 1,
                "current_job": null,
                "cpu_percent": 35.2,
                "ram_percent": 60.1,
                "ram_available_gb": 12.4,
                "gpu_utilization": 80.0,
                "gpu_memory_used_mb": 8000.0,
                "gpu_temperature": 65.0
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.concurrency, 2);
        assert_eq!(parsed.jobs_processed, 12);
        assert_eq!(parsed.gpu_name.as_deref(), Some("RTX 3090"));

        // Minimal record still parses.
        let minimal: WorkerRecord =
            serde_json::from_str(r#"{"id":"w","last_heartbeat":1.0}"#).unwrap();
        assert_eq!(minimal.concurrency, 1);
        assert!(minimal.current_job.is_none());
    }

    #[test]
    fn test_info_flattens_record() {
        let info = WorkerInfo {
            record: record("w1", 100.0),
            status: WorkerStatus::Online,
            paused: true,
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["id"], "w1");
        assert_eq!(value["status"], "online");
        assert_eq!(value["paused"], true);
    }
}
