use serde::Deserialize;

/// Runtime configuration, loaded from the environment. Liveness cutoffs,
/// retention windows and stream timings are tunables, not business constants.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string (the coordination store)
    pub redis_url: String,

    /// Per-user admission window in seconds
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// Safety-net TTL on the per-user active-job pointer
    #[serde(default = "default_active_job_ttl_secs")]
    pub active_job_ttl_secs: u64,

    /// Heartbeat age below which a worker lists as online
    #[serde(default = "default_worker_online_cutoff_secs")]
    pub worker_online_cutoff_secs: u64,

    /// Heartbeat age beyond which a worker is eligible for cleanup
    #[serde(default = "default_worker_stale_cutoff_secs")]
    pub worker_stale_cutoff_secs: u64,

    /// Completed jobs older than this are swept
    #[serde(default = "default_completed_retention_secs")]
    pub completed_retention_secs: u64,

    /// Retained completed jobs are additionally capped at this count
    #[serde(default = "default_completed_retention_cap")]
    pub completed_retention_cap: u64,

    /// Failed jobs are kept longer for operator triage
    #[serde(default = "default_failed_retention_secs")]
    pub failed_retention_secs: u64,

    /// Per-job stream poll cadence
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Keepalive ping cadence on streams (defeats idle proxy timeouts)
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,

    /// Retention sweep cadence
    #[serde(default = "default_retention_sweep_secs")]
    pub retention_sweep_secs: u64,

    /// Cadence of worker-list refresh notifications to dashboard streams
    #[serde(default = "default_worker_monitor_secs")]
    pub worker_monitor_secs: u64,

    /// Face-search inference service URL. Only the worker binary needs this.
    #[serde(default)]
    pub inference_url: Option<String>,

    /// Worker concurrency advertised in heartbeats
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: u32,

    /// Worker runs on CPU instead of GPU
    #[serde(default)]
    pub use_cpu: bool,

    /// GPU index claimed by the worker
    #[serde(default)]
    pub gpu_index: u32,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_rate_limit_window_secs() -> u64 {
    2 * 60
}

fn default_active_job_ttl_secs() -> u64 {
    30 * 60
}

fn default_worker_online_cutoff_secs() -> u64 {
    15
}

fn default_worker_stale_cutoff_secs() -> u64 {
    60
}

fn default_completed_retention_secs() -> u64 {
    24 * 3600
}

fn default_completed_retention_cap() -> u64 {
    1000
}

fn default_failed_retention_secs() -> u64 {
    7 * 24 * 3600
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_keepalive_ms() -> u64 {
    15_000
}

fn default_retention_sweep_secs() -> u64 {
    60
}

fn default_worker_monitor_secs() -> u64 {
    5
}

fn default_worker_concurrency() -> u32 {
    1
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
