use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    admission::AdmissionController, exclusions::ExcludedImages, queue::JobQueue,
    store::CoordinationStore, stream::StreamGateway, workers::WorkerRegistry,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<CoordinationStore>,
    pub queue: Arc<JobQueue>,
    pub admission: Arc<AdmissionController>,
    pub workers: Arc<WorkerRegistry>,
    pub excluded: Arc<ExcludedImages>,
    pub streams: Arc<StreamGateway>,
}

impl AppState {
    pub fn new(config: AppConfig, store: CoordinationStore) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(store);
        let queue = Arc::new(JobQueue::new(Arc::clone(&store)));
        let admission = Arc::new(AdmissionController::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            &config,
        ));
        let workers = Arc::new(WorkerRegistry::new(Arc::clone(&store), &config));
        let excluded = Arc::new(ExcludedImages::new(Arc::clone(&store)));
        let streams = Arc::new(StreamGateway::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&workers),
            Arc::clone(&admission),
            &config,
        ));
        Self {
            config,
            store,
            queue,
            admission,
            workers,
            excluded,
            streams,
        }
    }
}
