use std::sync::Arc;

use crate::services::{queue::JobQueue, store::JobStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub topic: String,
}

impl AppState {
    pub fn new(store: JobStore, queue: Arc<dyn JobQueue>, topic: impl Into<String>) -> Self {
        Self {
            store: Arc::new(store),
            queue,
            topic: topic.into(),
        }
    }
}
