//! Server state and configuration.

use std::sync::Arc;

use crate::job::JobController;
use crate::pipeline::RenderPipeline;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:8080")
    pub listen_addr: String,
}

/// Application state shared across handlers.
pub struct AppState {
    pub controller: Arc<JobController>,
    /// Direct pipeline access for synchronous previews.
    pub pipeline: Arc<RenderPipeline>,
}

impl AppState {
    pub fn new(controller: Arc<JobController>, pipeline: Arc<RenderPipeline>) -> Self {
        Self {
            controller,
            pipeline,
        }
    }
}
