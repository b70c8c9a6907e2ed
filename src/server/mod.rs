//! # HTTP Server for Render Jobs
//!
//! A thin surface over the job controller and pipeline: enqueue jobs,
//! observe status, cancel, and preview-render a template synchronously.
//!
//! ## Usage
//!
//! ```bash
//! tarjeta serve --listen 0.0.0.0:8080 --assets ./assets --output ./out
//! ```

mod handlers;
mod state;

pub use state::{AppState, ServerConfig};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::TarjetaError;

/// Start the HTTP server. Resolves when the listener stops (ctrl-c);
/// the caller is responsible for draining the controller afterwards.
pub async fn serve(config: ServerConfig, state: Arc<AppState>) -> Result<(), TarjetaError> {
    let app = Router::new()
        // Job API
        .route("/api/jobs", post(handlers::submit).get(handlers::list))
        .route("/api/jobs/:id", get(handlers::status))
        .route("/api/jobs/:id/cancel", post(handlers::cancel))
        // Preview API
        .route("/api/render/preview", post(handlers::preview))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(listen = %config.listen_addr, "http server starting");

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("ctrl-c handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
