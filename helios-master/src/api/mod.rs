//! API module
//!
//! HTTP layer for the master. Each submodule handles endpoints for a
//! resource; the router wires them to the shared [`MasterModel`].

pub mod error;
pub mod health;
pub mod hosts;
pub mod jobs;

use std::sync::Arc;

use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::model::MasterModel;

/// Create the main API router with all endpoints.
pub fn create_router(model: Arc<MasterModel>) -> Router {
    Router::new()
        // Health check
        .route("/healthz", get(health::health_check))
        // Job endpoints
        .route("/jobs", post(jobs::create_job))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}", delete(jobs::remove_job))
        .route("/jobs/{id}/history", get(jobs::job_history))
        // Host and deployment endpoints
        .route("/hosts", get(hosts::list_hosts))
        .route("/hosts/{host}/status", get(hosts::host_status))
        .route("/hosts/{host}/jobs/{id}", put(hosts::deploy))
        .route("/hosts/{host}/jobs/{id}", patch(hosts::set_goal))
        .route("/hosts/{host}/jobs/{id}", delete(hosts::undeploy))
        // Add state and middleware
        .with_state(model)
        .layer(TraceLayer::new_for_http())
}
