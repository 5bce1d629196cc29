//! Host and deployment API handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use helios_core::descriptors::HostStatus;
use helios_core::dto::DeployRequest;

use crate::api::error::ApiResult;
use crate::api::jobs::parse_job_id;
use crate::model::MasterModel;

/// GET /hosts
pub async fn list_hosts(State(model): State<Arc<MasterModel>>) -> ApiResult<Json<Vec<String>>> {
    let hosts = model.list_hosts().await?;
    Ok(Json(hosts))
}

/// GET /hosts/{host}/status
pub async fn host_status(
    State(model): State<Arc<MasterModel>>,
    Path(host): Path<String>,
) -> ApiResult<Json<HostStatus>> {
    let status = model.host_status(&host).await?;
    Ok(Json(status))
}

/// PUT /hosts/{host}/jobs/{id}
pub async fn deploy(
    State(model): State<Arc<MasterModel>>,
    Path((host, id)): Path<(String, String)>,
    Json(req): Json<DeployRequest>,
) -> ApiResult<StatusCode> {
    let id = parse_job_id(&id)?;
    tracing::info!(job = %id, %host, goal = %req.goal, "deploying job");
    model.deploy(&id, &host, req.goal).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /hosts/{host}/jobs/{id}
pub async fn set_goal(
    State(model): State<Arc<MasterModel>>,
    Path((host, id)): Path<(String, String)>,
    Json(req): Json<DeployRequest>,
) -> ApiResult<StatusCode> {
    let id = parse_job_id(&id)?;
    tracing::info!(job = %id, %host, goal = %req.goal, "setting deployment goal");
    model.set_goal(&id, &host, req.goal).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /hosts/{host}/jobs/{id}
pub async fn undeploy(
    State(model): State<Arc<MasterModel>>,
    Path((host, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let id = parse_job_id(&id)?;
    tracing::info!(job = %id, %host, "undeploying job");
    model.undeploy(&id, &host).await?;
    Ok(StatusCode::NO_CONTENT)
}
