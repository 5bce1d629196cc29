//! Job API handlers
//!
//! HTTP endpoints for job lifecycle: create, inspect, list, remove, and
//! history retrieval.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use helios_core::descriptors::{Job, JobId, TaskStatusEvent};
use helios_core::dto::{CreateJobResponse, ListJobsQuery};

use crate::api::error::{ApiError, ApiResult};
use crate::model::MasterModel;

pub fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    JobId::parse(raw).map_err(|e| ApiError::bad_request("INVALID_JOB_ID", e.to_string()))
}

/// POST /jobs
pub async fn create_job(
    State(model): State<Arc<MasterModel>>,
    Json(job): Json<Job>,
) -> ApiResult<(StatusCode, Json<CreateJobResponse>)> {
    tracing::info!(job = %job.id, "creating job");
    let id = model.create_job(job).await?;
    Ok((StatusCode::CREATED, Json(CreateJobResponse { id })))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(model): State<Arc<MasterModel>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    let id = parse_job_id(&id)?;
    let job = model.get_job(&id).await?;
    Ok(Json(job))
}

/// GET /jobs
pub async fn list_jobs(
    State(model): State<Arc<MasterModel>>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<BTreeMap<JobId, Job>>> {
    let jobs = model.list_jobs(query.pattern.as_deref()).await?;
    Ok(Json(jobs))
}

/// DELETE /jobs/{id}
pub async fn remove_job(
    State(model): State<Arc<MasterModel>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_job_id(&id)?;
    tracing::info!(job = %id, "removing job");
    model.remove_job(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /jobs/{id}/history
pub async fn job_history(
    State(model): State<Arc<MasterModel>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<TaskStatusEvent>>> {
    let id = parse_job_id(&id)?;
    let events = model.job_history(&id).await?;
    Ok(Json(events))
}
