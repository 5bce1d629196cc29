//! Job-related API endpoints

use std::collections::BTreeMap;

use helios_core::descriptors::{Job, JobId, TaskStatusEvent};
use helios_core::dto::CreateJobResponse;

use crate::error::Result;
use crate::MasterClient;

impl MasterClient {
    /// Submit a job. The master re-derives the id from the config; an
    /// identical resubmission is a no-op success.
    pub async fn create_job(&self, job: &Job) -> Result<JobId> {
        let url = format!("{}/jobs", self.base_url());
        let response = self.http().post(&url).json(job).send().await?;
        let body: CreateJobResponse = self.handle_response(response).await?;
        Ok(body.id)
    }

    /// Fetch a job by its id.
    pub async fn get_job(&self, id: &JobId) -> Result<Job> {
        let url = format!("{}/jobs/{}", self.base_url(), id);
        let response = self.http().get(&url).send().await?;
        self.handle_response(response).await
    }

    /// List jobs, optionally filtered by an id substring.
    pub async fn list_jobs(&self, pattern: Option<&str>) -> Result<BTreeMap<JobId, Job>> {
        let url = format!("{}/jobs", self.base_url());
        let mut request = self.http().get(&url);
        if let Some(pattern) = pattern {
            request = request.query(&[("pattern", pattern)]);
        }
        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Remove a job that is no longer deployed anywhere.
    pub async fn remove_job(&self, id: &JobId) -> Result<()> {
        let url = format!("{}/jobs/{}", self.base_url(), id);
        let response = self.http().delete(&url).send().await?;
        self.handle_empty_response(response).await
    }

    /// Full task history for a job across all hosts, ordered by timestamp.
    pub async fn job_history(&self, id: &JobId) -> Result<Vec<TaskStatusEvent>> {
        let url = format!("{}/jobs/{}/history", self.base_url(), id);
        let response = self.http().get(&url).send().await?;
        self.handle_response(response).await
    }
}
