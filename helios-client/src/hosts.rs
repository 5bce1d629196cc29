//! Host and deployment API endpoints

use helios_core::descriptors::{Goal, HostStatus, JobId};
use helios_core::dto::DeployRequest;

use crate::error::Result;
use crate::MasterClient;

impl MasterClient {
    /// List registered hosts.
    pub async fn list_hosts(&self) -> Result<Vec<String>> {
        let url = format!("{}/hosts", self.base_url());
        let response = self.http().get(&url).send().await?;
        self.handle_response(response).await
    }

    /// Aggregate status of one host.
    pub async fn host_status(&self, host: &str) -> Result<HostStatus> {
        let url = format!("{}/hosts/{}/status", self.base_url(), host);
        let response = self.http().get(&url).send().await?;
        self.handle_response(response).await
    }

    /// Deploy a job on a host with the given goal.
    pub async fn deploy(&self, id: &JobId, host: &str, goal: Goal) -> Result<()> {
        let url = format!("{}/hosts/{}/jobs/{}", self.base_url(), host, id);
        let response = self
            .http()
            .put(&url)
            .json(&DeployRequest { goal })
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    /// Change the goal of an existing deployment.
    pub async fn set_goal(&self, id: &JobId, host: &str, goal: Goal) -> Result<()> {
        let url = format!("{}/hosts/{}/jobs/{}", self.base_url(), host, id);
        let response = self
            .http()
            .patch(&url)
            .json(&DeployRequest { goal })
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    /// Remove a deployment; the agent garbage-collects the task.
    pub async fn undeploy(&self, id: &JobId, host: &str) -> Result<()> {
        let url = format!("{}/hosts/{}/jobs/{}", self.base_url(), host, id);
        let response = self.http().delete(&url).send().await?;
        self.handle_empty_response(response).await
    }
}
