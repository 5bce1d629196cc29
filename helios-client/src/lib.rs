//! Helios HTTP client
//!
//! A type-safe client for the master RPC surface, shared by the external
//! CLI collaborator and the system tests. Methods are grouped by resource
//! in the `jobs` and `hosts` modules.
//!
//! # Example
//!
//! ```no_run
//! use helios_client::MasterClient;
//! use helios_core::descriptors::{Goal, Job};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = MasterClient::new("http://localhost:5801");
//!
//!     let job = Job::builder()
//!         .name("web")
//!         .version("1")
//!         .image("nginx:1.25")
//!         .build()?;
//!     let id = client.create_job(&job).await?;
//!     client.deploy(&id, "host1", Goal::Start).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
mod hosts;
mod jobs;

pub use error::{ClientError, Result};

use helios_core::dto::ErrorResponse;
use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Helios master API.
#[derive(Debug, Clone)]
pub struct MasterClient {
    /// Base URL of the master (e.g. "http://localhost:5801").
    base_url: String,
    /// HTTP client instance.
    client: Client,
}

impl MasterClient {
    /// Create a new master client.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Create a client with a custom reqwest `Client` (timeouts, proxies,
    /// TLS settings).
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Checks the status code and deserializes the JSON body, converting
    /// tagged error bodies into [`ClientError::Api`].
    pub(crate) async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::api_error(status.as_u16(), response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("failed to parse JSON response: {e}")))
    }

    /// Like `handle_response` for endpoints that return no content.
    pub(crate) async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::api_error(status.as_u16(), response).await);
        }
        Ok(())
    }

    async fn api_error(status: u16, response: reqwest::Response) -> ClientError {
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(body) => ClientError::Api {
                status,
                kind: body.kind,
                message: body.error,
            },
            Err(_) => ClientError::Api {
                status,
                kind: "UNKNOWN".to_string(),
                message: text,
            },
        }
    }
}
