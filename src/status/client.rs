use std::time::Duration;

use reqwest::{Client, Response};
use tracing::debug;

use super::StatusSync;
use super::types::{JobUpdate, LogEntry, StatusResponse};
use crate::config::StatusConfig;
use crate::error::SyncError;

const TOKEN_HEADER: &str = "Girder-Token";

pub struct StatusClient {
    token: String,
    client: Client,
    base_url: String,
}

impl StatusClient {
    pub fn new(config: &StatusConfig) -> Result<Self, SyncError> {
        Self::with_base_url(
            config.token.clone(),
            config.base_url.clone(),
            config.request_timeout(),
        )
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(
        token: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            token,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{job_id}", self.base_url)
    }

    async fn check(response: Response) -> Result<Response, SyncError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(SyncError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

impl StatusSync for StatusClient {
    async fn status(&self, job_id: &str) -> Result<StatusResponse, SyncError> {
        let response = self
            .client
            .get(format!("{}/status", self.job_url(job_id)))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;
        let body = Self::check(response).await?.json::<StatusResponse>().await?;
        debug!(job_id, status = %body.status, "fetched authoritative status");
        Ok(body)
    }

    async fn update(&self, job_id: &str, update: &JobUpdate) -> Result<(), SyncError> {
        let response = self
            .client
            .patch(self.job_url(job_id))
            .header(TOKEN_HEADER, &self.token)
            .json(update)
            .send()
            .await?;
        Self::check(response).await?;
        debug!(job_id, status = %update.status, "job record updated");
        Ok(())
    }

    async fn append_log(&self, job_id: &str, entry: &LogEntry) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.log_write_url(job_id))
            .header(TOKEN_HEADER, &self.token)
            .json(entry)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    fn log_write_url(&self, job_id: &str) -> String {
        format!("{}/log", self.job_url(job_id))
    }

    fn token(&self) -> &str {
        &self.token
    }
}
