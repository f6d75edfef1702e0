//! Hand-off of finished job outputs to the upload worker.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::config::UploadConfig;
use crate::error::{BatchError, SyncError};
use crate::model::{ClusterDescriptor, JobDescriptor};

/// Arguments the upload worker needs besides the cluster and job records.
#[derive(Clone, Serialize)]
pub struct UploadRequest {
    pub token: String,
    pub log_write_url: String,
    pub job_dir: String,
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("token", &"<redacted>")
            .field("log_write_url", &self.log_write_url)
            .field("job_dir", &self.job_dir)
            .finish()
    }
}

/// Starts the upload of a job's pending artifacts. The worker moves the job
/// from `uploading` to `complete` on its own.
pub trait OutputUploader: Send + Sync {
    fn trigger(
        &self,
        cluster: &ClusterDescriptor,
        job: &JobDescriptor,
        request: &UploadRequest,
    ) -> impl Future<Output = Result<(), BatchError>> + Send;
}

#[derive(Serialize)]
struct TriggerBody<'a> {
    cluster: &'a ClusterDescriptor,
    job: &'a JobDescriptor,
    #[serde(flatten)]
    request: &'a UploadRequest,
}

/// Posts the upload request as JSON to an HTTP endpoint.
pub struct HttpUploadTrigger {
    client: Client,
    base_url: String,
    upload: UploadConfig,
}

impl HttpUploadTrigger {
    pub fn new(
        base_url: String,
        upload: UploadConfig,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url,
            upload,
        })
    }
}

impl OutputUploader for HttpUploadTrigger {
    async fn trigger(
        &self,
        cluster: &ClusterDescriptor,
        job: &JobDescriptor,
        request: &UploadRequest,
    ) -> Result<(), BatchError> {
        let url = self.upload.endpoint_for(&self.base_url, &job.id);
        let response = self
            .client
            .post(&url)
            .header("Girder-Token", &request.token)
            .json(&TriggerBody {
                cluster,
                job,
                request,
            })
            .send()
            .await
            .map_err(SyncError::from)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(SyncError::Status {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        info!(job_id = %job.id, job_dir = %request.job_dir, "output upload triggered");
        Ok(())
    }
}
