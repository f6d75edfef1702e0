//! Client side of the job status service.

pub mod client;
pub mod types;

use std::future::Future;

use crate::error::SyncError;

pub use client::StatusClient;
pub use types::{JobUpdate, LogEntry, LogLevel, StatusResponse};

/// Reads and writes a job's record on the status service.
pub trait StatusSync: Send + Sync {
    /// The job's current status as the service reports it.
    fn status(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<StatusResponse, SyncError>> + Send;

    /// Writes status, timings, output and (after submission) the queue job id.
    fn update(
        &self,
        job_id: &str,
        update: &JobUpdate,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    fn append_log(
        &self,
        job_id: &str,
        entry: &LogEntry,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Where the upload worker should post its log lines.
    fn log_write_url(&self, job_id: &str) -> String;

    fn token(&self) -> &str;
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory status service recording every write.

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    pub struct MockStatusState {
        pub statuses: VecDeque<Result<String, SyncError>>,
        pub updates: Vec<(String, JobUpdate)>,
        pub logs: Vec<(String, LogEntry)>,
        pub fail_updates: u32,
        pub fail_logs: bool,
    }

    #[derive(Clone, Default)]
    pub struct MockStatus {
        pub state: Arc<Mutex<MockStatusState>>,
    }

    impl MockStatus {
        pub fn reporting(status: &str) -> Self {
            let mock = Self::default();
            mock.push_status(status);
            mock
        }

        pub fn push_status(&self, status: &str) {
            self.state
                .lock()
                .unwrap()
                .statuses
                .push_back(Ok(status.to_string()));
        }

        pub fn fail_next_status(&self) {
            self.state.lock().unwrap().statuses.push_back(Err(SyncError::Status {
                status: 503,
                message: "unavailable".into(),
            }));
        }

        /// Makes the next `n` updates fail.
        pub fn fail_updates(&self, n: u32) {
            self.state.lock().unwrap().fail_updates = n;
        }

        /// Makes every log append fail.
        pub fn fail_logs(&self) {
            self.state.lock().unwrap().fail_logs = true;
        }

        pub fn updates(&self) -> Vec<JobUpdate> {
            self.state
                .lock()
                .unwrap()
                .updates
                .iter()
                .map(|(_, u)| u.clone())
                .collect()
        }

        pub fn logs(&self) -> Vec<LogEntry> {
            self.state
                .lock()
                .unwrap()
                .logs
                .iter()
                .map(|(_, l)| l.clone())
                .collect()
        }
    }

    impl StatusSync for MockStatus {
        async fn status(&self, _job_id: &str) -> Result<StatusResponse, SyncError> {
            let mut state = self.state.lock().unwrap();
            // The last scripted status sticks; failures are consumed.
            let status = if let (1, Some(Ok(last))) = (state.statuses.len(), state.statuses.front())
            {
                Ok(last.clone())
            } else {
                state
                    .statuses
                    .pop_front()
                    .unwrap_or_else(|| Ok("running".to_string()))
            };
            status.map(|status| StatusResponse { status })
        }

        async fn update(&self, job_id: &str, update: &JobUpdate) -> Result<(), SyncError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_updates > 0 {
                state.fail_updates -= 1;
                return Err(SyncError::Status {
                    status: 500,
                    message: "write rejected".into(),
                });
            }
            state.updates.push((job_id.to_string(), update.clone()));
            Ok(())
        }

        async fn append_log(&self, job_id: &str, entry: &LogEntry) -> Result<(), SyncError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_logs {
                return Err(SyncError::Status {
                    status: 502,
                    message: "log service down".into(),
                });
            }
            state.logs.push((job_id.to_string(), entry.clone()));
            Ok(())
        }

        fn log_write_url(&self, job_id: &str) -> String {
            format!("http://status.test/jobs/{job_id}/log")
        }

        fn token(&self) -> &str {
            "test-token"
        }
    }
}
