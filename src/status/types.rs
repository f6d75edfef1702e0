use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{JobStatus, OutputSpec, Timings};

/// Body of `GET /jobs/{id}/status`. The value is kept raw: the service may
/// report states this engine never writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn parsed(&self) -> Option<JobStatus> {
        self.status.parse().ok()
    }
}

/// Body of `PATCH /jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub status: JobStatus,
    pub timings: Timings,
    pub output: Vec<OutputSpec>,
    /// Only sent by the submission write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_job_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// Body of `POST /jobs/{id}/log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub msg: String,
    pub created: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, msg: impl Into<String>) -> Self {
        Self {
            level,
            msg: msg.into(),
            created: Utc::now(),
            fields: serde_json::Map::new(),
        }
    }

    pub fn info(msg: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, msg)
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, msg)
    }

    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}
