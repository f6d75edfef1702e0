use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque timing map carried through status writes untouched.
pub type Timings = serde_json::Map<String, serde_json::Value>;

/// Lifecycle status of a job as recorded by the status service.
///
/// `terminating` is only ever set externally (a cancellation request);
/// `terminated`, `complete` and `error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Terminating,
    Terminated,
    Uploading,
    Complete,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Terminated | JobStatus::Complete | JobStatus::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Terminating => "terminating",
            JobStatus::Terminated => "terminated",
            JobStatus::Uploading => "uploading",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "terminating" => Ok(JobStatus::Terminating),
            "terminated" => Ok(JobStatus::Terminated),
            "uploading" => Ok(JobStatus::Uploading),
            "complete" => Ok(JobStatus::Complete),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status `{other}`")),
        }
    }
}

/// Scheduler hints attached to a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParams {
    /// Parallel environment explicitly requested by the submitter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_environment: Option<String>,
    /// Slot count resolved from the parallel environment before submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_slots: Option<u32>,
    /// Any other hints, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// An already-produced artifact waiting for upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutput {
    pub item_id: String,
    /// Fields owned by other services, written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A remote file, optionally tailed while the job runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutput {
    pub path: String,
    #[serde(default)]
    pub tail: bool,
    /// Lines read so far; only ever appended to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<String>,
    /// Byte offset up to which `content` has been read.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub last_size: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// One entry of a job's `output` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputSpec {
    Item(ItemOutput),
    File(FileOutput),
}

impl OutputSpec {
    pub fn item(item_id: impl Into<String>) -> Self {
        OutputSpec::Item(ItemOutput {
            item_id: item_id.into(),
            extra: serde_json::Map::new(),
        })
    }

    pub fn tail(path: impl Into<String>) -> Self {
        OutputSpec::File(FileOutput {
            path: path.into(),
            tail: true,
            content: Vec::new(),
            last_size: 0,
            extra: serde_json::Map::new(),
        })
    }
}

/// A job record as stored by the status service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    /// Identifier assigned by the scheduler; absent until submission succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_job_id: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub params: JobParams,
    #[serde(default)]
    pub output: Vec<OutputSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub timings: Timings,
}

impl JobDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            queue_job_id: None,
            commands: Vec::new(),
            params: JobParams::default(),
            output: Vec::new(),
            status: None,
            timings: Timings::new(),
        }
    }

    /// Working directory of the job on the master node, relative to the login directory.
    pub fn job_dir(&self) -> String {
        format!("./{}", self.id)
    }

    /// True when at least one output is an artifact reference awaiting upload.
    pub fn has_pending_items(&self) -> bool {
        self.output
            .iter()
            .any(|o| matches!(o, OutputSpec::Item(_)))
    }

    pub fn tailed_outputs_mut(&mut self) -> impl Iterator<Item = &mut FileOutput> {
        self.output.iter_mut().filter_map(|o| match o {
            OutputSpec::File(file) if file.tail => Some(file),
            _ => None,
        })
    }

    /// Resolves an output path against the job directory unless it is absolute.
    pub fn remote_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.job_dir(), path.trim_start_matches("./"))
        }
    }
}
