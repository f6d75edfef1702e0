use thiserror::Error;

/// Top-level error for submission and monitoring steps.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Remote execution error: {0}")]
    RemoteExecution(#[from] RemoteError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Status sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The scheduler accepted the job but the status service never heard
    /// about it. The queue job id must not be lost.
    #[error("job queued as {queue_job_id} but not recorded: {source}")]
    Unrecorded {
        queue_job_id: String,
        source: SyncError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failures talking to the cluster's master node.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to connect to {host}: {message}")]
    Connect { host: String, message: String },

    #[error("authentication failed for {user}@{host}")]
    Auth { user: String, host: String },

    #[error("failed to load private key: {0}")]
    Key(String),

    #[error("command timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("command `{command}` exited with status {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: u32,
        stderr: String,
    },

    #[error("channel error: {0}")]
    Channel(String),
}

/// Scheduler output that does not match the expected grammar.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected submission output: {0:?}")]
    UnexpectedSubmission(String),

    #[error("no `slots` entry in parallel environment `{0}`")]
    MissingSlots(String),

    #[error("invalid slot count: {0:?}")]
    InvalidSlots(String),

    #[error("malformed status row: {0:?}")]
    MalformedStatusRow(String),

    #[error("invalid file size for {path}: {value:?}")]
    InvalidFileSize { path: String, value: String },
}

/// The status service did not accept or answer a request.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("status service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Invalid or missing scheduler/cluster parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown parallel environment `{0}`")]
    UnknownParallelEnvironment(String),

    #[error("no adapter registered for scheduler `{0}`")]
    UnsupportedScheduler(String),

    #[error("cluster {0} has no master host")]
    MissingHost(String),

    #[error("cluster {0} has no ssh user")]
    MissingCredentials(String),

    #[error("job {0} has no queue job id; submit it before polling")]
    NotSubmitted(String),

    #[error("{0}")]
    Invalid(String),
}

/// Classifies a step failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// Worth another attempt (network, timeout, remote host trouble).
    Transient,
    /// Retrying cannot help (bad scheduler output, bad parameters).
    Fatal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "Transient"),
            FailureKind::Fatal => write!(f, "Fatal"),
        }
    }
}

impl BatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BatchError::RemoteExecution(_)
            | BatchError::Sync(_)
            | BatchError::Unrecorded { .. }
            | BatchError::Io(_) => FailureKind::Transient,
            BatchError::Parse(_)
            | BatchError::Config(_)
            | BatchError::Json(_)
            | BatchError::Toml(_) => FailureKind::Fatal,
        }
    }
}
