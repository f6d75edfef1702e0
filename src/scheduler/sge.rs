//! Grid Engine (SGE/OGS) adapter: `qconf`, `qsub` and `qstat`.

use tracing::{debug, info};

use super::{BatchScheduler, QueueEntry, QueueState};
use crate::error::{BatchError, ConfigError, ParseError, RemoteError};
use crate::model::{ClusterDescriptor, ClusterType, JobDescriptor};
use crate::remote::{RemoteExecutor, shell_quote};

pub const STATUS_COMMAND: &str = "qstat";

#[derive(Debug, Clone)]
pub struct GridEngine {
    default_parallel_environment: String,
}

impl GridEngine {
    pub fn new(default_parallel_environment: impl Into<String>) -> Self {
        Self {
            default_parallel_environment: default_parallel_environment.into(),
        }
    }

    pub fn default_parallel_environment(&self) -> &str {
        &self.default_parallel_environment
    }

    /// The parallel environment a job runs under, if any.
    ///
    /// An explicit request always wins. Otherwise elastic-cloud clusters use
    /// the environment we provision them with, and traditional clusters use none.
    pub fn parallel_environment(&self, cluster: &ClusterDescriptor, job: &JobDescriptor) -> Option<String> {
        match (&job.params.parallel_environment, cluster.cluster_type) {
            (Some(pe), _) => Some(pe.clone()),
            (None, ClusterType::Ec2) => Some(self.default_parallel_environment.clone()),
            (None, ClusterType::Traditional) => None,
        }
    }

    /// Builds the shell command that writes the job script into the job
    /// directory and hands it to `qsub`.
    pub fn submission_command(&self, cluster: &ClusterDescriptor, job: &JobDescriptor) -> String {
        let script_name = format!("{}.sh", sanitize_name(&job.name));
        let job_dir = job.job_dir();

        let mut script = vec![
            "#!/bin/bash".to_string(),
            "#$ -cwd".to_string(),
            format!("#$ -N {}", sanitize_name(&job.name)),
        ];
        if let (Some(pe), Some(slots)) = (
            self.parallel_environment(cluster, job),
            job.params.number_of_slots,
        ) {
            script.push(format!("#$ -pe {pe} {slots}"));
        }
        script.extend(job.commands.iter().cloned());

        let quoted: Vec<String> = script.iter().map(|l| shell_quote(l)).collect();
        format!(
            "mkdir -p {dir} && cd {dir} && printf '%s\\n' {lines} > {script} && qsub {script}",
            dir = shell_quote(&job_dir),
            lines = quoted.join(" "),
            script = shell_quote(&script_name),
        )
    }
}

impl BatchScheduler for GridEngine {
    async fn determine_slots<E: RemoteExecutor>(
        &self,
        executor: &E,
        cluster: &ClusterDescriptor,
        job: &mut JobDescriptor,
    ) -> Result<Option<u32>, BatchError> {
        let Some(pe) = self.parallel_environment(cluster, job) else {
            debug!(cluster_id = %cluster.id, "no parallel environment, skipping slot lookup");
            return Ok(None);
        };

        let lines = match executor.execute(&format!("qconf -sp {}", shell_quote(&pe))).await {
            Ok(lines) => lines,
            Err(RemoteError::NonZeroExit { .. }) => {
                return Err(ConfigError::UnknownParallelEnvironment(pe).into());
            }
            Err(e) => return Err(e.into()),
        };

        let slots = parse_slots(&pe, &lines)?;
        job.params.number_of_slots = Some(slots);
        info!(parallel_environment = %pe, slots, "resolved slot count");
        Ok(Some(slots))
    }

    async fn submit<E: RemoteExecutor>(
        &self,
        executor: &E,
        cluster: &ClusterDescriptor,
        job: &mut JobDescriptor,
    ) -> Result<String, BatchError> {
        let command = self.submission_command(cluster, job);
        let lines = executor.execute(&command).await?;
        let queue_job_id = parse_submission(&lines)?;
        job.queue_job_id = Some(queue_job_id.clone());
        info!(queue_job_id = %queue_job_id, "job submitted to grid engine");
        Ok(queue_job_id)
    }

    async fn poll_status<E: RemoteExecutor>(&self, executor: &E) -> Result<Vec<QueueEntry>, BatchError> {
        let lines = executor.execute(STATUS_COMMAND).await?;
        Ok(parse_qstat(&lines)?)
    }
}

/// Extracts the `slots` value from `qconf -sp` output (`key value` lines).
pub fn parse_slots(parallel_environment: &str, lines: &[String]) -> Result<u32, ParseError> {
    for line in lines {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("slots") {
            continue;
        }
        let value = fields.next().unwrap_or_default();
        return value
            .parse::<u32>()
            .map_err(|_| ParseError::InvalidSlots(value.to_string()));
    }
    Err(ParseError::MissingSlots(parallel_environment.to_string()))
}

/// Extracts the job id from `Your job <id> ("<name>") has been submitted`.
pub fn parse_submission(lines: &[String]) -> Result<String, ParseError> {
    lines
        .iter()
        .find_map(|line| parse_submission_line(line.trim()))
        .ok_or_else(|| ParseError::UnexpectedSubmission(lines.join("\n")))
}

fn parse_submission_line(line: &str) -> Option<String> {
    let rest = line.strip_prefix("Your job ")?;
    let (id, rest) = rest.split_once(' ')?;
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let rest = rest.strip_prefix("(\"")?;
    let (_name, rest) = rest.rsplit_once("\")")?;
    (rest.trim() == "has been submitted").then(|| id.to_string())
}

/// Parses the `qstat` listing: a header row, a dashed separator, then one
/// row per active job with the job id first and the state code fifth.
pub fn parse_qstat(lines: &[String]) -> Result<Vec<QueueEntry>, ParseError> {
    let mut entries = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("job-ID")
            || trimmed.chars().all(|c| c == '-')
        {
            continue;
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() < 5 || !fields[0].chars().all(|c| c.is_ascii_digit()) {
            return Err(ParseError::MalformedStatusRow(line.clone()));
        }

        entries.push(QueueEntry {
            job_id: fields[0].to_string(),
            state: parse_state(fields[4]),
        });
    }
    Ok(entries)
}

fn parse_state(code: &str) -> QueueState {
    match code {
        "r" => QueueState::Running,
        "q" | "qw" => QueueState::Queued,
        other => QueueState::Other(other.to_string()),
    }
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "job".to_string() } else { cleaned }
}
