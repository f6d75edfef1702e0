use tracing::{Instrument, error, info, info_span, warn};

use super::retry::{MonitorAction, PollContext, RetryScheduler};
use crate::error::{BatchError, ConfigError, FailureKind, SyncError};
use crate::model::{ClusterDescriptor, JobDescriptor, JobStatus, OutputSpec};
use crate::remote::{Connector, RemoteExecutor, TailReader, with_session};
use crate::scheduler::{BatchScheduler, QueueEntry, SchedulerRegistry};
use crate::status::{JobUpdate, LogEntry, LogLevel, StatusSync};
use crate::upload::{OutputUploader, UploadRequest};

/// Drives a job from submission to a resting status.
///
/// Every call is self-contained: [`submit`](Self::submit) and each
/// [`monitor`](Self::monitor) step open their own remote session, and all
/// state they need comes from the job record plus the [`PollContext`] the
/// previous step returned. Callers must not run two steps for the same job
/// at once.
pub struct JobStateMachine<S, C, U> {
    status: S,
    connector: C,
    uploader: U,
    registry: SchedulerRegistry,
    retry: RetryScheduler,
}

impl<S, C, U> JobStateMachine<S, C, U>
where
    S: StatusSync,
    C: Connector,
    U: OutputUploader,
{
    pub fn new(
        status: S,
        connector: C,
        uploader: U,
        registry: SchedulerRegistry,
        retry: RetryScheduler,
    ) -> Self {
        Self {
            status,
            connector,
            uploader,
            registry,
            retry,
        }
    }

    /// Resolves slots, submits the job and records it as `queued`.
    ///
    /// Any failure before the scheduler accepts the job marks it `error` and
    /// is returned to the caller. If the `queued` record cannot be written
    /// afterwards, the error is [`BatchError::Unrecorded`] and `job` keeps
    /// its queue job id.
    pub async fn submit(
        &self,
        cluster: &ClusterDescriptor,
        job: &mut JobDescriptor,
    ) -> Result<MonitorAction, BatchError> {
        let span = info_span!("submit", cluster_id = %cluster.id, job_id = %job.id);
        self.submit_step(cluster, job).instrument(span).await
    }

    async fn submit_step(
        &self,
        cluster: &ClusterDescriptor,
        job: &mut JobDescriptor,
    ) -> Result<MonitorAction, BatchError> {
        let queue_job_id = match self.run_submission(cluster, job).await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, kind = %e.kind(), "submission failed");
                self.record_submission_failure(job, &e).await;
                return Err(e);
            }
        };

        job.status = Some(JobStatus::Queued);
        if let Err(source) = self.record_queued(job, &queue_job_id).await {
            error!(
                error = %source,
                queue_job_id = %queue_job_id,
                "queued job could not be recorded"
            );
            return Err(BatchError::Unrecorded {
                queue_job_id,
                source,
            });
        }
        self.append_log(
            job,
            LogEntry::info(format!("Job submitted to the scheduler as {queue_job_id}"))
                .with_field("queueJobId", queue_job_id.as_str()),
        )
        .await;

        info!(queue_job_id = %queue_job_id, "job queued");
        Ok(self.retry.first())
    }

    async fn run_submission(
        &self,
        cluster: &ClusterDescriptor,
        job: &mut JobDescriptor,
    ) -> Result<String, BatchError> {
        let adapter = self.registry.get(cluster.scheduler_type())?;
        with_session(&self.connector, cluster, async |session: &C::Session| {
            adapter.determine_slots(session, cluster, job).await?;
            adapter.submit(session, cluster, job).await
        })
        .await
    }

    /// Writes the `queued` record, retrying with backoff: once the scheduler
    /// holds the job its id has to reach the status service.
    async fn record_queued(
        &self,
        job: &JobDescriptor,
        queue_job_id: &str,
    ) -> Result<(), SyncError> {
        let update = JobUpdate {
            status: JobStatus::Queued,
            timings: job.timings.clone(),
            output: job.output.clone(),
            queue_job_id: Some(queue_job_id.to_string()),
        };
        let policy = self.retry.policy();
        let mut failures = 0;
        loop {
            match self.status.update(&job.id, &update).await {
                Ok(()) => return Ok(()),
                Err(e) if failures < policy.max_transient_failures => {
                    failures += 1;
                    let delay = policy.delay_for_attempt(failures);
                    warn!(
                        error = %e,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "queued write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn record_submission_failure(&self, job: &mut JobDescriptor, err: &BatchError) {
        job.status = Some(JobStatus::Error);
        if let Err(e) = self.write(job, JobStatus::Error).await {
            warn!(error = %e, "could not record submission failure");
        }
        self.append_log(job, LogEntry::error(format!("Job submission failed: {err}")))
            .await;
    }

    /// One monitoring step.
    ///
    /// `job` is updated only with state that was successfully written back,
    /// so tail offsets never run ahead of the stored record.
    pub async fn monitor(
        &self,
        cluster: &ClusterDescriptor,
        job: &mut JobDescriptor,
        context: PollContext,
    ) -> Result<MonitorAction, BatchError> {
        let Some(queue_job_id) = job.queue_job_id.clone() else {
            return Err(ConfigError::NotSubmitted(job.id.clone()).into());
        };
        let span = info_span!(
            "monitor",
            cluster_id = %cluster.id,
            job_id = %job.id,
            queue_job_id = %queue_job_id,
            attempt = context.attempt
        );
        self.monitor_step(cluster, job, &queue_job_id, context)
            .instrument(span)
            .await
    }

    async fn monitor_step(
        &self,
        cluster: &ClusterDescriptor,
        job: &mut JobDescriptor,
        queue_job_id: &str,
        context: PollContext,
    ) -> Result<MonitorAction, BatchError> {
        let authoritative = match self.status.status(&job.id).await {
            Ok(response) => response.parsed(),
            Err(e) => return self.transient_failure(job, context, e.into()).await,
        };

        match authoritative {
            Some(JobStatus::Terminating) => {
                let mut next = job.clone();
                next.timings.clear();
                next.status = Some(JobStatus::Terminated);
                if let Err(e) = self.write(&next, JobStatus::Terminated).await {
                    return self.transient_failure(job, context, e.into()).await;
                }
                *job = next;
                info!("cancellation honoured");
                return Ok(stop(JobStatus::Terminated));
            }
            Some(status) if status.is_terminal() || status == JobStatus::Uploading => {
                job.status = Some(status);
                info!(status = %status, "job already settled");
                return Ok(stop(status));
            }
            _ => {}
        }

        if self.retry.exhausted(&context) {
            let message = format!("Monitoring abandoned after {} polls", context.attempt);
            return self.fail(job, message).await;
        }

        let adapter = match self.registry.get(cluster.scheduler_type()) {
            Ok(adapter) => adapter,
            Err(e) => return self.fail(job, e.to_string()).await,
        };

        let mut next = job.clone();
        let observed = with_session(&self.connector, cluster, async |session: &C::Session| {
            let entries = adapter.poll_status(session).await?;
            let observed = entries.into_iter().find(|e| e.job_id == queue_job_id);
            read_tails(session, &mut next, observed.is_none()).await?;
            Ok(observed)
        })
        .await;

        let observed = match observed {
            Ok(observed) => observed,
            Err(e) if e.kind() == FailureKind::Fatal => {
                return self.fail(job, format!("Monitoring failed: {e}")).await;
            }
            Err(e) => return self.transient_failure(job, context, e).await,
        };

        match observed {
            None => self.left_scheduler(cluster, job, next, context).await,
            Some(entry) => {
                let status = observed_status(&entry, authoritative, job.status);
                next.status = Some(status);
                if let Err(e) = self.write(&next, status).await {
                    return self.transient_failure(job, context, e.into()).await;
                }
                *job = next;
                info!(status = %status, "job still in the scheduler");
                Ok(self.retry.after_poll(context))
            }
        }
    }

    /// The scheduler no longer lists the job: hand pending artifacts to the
    /// upload worker, or finish the job outright.
    async fn left_scheduler(
        &self,
        cluster: &ClusterDescriptor,
        job: &mut JobDescriptor,
        mut next: JobDescriptor,
        context: PollContext,
    ) -> Result<MonitorAction, BatchError> {
        let status = if next.has_pending_items() {
            JobStatus::Uploading
        } else {
            JobStatus::Complete
        };
        next.status = Some(status);
        if let Err(e) = self.write(&next, status).await {
            return self.transient_failure(job, context, e.into()).await;
        }
        *job = next;
        info!(status = %status, "job left the scheduler");

        if status == JobStatus::Uploading {
            let request = UploadRequest {
                token: self.status.token().to_string(),
                log_write_url: self.status.log_write_url(&job.id),
                job_dir: job.job_dir(),
            };
            if let Err(e) = self.uploader.trigger(cluster, job, &request).await {
                error!(error = %e, "upload trigger failed");
                return self
                    .fail(job, format!("Output upload could not be started: {e}"))
                    .await;
            }
        }
        Ok(stop(status))
    }

    async fn transient_failure(
        &self,
        job: &mut JobDescriptor,
        context: PollContext,
        err: BatchError,
    ) -> Result<MonitorAction, BatchError> {
        match self.retry.after_transient_failure(context) {
            Some(action) => {
                warn!(
                    error = %err,
                    transient_failures = context.transient_failures.saturating_add(1),
                    "monitor step failed, will retry"
                );
                let entry =
                    LogEntry::new(LogLevel::Warning, format!("Monitoring step failed, retrying: {err}"));
                self.append_log(job, entry).await;
                Ok(action)
            }
            None => {
                error!(error = %err, "too many consecutive failures");
                self.fail(job, format!("Monitoring gave up after repeated failures: {err}"))
                    .await
            }
        }
    }

    /// Marks the job `error`, logs `message` against it and stops.
    async fn fail(
        &self,
        job: &mut JobDescriptor,
        message: String,
    ) -> Result<MonitorAction, BatchError> {
        error!(reason = %message, "marking job as failed");
        let mut next = job.clone();
        next.status = Some(JobStatus::Error);
        self.write(&next, JobStatus::Error).await?;
        *job = next;
        self.append_log(job, LogEntry::error(message)).await;
        Ok(stop(JobStatus::Error))
    }

    async fn write(&self, job: &JobDescriptor, status: JobStatus) -> Result<(), SyncError> {
        let update = JobUpdate {
            status,
            timings: job.timings.clone(),
            output: job.output.clone(),
            queue_job_id: None,
        };
        self.status.update(&job.id, &update).await
    }

    async fn append_log(&self, job: &JobDescriptor, entry: LogEntry) {
        if let Err(e) = self.status.append_log(&job.id, &entry).await {
            warn!(error = %e, "could not append job log entry");
        }
    }
}

fn stop(status: JobStatus) -> MonitorAction {
    MonitorAction::Stop { status }
}

/// Status for a job the scheduler still lists. Unmapped state codes keep
/// whatever the job was last recorded as.
fn observed_status(
    entry: &QueueEntry,
    authoritative: Option<JobStatus>,
    recorded: Option<JobStatus>,
) -> JobStatus {
    entry
        .state
        .job_status()
        .or(authoritative.filter(|s| matches!(s, JobStatus::Queued | JobStatus::Running)))
        .or(recorded.filter(|s| matches!(s, JobStatus::Queued | JobStatus::Running)))
        .unwrap_or(JobStatus::Queued)
}

/// Appends new lines to every tailed output of `job`. Once the job has left
/// the scheduler nothing more will be written, so an unterminated last line
/// is taken as well.
async fn read_tails<E: RemoteExecutor>(
    executor: &E,
    job: &mut JobDescriptor,
    finished: bool,
) -> Result<usize, BatchError> {
    let paths: Vec<String> = job
        .output
        .iter()
        .filter_map(|o| match o {
            OutputSpec::File(file) if file.tail => Some(job.remote_path(&file.path)),
            _ => None,
        })
        .collect();

    let reader = TailReader::new(executor);
    let mut appended = 0;
    for (output, path) in job.tailed_outputs_mut().zip(paths) {
        appended += if finished {
            reader.drain(&path, output).await?
        } else {
            reader.read(&path, output).await?
        };
    }
    Ok(appended)
}
