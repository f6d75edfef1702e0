//! Scheduler-specific command construction and output parsing.
//!
//! Every supported scheduler flavour implements [`BatchScheduler`] and is
//! wrapped in a [`SchedulerAdapter`] variant. The [`SchedulerRegistry`] is
//! built once from configuration and only read afterwards.

pub mod sge;

use std::collections::HashMap;
use std::future::Future;

use crate::config::SchedulerSettings;
use crate::error::{BatchError, ConfigError};
use crate::model::{ClusterDescriptor, JobDescriptor, JobStatus, SchedulerType};
use crate::remote::RemoteExecutor;

pub use sge::GridEngine;

/// Scheduler-reported state of one active job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    Running,
    Queued,
    /// A state code we do not map; the job's status is left as it was.
    Other(String),
}

impl QueueState {
    pub fn job_status(&self) -> Option<JobStatus> {
        match self {
            QueueState::Running => Some(JobStatus::Running),
            QueueState::Queued => Some(JobStatus::Queued),
            QueueState::Other(_) => None,
        }
    }
}

/// One row of the scheduler's global status listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub job_id: String,
    pub state: QueueState,
}

/// Capabilities every scheduler adapter provides.
pub trait BatchScheduler: Send + Sync {
    /// Resolves the slot count for the job's parallel environment and stores it
    /// in `job.params.number_of_slots`. Returns `None` when the lookup does not
    /// apply to this cluster/job combination.
    fn determine_slots<E: RemoteExecutor>(
        &self,
        executor: &E,
        cluster: &ClusterDescriptor,
        job: &mut JobDescriptor,
    ) -> impl Future<Output = Result<Option<u32>, BatchError>> + Send;

    /// Submits the job and stores the scheduler-assigned id in `job.queue_job_id`.
    fn submit<E: RemoteExecutor>(
        &self,
        executor: &E,
        cluster: &ClusterDescriptor,
        job: &mut JobDescriptor,
    ) -> impl Future<Output = Result<String, BatchError>> + Send;

    /// Lists every job the scheduler currently knows about.
    fn poll_status<E: RemoteExecutor>(
        &self,
        executor: &E,
    ) -> impl Future<Output = Result<Vec<QueueEntry>, BatchError>> + Send;
}

/// The supported scheduler flavours.
#[derive(Debug, Clone)]
pub enum SchedulerAdapter {
    GridEngine(GridEngine),
}

impl BatchScheduler for SchedulerAdapter {
    async fn determine_slots<E: RemoteExecutor>(
        &self,
        executor: &E,
        cluster: &ClusterDescriptor,
        job: &mut JobDescriptor,
    ) -> Result<Option<u32>, BatchError> {
        match self {
            SchedulerAdapter::GridEngine(sge) => sge.determine_slots(executor, cluster, job).await,
        }
    }

    async fn submit<E: RemoteExecutor>(
        &self,
        executor: &E,
        cluster: &ClusterDescriptor,
        job: &mut JobDescriptor,
    ) -> Result<String, BatchError> {
        match self {
            SchedulerAdapter::GridEngine(sge) => sge.submit(executor, cluster, job).await,
        }
    }

    async fn poll_status<E: RemoteExecutor>(&self, executor: &E) -> Result<Vec<QueueEntry>, BatchError> {
        match self {
            SchedulerAdapter::GridEngine(sge) => sge.poll_status(executor).await,
        }
    }
}

/// Immutable lookup from scheduler type to adapter.
#[derive(Debug, Clone)]
pub struct SchedulerRegistry {
    adapters: HashMap<SchedulerType, SchedulerAdapter>,
}

impl SchedulerRegistry {
    pub fn new(settings: &SchedulerSettings) -> Self {
        let mut adapters = HashMap::new();
        adapters.insert(
            SchedulerType::Sge,
            SchedulerAdapter::GridEngine(GridEngine::new(
                settings.default_parallel_environment.clone(),
            )),
        );
        Self { adapters }
    }

    pub fn get(&self, scheduler_type: SchedulerType) -> Result<&SchedulerAdapter, ConfigError> {
        self.adapters
            .get(&scheduler_type)
            .ok_or_else(|| ConfigError::UnsupportedScheduler(scheduler_type.to_string()))
    }
}
