use tokio::time::sleep;
use tracing::debug;

use super::machine::JobStateMachine;
use super::retry::{MonitorAction, PollContext};
use crate::error::BatchError;
use crate::model::{ClusterDescriptor, JobDescriptor, JobStatus};
use crate::remote::Connector;
use crate::status::StatusSync;
use crate::upload::OutputUploader;

/// Runs monitor steps in-process until the job settles, sleeping between
/// them as each step asks. `observe` sees the job after every step.
pub async fn drive<S, C, U, F>(
    machine: &JobStateMachine<S, C, U>,
    cluster: &ClusterDescriptor,
    job: &mut JobDescriptor,
    mut context: PollContext,
    mut observe: F,
) -> Result<JobStatus, BatchError>
where
    S: StatusSync,
    C: Connector,
    U: OutputUploader,
    F: FnMut(&JobDescriptor, &MonitorAction),
{
    loop {
        let action = machine.monitor(cluster, job, context).await?;
        observe(job, &action);
        match action {
            MonitorAction::Stop { status } => return Ok(status),
            MonitorAction::Reschedule {
                after,
                context: next,
            } => {
                debug!(delay_ms = after.as_millis() as u64, "next poll scheduled");
                sleep(after).await;
                context = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SchedulerSettings;
    use crate::engine::retry::{RetryPolicy, RetryScheduler};
    use crate::model::{ClusterConfig, ClusterType, SchedulerConfig, SchedulerType};
    use crate::remote::mock::MockRemote;
    use crate::scheduler::SchedulerRegistry;
    use crate::status::mock::MockStatus;
    use crate::upload::mock::MockUploader;

    fn cluster() -> ClusterDescriptor {
        ClusterDescriptor {
            id: "bob".into(),
            name: "dummy".into(),
            cluster_type: ClusterType::Ec2,
            config: ClusterConfig {
                host: Some("dummy".into()),
                port: None,
                ssh: None,
                scheduler: SchedulerConfig {
                    scheduler_type: SchedulerType::Sge,
                },
            },
        }
    }

    #[tokio::test]
    async fn drives_until_the_job_leaves_the_scheduler() {
        let status = MockStatus::reporting("running");
        let remote = MockRemote::new();
        let row = "1 0.00000 hostname   sgeadmin     r     09/09/2009 14:58:14                1";
        remote.respond(&[row]).respond(&[row]).respond(&[]);
        let machine = JobStateMachine::new(
            status.clone(),
            remote.clone(),
            MockUploader::default(),
            SchedulerRegistry::new(&SchedulerSettings::default()),
            RetryScheduler::new(RetryPolicy {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
                max_transient_failures: 1,
                max_polls: None,
            }),
        );
        let mut job = JobDescriptor::new("dummy", "dummy");
        job.queue_job_id = Some("1".into());

        let mut steps = 0;
        let settled = drive(&machine, &cluster(), &mut job, PollContext::default(), |_, _| {
            steps += 1;
        })
        .await
        .unwrap();

        assert_eq!(settled, JobStatus::Complete);
        assert_eq!(steps, 3);
        assert_eq!(remote.closes(), 3);
        let statuses: Vec<JobStatus> = status.updates().iter().map(|u| u.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Running, JobStatus::Running, JobStatus::Complete]
        );
    }
}
