use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use batchwatch::cli::{Cli, Command, Records};
use batchwatch::config::BatchwatchConfig;
use batchwatch::engine::{JobStateMachine, MonitorAction, PollContext, RetryPolicy, RetryScheduler, drive};
use batchwatch::logging;
use batchwatch::model::{ClusterDescriptor, JobDescriptor};
use batchwatch::remote::SshConnector;
use batchwatch::scheduler::SchedulerRegistry;
use batchwatch::status::StatusClient;
use batchwatch::ui::WatchProgress;
use batchwatch::upload::HttpUploadTrigger;

type Machine = JobStateMachine<StatusClient, SshConnector, HttpUploadTrigger>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = BatchwatchConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let machine = build_machine(&config)?;

    match cli.command {
        Command::Submit { records, watch } => {
            let (cluster, mut job) = read_records(&records)?;
            // Saved even on failure: a job the scheduler accepted keeps its queue id.
            let submitted = machine.submit(&cluster, &mut job).await;
            save_job(&records.job, &job)?;
            let action = submitted?;
            if watch {
                let context = match action {
                    MonitorAction::Reschedule { context, .. } => context,
                    MonitorAction::Stop { .. } => PollContext::default(),
                };
                watch_job(&machine, &cluster, &mut job, &records.job, context).await?;
            } else {
                print_step(&action, &job)?;
            }
        }
        Command::Monitor {
            records,
            attempt,
            transient_failures,
        } => {
            let (cluster, mut job) = read_records(&records)?;
            let context = PollContext {
                attempt,
                transient_failures,
            };
            let action = machine.monitor(&cluster, &mut job, context).await?;
            save_job(&records.job, &job)?;
            print_step(&action, &job)?;
        }
        Command::Watch { records } => {
            let (cluster, mut job) = read_records(&records)?;
            watch_job(&machine, &cluster, &mut job, &records.job, PollContext::default()).await?;
        }
    }

    Ok(())
}

fn build_machine(config: &BatchwatchConfig) -> Result<Machine> {
    let status = StatusClient::new(&config.status).context("building status client")?;
    let uploader = HttpUploadTrigger::new(
        config.status.base_url.clone(),
        config.upload.clone(),
        config.status.request_timeout(),
    )
    .context("building upload client")?;

    Ok(JobStateMachine::new(
        status,
        SshConnector::new(&config.ssh),
        uploader,
        SchedulerRegistry::new(&config.scheduler),
        RetryScheduler::new(RetryPolicy::from(&config.retry)),
    ))
}

fn read_records(records: &Records) -> Result<(ClusterDescriptor, JobDescriptor)> {
    let cluster = std::fs::read_to_string(&records.cluster)
        .with_context(|| format!("reading {}", records.cluster.display()))?;
    let cluster: ClusterDescriptor = serde_json::from_str(&cluster)
        .with_context(|| format!("parsing cluster record {}", records.cluster.display()))?;

    let job = std::fs::read_to_string(&records.job)
        .with_context(|| format!("reading {}", records.job.display()))?;
    let job: JobDescriptor = serde_json::from_str(&job)
        .with_context(|| format!("parsing job record {}", records.job.display()))?;

    Ok((cluster, job))
}

// O registro local acompanha o gravado no serviço de status.
fn save_job(path: &Path, job: &JobDescriptor) -> Result<()> {
    let contents = serde_json::to_string_pretty(job)?;
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn print_step(action: &MonitorAction, job: &JobDescriptor) -> Result<()> {
    let value = serde_json::json!({ "action": action, "job": job });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn watch_job(
    machine: &Machine,
    cluster: &ClusterDescriptor,
    job: &mut JobDescriptor,
    job_path: &Path,
    context: PollContext,
) -> Result<()> {
    let mut progress = WatchProgress::start(job);
    let result = drive(machine, cluster, job, context, |job, action| {
        progress.step(job, action);
        if let Err(e) = save_job(job_path, job) {
            tracing::warn!(error = %e, "could not save job record");
        }
    })
    .await;

    match result {
        Ok(status) => {
            progress.finish(status);
            Ok(())
        }
        Err(e) => {
            if let Some(status) = job.status {
                progress.finish(status);
            }
            Err(e.into())
        }
    }
}
