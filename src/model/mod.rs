mod cluster;
mod job;

pub use cluster::{ClusterConfig, ClusterDescriptor, ClusterType, SchedulerConfig, SchedulerType, SshSettings};
pub use job::{FileOutput, ItemOutput, JobDescriptor, JobParams, JobStatus, OutputSpec, Timings};
