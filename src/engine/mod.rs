//! Submission and monitoring of batch jobs.

pub mod driver;
pub mod machine;
pub mod retry;

pub use driver::drive;
pub use machine::JobStateMachine;
pub use retry::{MonitorAction, PollContext, RetryPolicy, RetryScheduler};
