//! Submission and monitoring of batch jobs on remote grid-engine clusters.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod remote;
pub mod scheduler;
pub mod status;
pub mod ui;
pub mod upload;
