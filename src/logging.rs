use std::env;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "BATCHWATCH_LOG";
pub const LOG_FORMAT_ENV: &str = "BATCHWATCH_LOG_FORMAT";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Installs the global subscriber. Events go to stderr so command output on
/// stdout stays machine readable.
pub fn init(verbose: bool) {
    let registry = Registry::default().with(build_filter(verbose));

    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = match parse_format(env::var(LOG_FORMAT_ENV).ok().as_deref()) {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
}

fn build_filter(verbose: bool) -> EnvFilter {
    match env::var(LOG_ENV) {
        Ok(value) => EnvFilter::new(value),
        Err(_) => {
            if verbose {
                EnvFilter::new("debug")
            } else {
                EnvFilter::new("info")
            }
        }
    }
}

fn parse_format(value: Option<&str>) -> LogFormat {
    match value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_ascii_lowercase())
    {
        Some(value) if value == "json" => LogFormat::Json,
        Some(value) if value == "pretty" => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}
