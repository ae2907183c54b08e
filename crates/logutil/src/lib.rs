//! Utilities for logging.
use std::str::FromStr;

use tracing::{Level, Subscriber};
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::fmt::format::{DefaultFields, Format};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable lines, includes file and line numbers.
    #[default]
    HumanReadable,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" | "pretty" | "text" => Ok(LogFormat::HumanReadable),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Build a subscriber that logs at `default_level` unless `RUST_LOG` says
/// otherwise.
pub fn subscriber(default_level: Level, format: LogFormat) -> Box<dyn Subscriber + Send + Sync> {
    let builder = base_builder(default_level);
    match format {
        LogFormat::HumanReadable => {
            Box::new(builder.with_file(true).with_line_number(true).finish())
        }
        LogFormat::Json => Box::new(builder.json().finish()),
    }
}

/// Configure the global logger.
///
/// Errors if a global subscriber has already been set.
pub fn configure_global_logger(
    default_level: Level,
    format: LogFormat,
) -> Result<(), SetGlobalDefaultError> {
    tracing::subscriber::set_global_default(subscriber(default_level, format))
}

/// Initialize a logger for tests.
///
/// Output goes through the test writer so it's only shown for failing tests.
/// Safe to call from every test.
pub fn init_test() {
    let subscriber = base_builder(Level::DEBUG)
        .with_test_writer()
        .with_file(true)
        .with_line_number(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn base_builder(default_level: Level) -> SubscriberBuilder<DefaultFields, Format, EnvFilter> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(env_filter)
}
