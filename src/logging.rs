//! Logging initialization.
//!
//! `RUST_LOG` always wins; the configured filter applies when it is not
//! set; "info" is the fallback. Output goes to stderr, or to a log file
//! when the configuration names one.

use std::fs::OpenOptions;
use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the host's logging. Safe to call once per process; later
/// calls are ignored.
pub fn init(filter: Option<&str>, log_file: Option<&Path>) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter.unwrap_or("info"))
    };

    let result = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path);
            match file {
                Ok(file) => tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .with_target(true)
                            .with_ansi(false)
                            .with_writer(std::sync::Arc::new(file)),
                    )
                    .with(env_filter)
                    .try_init(),
                Err(e) => {
                    eprintln!("cannot open log file {}: {e}; logging to stderr", path.display());
                    stderr_init(env_filter)
                }
            }
        }
        None => stderr_init(env_filter),
    };
    // a second init (e.g. from tests) is not an error worth surfacing
    let _ = result;
}

fn stderr_init(
    env_filter: EnvFilter,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(env_filter)
        .try_init()
}
