//! Standalone host binary.
//!
//! Normally the host runs as a library loaded by the controller; this
//! binary runs the same host from the command line, with outbound traffic
//! traced instead of delivered. Useful for exercising modules without a
//! controller.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::{error, info};

use umh::boundary::link::TraceLink;
use umh::boundary::ENDPOINT;
use umh::{HostContext, HostSettings, FAILURE_EXIT_CODE};

#[derive(Parser, Debug)]
#[command(name = "umh", version, about = "Universal module host")]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the modules directory
    #[arg(long)]
    modules_dir: Option<String>,

    /// Override the log filter (RUST_LOG still wins)
    #[arg(long)]
    log_filter: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings =
        HostSettings::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = cli.modules_dir {
        settings.modules_dir = dir;
    }
    if let Some(filter) = cli.log_filter {
        settings.log_filter = filter;
    }

    umh::logging::init(
        Some(&settings.log_filter),
        settings.log_file.as_deref().map(std::path::Path::new),
    );

    // A panic that escapes a worker thread must not leave a half-dead
    // host behind; die with the failure exit code the controller knows.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        error!("unhandled panic, terminating");
        std::process::exit(FAILURE_EXIT_CODE);
    }));

    let context =
        HostContext::bootstrap(settings, Arc::new(TraceLink)).context("bootstrapping host")?;
    context.auto_load();
    ENDPOINT.install(Arc::clone(context.router()));

    info!(version = umh::VERSION, "host running, waiting for termination");
    context.wait_for_termination();
    context.shutdown();
    Ok(())
}
