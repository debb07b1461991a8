use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use business_processor::config::ProcessorConfig;
use business_processor::logging;
use business_processor::supervisor::{Stopped, Supervisor, SupervisorError, forward_signals};

/// Exit status after an immediate stop; in-flight events were abandoned.
const EXIT_IMMEDIATE: i32 = 2;

#[derive(Parser)]
#[command(name = "business-processor")]
#[command(about = "Decodes HTTP requests into business events and processes them", long_about = None)]
struct Args {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen on this port instead of the configured one
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ProcessorConfig::load(path)?,
        None => ProcessorConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    logging::init(&config.log_filter);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        address = %config.bind_address(),
        workers = config.workers(),
        "business-processor starting"
    );

    let mut supervisor = Supervisor::new(config);
    supervisor.mount_standard_endpoints()?;
    let running = supervisor.bind().await?;

    let signals = running.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = forward_signals(signals).await {
            error!(error = %e, "failed to install signal handlers");
        }
    });

    match running.run().await {
        Ok(Stopped::Graceful { reason }) => {
            info!(%reason, "shutdown complete");
            Ok(ExitCode::SUCCESS)
        }
        Ok(Stopped::Immediate { reason }) => {
            warn!(%reason, "terminating immediately");
            std::process::exit(EXIT_IMMEDIATE);
        }
        Err(e @ SupervisorError::GraceExceeded { .. }) => {
            error!(error = %e, "graceful shutdown failed, terminating immediately");
            std::process::exit(EXIT_IMMEDIATE);
        }
        Err(e) => Err(e.into()),
    }
}
