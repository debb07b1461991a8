//! OS termination signals, translated into stop requests.
//!
//! On Unix SIGINT and SIGTERM are handled; elsewhere only Ctrl-C.

use tracing::{info, warn};

use super::ShutdownHandle;
use crate::events::Urgency;

/// Requests a graceful stop on the first signal and an immediate one on the
/// second. Returns once both have been forwarded or the supervisor is gone.
pub async fn forward_signals(handle: ShutdownHandle) -> std::io::Result<()> {
    wait_for_termination_signal().await?;
    info!("termination signal received, stopping gracefully");
    if handle.request(Urgency::Graceful, "termination signal").is_err() {
        return Ok(());
    }

    wait_for_termination_signal().await?;
    warn!("second termination signal received, stopping immediately");
    let _ = handle.request(Urgency::Immediate, "repeated termination signal");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
