//! Signal handling for graceful server shutdown.

use tokio::signal;
use tracing::info;

/// Resolves once a termination signal arrives.
///
/// Unix listens for SIGINT and SIGTERM; other platforms for Ctrl+C.
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("📡 Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("📡 Received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("📡 Received Ctrl+C");
    }

    Ok(())
}
