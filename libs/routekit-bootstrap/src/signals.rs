use anyhow::Result;
use tokio::signal;

/// Wait for a termination signal (Ctrl+C, and SIGTERM on unix).
pub async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .inspect_err(|e| tracing::error!(%e, "failed to install SIGTERM handler"))?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.inspect_err(|e| tracing::error!(%e, "ctrl_c handler failed"))?;
                tracing::info!("received Ctrl+C");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .inspect_err(|e| tracing::error!(%e, "ctrl_c handler failed"))?;
        tracing::info!("received Ctrl+C");
    }

    Ok(())
}
