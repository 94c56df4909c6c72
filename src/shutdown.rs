//! OS signal handling.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. Later signals are logged and otherwise ignored, so a second
/// SIGTERM during a slow shutdown does not kill the process.
///
/// Must be called from within a tokio runtime.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                received = sigterm.recv() => received.map(|_| "SIGTERM"),
                received = sigint.recv() => received.map(|_| "SIGINT"),
            };
            let Some(name) = name else {
                break;
            };

            if token_clone.is_cancelled() {
                tracing::info!(signal = name, "Shutdown already in progress");
            } else {
                tracing::info!(signal = name, "Received signal, initiating graceful shutdown");
                token_clone.cancel();
            }
        }
    });

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_installs_without_cancelling() {
        let token = install_shutdown_handler().unwrap();
        assert!(!token.is_cancelled());
    }
}
