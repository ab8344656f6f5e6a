//! Shutdown signal handling.

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;

/// Spawn listeners for SIGINT and, on Unix, SIGTERM.
///
/// The returned receiver yields once per received signal.
pub fn setup_signal_handlers() -> Result<mpsc::Receiver<&'static str>> {
    let (tx, rx) = mpsc::channel(1);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        let tx_term = tx.clone();
        tokio::spawn(async move {
            if terminate.recv().await.is_some() {
                info!("Received SIGTERM");
                let _ = tx_term.send("SIGTERM").await;
            }
        });
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT");
            let _ = tx.send("SIGINT").await;
        }
    });

    Ok(rx)
}
