//! Termination signals.
//!
//! Service managers stop `drain --watch` with SIGTERM and an interactive
//! user with ctrl-c. Both must let the caller flush its log buffers.

use std::future::Future;
use std::io;
use tracing::{debug, error};

/// Future that resolves on ctrl-c or SIGTERM.
///
/// The SIGTERM handler is registered before this returns, so a signal that
/// arrives while the caller is still setting up is not lost.
#[cfg(unix)]
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = interrupted() => debug!("Received interrupt signal"),
            _ = terminate.recv() => debug!("Received terminate signal"),
        }
    })
}

/// Future that resolves on ctrl-c.
#[cfg(not(unix))]
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    Ok(async {
        interrupted().await;
        debug!("Received interrupt signal");
    })
}

/// Ctrl-c, or never when the handler cannot be installed.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_resolves_shutdown_signal() {
        let signal = shutdown_signal().unwrap();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), signal)
            .await
            .expect("SIGTERM did not resolve the shutdown future");
    }
}
