// Signal handling module
//
// SIGINT (Ctrl+C) and SIGTERM stop the preview server. Other platforms only
// get Ctrl+C.

use crate::logger;

/// Resolve once the process is asked to stop, naming the signal
#[cfg(unix)]
pub async fn shutdown_requested() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            logger::log_warning(&format!("Failed to register SIGTERM handler: {e}"));
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM received",
        reason = ctrl_c() => reason,
    }
}

#[cfg(not(unix))]
pub async fn shutdown_requested() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT received",
        Err(e) => {
            logger::log_error(&format!("Failed to listen for Ctrl+C: {e}"));
            std::future::pending().await
        }
    }
}
