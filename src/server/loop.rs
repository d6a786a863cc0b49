// Server loop module
// Accepts connections until shutdown, then lets in-flight requests finish

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use super::connection::accept_connection;
use crate::config::AppState;
use crate::logger;

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Accept connections on `listener` until `shutdown` resolves.
///
/// Must run inside a `LocalSet`; connections are spawned with `spawn_local`.
/// After shutdown, waits up to `drain_timeout` for open connections.
pub async fn run<S>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: S,
    drain_timeout: Duration,
)
where
    S: Future<Output = &'static str>,
{
    let active_connections = Arc::new(AtomicUsize::new(0));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        accept_connection(stream, peer_addr, &state, &active_connections);
                    }
                    Err(e) => logger::log_error(&format!("Failed to accept connection: {e}")),
                }
            }

            reason = &mut shutdown => {
                logger::log_shutdown(reason);
                break;
            }
        }
    }

    drop(listener);
    drain(&active_connections, drain_timeout).await;
}

async fn drain(active: &AtomicUsize, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    while active.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(DRAIN_POLL).await;
    }

    let left = active.load(Ordering::SeqCst);
    if left > 0 {
        logger::log_warning(&format!("Exiting with {left} connection(s) still open"));
    }
}
