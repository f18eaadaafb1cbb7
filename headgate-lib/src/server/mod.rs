mod bridge;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::pipeline::Handler;

use bridge::serve_exchange;

/// Guard to decrement the active connections counter when dropped
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Run the gateway: accept connections and serve each exchange through
/// the composed handler until a shutdown signal arrives.
pub async fn run(config: Arc<Config>, handler: Arc<dyn Handler>) -> Result<()> {
    let addr = config.listen;
    let listener = TcpListener::bind(addr).await.map_err(GatewayError::Io)?;

    let builder = ConnBuilder::new(TokioExecutor::new());

    // Track active connections for graceful shutdown
    let active_connections = Arc::new(AtomicUsize::new(0));

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
        GatewayError::Io(std::io::Error::other(format!(
            "Failed to setup SIGTERM handler: {e}"
        )))
    })?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt()).map_err(|e| {
        GatewayError::Io(std::io::Error::other(format!(
            "Failed to setup SIGINT handler: {e}"
        )))
    })?;

    info!(?addr, upstream = %config.upstream, "starting gateway");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
                break;
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept error");
                        continue;
                    }
                };

                active_connections.fetch_add(1, Ordering::Relaxed);

                let builder = builder.clone();
                let handler = Arc::clone(&handler);
                let active_connections = Arc::clone(&active_connections);

                tokio::spawn(async move {
                    // Ensure the counter drops when the connection finishes
                    let _guard = ConnectionGuard(active_connections);

                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let handler = Arc::clone(&handler);
                        async move { Ok::<_, hyper::Error>(serve_exchange(handler, req).await) }
                    });

                    if let Err(e) = builder
                        .serve_connection_with_upgrades(TokioIo::new(stream), svc)
                        .await
                    {
                        warn!(?peer, error = %e, "serve_connection error");
                    }
                });
            }
        }
    }

    drain_connections(
        &active_connections,
        Duration::from_secs(config.timeout.shutdown_secs),
    )
    .await;

    info!("Gateway stopped");
    Ok(())
}

/// Wait for in-flight connections to finish, up to the shutdown timeout
async fn drain_connections(active: &AtomicUsize, timeout: Duration) {
    let start = std::time::Instant::now();

    loop {
        let count = active.load(Ordering::Relaxed);
        if count == 0 {
            info!("All connections closed, shutdown complete");
            return;
        }

        if start.elapsed() >= timeout {
            warn!(active_connections = count, "Shutdown timeout reached");
            return;
        }

        sleep(Duration::from_millis(100)).await;
    }
}
