//! The operator's web interface: an HTML page with form actions and a JSON API.

use crate::Tracker;
use anyhow::Context;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

mod page;
mod routes;

const MAX_OPEN_CONNECTIONS: usize = 64;

/// Bind the listening socket. Port 0 picks a free port, see [`TcpListener::local_addr`].
pub async fn bind(address: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .context(format!("Binding the web interface to {address} failed"))
}

/// Answer requests until `cancellation_token` fires. Every request takes the tracker's lock,
/// so operations never overlap.
pub async fn serve(
    listener: TcpListener,
    tracker: Arc<Mutex<Tracker>>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    if let Ok(address) = listener.local_addr() {
        info!("Web interface listening on http://{address}/");
    }
    // Limit the max number of open connections to avoid an FD-based DoS
    let connection_limiter = Arc::new(Semaphore::new(MAX_OPEN_CONNECTIONS));
    loop {
        let permit = connection_limiter
            .clone()
            .acquire_owned()
            .await
            .context("Connection limiter failed")?;
        let (client, client_addr) = tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept incoming connection: {e}");
                        continue;
                    }
                }
            }
            () = cancellation_token.cancelled() => break,
        };
        debug!("Connection from {client_addr}");
        let io = TokioIo::new(client);
        let tracker = tracker.clone();
        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(
                    io,
                    service_fn(|request| routes::handle(tracker.clone(), request)),
                )
                .await
            {
                debug!("Error serving connection from {client_addr}: {err}");
            }
            // Explicit drop to move the permit to this task
            drop(permit);
        });
    }
    info!("Web interface stopped");
    Ok(())
}
