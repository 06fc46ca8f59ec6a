//! Stdin forwarder — sends each input line to a fixed peer.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use scatter_transport::{Base, TransportError};

pub async fn stdin_loop(
    base: Arc<Base>,
    peer: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else {
            tracing::info!("stdin closed, forwarder done");
            return Ok(());
        };
        if line.is_empty() {
            continue;
        }

        match base.send(line.as_bytes(), peer).await {
            Ok(()) => tracing::debug!(peer = %peer, len = line.len(), "line sent"),
            // Oversized lines are skipped, not fatal.
            Err(e @ (TransportError::Codec(_) | TransportError::DatagramTooLarge { .. })) => {
                tracing::warn!(error = %e, len = line.len(), "line not sent");
            }
            Err(e) => return Err(e).context("send failed"),
        }
    }
}
