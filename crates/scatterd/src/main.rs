//! scatterd — Scatter datagram daemon.
//!
//! Binds one transport endpoint and logs every message it receives. With a
//! peer address (first argument or $SCATTER_PEER), each line read from stdin
//! is sent to that peer.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};

use scatter_core::ScatterConfig;
use scatter_transport::{Base, BaseConfig, Message, MessageHandler};

mod forward;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ScatterConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ScatterConfig::load().context("failed to load config")?;

    let peer: Option<SocketAddr> = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SCATTER_PEER").ok())
        .map(|p| p.parse().with_context(|| format!("invalid peer address {p:?}")))
        .transpose()?;

    let handler: Arc<dyn MessageHandler> = Arc::new(log_message);
    let base_config =
        BaseConfig::from_config(&config, handler).context("invalid transport config")?;
    let base = Arc::new(Base::new(base_config));
    let local = base.start().await.context("failed to start transport")?;

    tracing::info!(
        addr = %local,
        required = config.codec.required,
        total = config.codec.total,
        peer = ?peer,
        "scatterd running"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let forward_task = peer.map(|peer| {
        tokio::spawn(forward::stdin_loop(
            base.clone(),
            peer,
            shutdown_tx.subscribe(),
        ))
    });

    // ── Wait for exit ────────────────────────────────────────────────────────
    let mut shutdown_rx = shutdown_tx.subscribe();
    shutdown_rx.recv().await.ok();

    if let Some(task) = forward_task {
        match task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "stdin forwarder failed"),
            Err(e) => tracing::error!(error = %e, "stdin forwarder panicked"),
            Ok(Ok(())) => {}
        }
    }
    base.stop().await.context("failed to stop transport")?;
    Ok(())
}

fn log_message(msg: Message) {
    tracing::info!(
        sender = %msg.sender,
        uuid = %msg.uuid_hex(),
        len = msg.data.len(),
        latency_ms = msg.received_at.elapsed().as_millis() as u64,
        "message received: {}",
        String::from_utf8_lossy(&msg.data).trim_end()
    );
}
