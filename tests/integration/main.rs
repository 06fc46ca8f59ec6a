//! Scatter integration test harness.
//!
//! Every test runs real transports on loopback UDP inside the test process.
//! Faults are injected by a relay that sits between sender and receiver and
//! drops, corrupts or duplicates individual shards.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::RngCore;
use tokio::sync::mpsc;

use scatter_core::Codec;
use scatter_transport::{Base, BaseConfig, Message};

mod delivery;
mod lifecycle;

// ── Harness ───────────────────────────────────────────────────────────────────

/// How long a test waits for a message it expects.
pub const DELIVERY_WAIT: Duration = Duration::from_secs(5);

/// How long a test waits to be sure a message does not arrive.
pub const SILENCE_WAIT: Duration = Duration::from_millis(600);

/// A started transport plus the channel its handler feeds.
pub struct Node {
    pub base: Base,
    pub addr: SocketAddr,
    pub inbox: mpsc::UnboundedReceiver<Message>,
}

impl Node {
    /// Wait for the next delivered message.
    pub async fn expect_message(&mut self) -> Result<Message> {
        tokio::time::timeout(DELIVERY_WAIT, self.inbox.recv())
            .await
            .context("no message delivered in time")?
            .context("handler channel closed")
    }

    /// Assert nothing is delivered for `SILENCE_WAIT`.
    pub async fn expect_silence(&mut self) {
        if let Ok(Some(msg)) = tokio::time::timeout(SILENCE_WAIT, self.inbox.recv()).await {
            panic!("unexpected delivery of {} bytes from {}", msg.data.len(), msg.sender);
        }
    }
}

/// Start a 3-of-9 node on an ephemeral loopback port.
pub async fn spawn_node() -> Result<Node> {
    spawn_node_with(Codec::new(3, 9)?, |_| {}).await
}

/// Start a node with a specific codec and config tweaks.
pub async fn spawn_node_with(codec: Codec, tweak: impl FnOnce(&mut BaseConfig)) -> Result<Node> {
    let (tx, inbox) = mpsc::unbounded_channel();
    let handler = move |msg: Message| {
        let _ = tx.send(msg);
    };
    let mut config = BaseConfig::new(handler, "127.0.0.1:0", codec);
    tweak(&mut config);
    let base = Base::new(config);
    let addr = base.start().await.context("failed to start node")?;
    Ok(Node { base, addr, inbox })
}

pub fn random_payload(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_round_trip_between_nodes() -> Result<()> {
    let a = spawn_node().await?;
    let mut b = spawn_node().await?;

    let data = random_payload(64);
    a.base.send(&data, b.addr).await?;

    let msg = b.expect_message().await?;
    assert_eq!(&msg.data[..], &data[..]);
    assert_eq!(msg.sender, a.addr);

    a.base.stop().await?;
    b.base.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_messages_in_both_directions() -> Result<()> {
    let mut a = spawn_node().await?;
    let mut b = spawn_node().await?;

    a.base.send(b"ping", b.addr).await?;
    assert_eq!(&b.expect_message().await?.data[..], b"ping");

    b.base.send(b"pong", a.addr).await?;
    assert_eq!(&a.expect_message().await?.data[..], b"pong");
    Ok(())
}

#[tokio::test]
async fn test_sizes_up_to_socket_buffer() -> Result<()> {
    let a = spawn_node().await?;
    let mut b = spawn_node().await?;

    // 40 000 bytes gives 13 348-byte datagrams, inside the default 16 KiB buffer.
    for len in [1usize, 2, 17, 1_000, 40_000] {
        let data = random_payload(len);
        a.base.send(&data, b.addr).await?;
        let msg = b.expect_message().await?;
        assert_eq!(msg.data.len(), len);
        assert_eq!(&msg.data[..], &data[..]);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_large_message_with_raised_buffer() -> Result<()> {
    let raise = |c: &mut BaseConfig| c.socket_buffer_size = 65_536;
    let a = spawn_node_with(Codec::new(3, 9)?, raise).await?;
    let mut b = spawn_node_with(Codec::new(3, 9)?, raise).await?;

    let data = random_payload(60_000);
    a.base.send(&data, b.addr).await?;
    let msg = b.expect_message().await?;
    assert_eq!(&msg.data[..], &data[..]);
    Ok(())
}

#[tokio::test]
async fn test_other_code_shape() -> Result<()> {
    let a = spawn_node_with(Codec::new(4, 6)?, |_| {}).await?;
    let mut b = spawn_node_with(Codec::new(4, 6)?, |_| {}).await?;

    let data = random_payload(999);
    a.base.send(&data, b.addr).await?;
    assert_eq!(&b.expect_message().await?.data[..], &data[..]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_senders_are_isolated() -> Result<()> {
    let mut receiver = spawn_node().await?;
    let mut senders = Vec::new();
    for _ in 0..4 {
        senders.push(spawn_node().await?);
    }

    let mut expected = Vec::new();
    let mut handles = Vec::new();
    for sender in senders {
        let payloads: Vec<Vec<u8>> = (0..10).map(|i| random_payload(100 + i * 37)).collect();
        for p in &payloads {
            expected.push((sender.addr, p.clone()));
        }
        let target = receiver.addr;
        handles.push(tokio::spawn(async move {
            for p in &payloads {
                sender.base.send(p, target).await?;
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            anyhow::Ok(sender)
        }));
    }
    let mut finished = Vec::new();
    for handle in handles {
        finished.push(handle.await??);
    }

    let mut received = Vec::new();
    while received.len() < expected.len() {
        let msg = receiver.expect_message().await?;
        received.push((msg.sender, msg.data.to_vec()));
    }
    receiver.expect_silence().await;

    expected.sort();
    received.sort();
    assert_eq!(received, expected);
    Ok(())
}
