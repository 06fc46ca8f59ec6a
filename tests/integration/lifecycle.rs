use std::sync::Arc;

use anyhow::Result;

use scatter_core::{Codec, CodecError, ScatterConfig};
use scatter_transport::{Base, BaseConfig, Message, MessageHandler, TransportError};

use crate::*;

#[tokio::test]
async fn test_send_requires_started_transport() -> Result<()> {
    let peer = spawn_node().await?;
    let idle = Base::new(BaseConfig::new(|_msg: Message| {}, "127.0.0.1:0", Codec::new(3, 9)?));

    assert!(matches!(
        idle.send(b"nope", peer.addr).await,
        Err(TransportError::NotStarted)
    ));
    assert!(matches!(idle.stop().await, Err(TransportError::NotStarted)));
    Ok(())
}

#[tokio::test]
async fn test_stopped_node_refuses_sends_and_can_restart() -> Result<()> {
    let node = spawn_node().await?;
    let mut peer = spawn_node().await?;

    node.base.stop().await?;
    assert!(matches!(
        node.base.send(b"after stop", peer.addr).await,
        Err(TransportError::NotStarted)
    ));

    node.base.start().await?;
    node.base.send(b"restarted", peer.addr).await?;
    assert_eq!(&peer.expect_message().await?.data[..], b"restarted");
    Ok(())
}

#[tokio::test]
async fn test_stopped_node_stops_delivering() -> Result<()> {
    let a = spawn_node().await?;
    let mut b = spawn_node().await?;

    b.base.stop().await?;
    a.base.send(b"into the void", b.addr).await?;
    b.expect_silence().await;
    Ok(())
}

#[tokio::test]
async fn test_size_violations_surface_to_sender() -> Result<()> {
    let a = spawn_node().await?;
    let b = spawn_node().await?;

    assert!(matches!(
        a.base.send(&[], b.addr).await,
        Err(TransportError::Codec(CodecError::Pad(_)))
    ));
    let too_big = vec![0u8; a.base.codec().max_message_len() + 1];
    assert!(matches!(
        a.base.send(&too_big, b.addr).await,
        Err(TransportError::Codec(CodecError::Pad(_)))
    ));
    // Within the codec limit, but each shard exceeds a UDP datagram.
    let too_wide = vec![0u8; 65_500 * 3];
    assert!(matches!(
        a.base.send(&too_wide, b.addr).await,
        Err(TransportError::DatagramTooLarge { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_transport_from_config() -> Result<()> {
    let mut config = ScatterConfig::default();
    config.network.listen = "127.0.0.1:0".into();
    config.codec.required = 2;
    config.codec.total = 5;
    config.codec.checksum_key = "11".repeat(32);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handler: Arc<dyn MessageHandler> = Arc::new(move |msg: Message| {
        let _ = tx.send(msg);
    });
    let base = Base::new(BaseConfig::from_config(&config, handler)?);
    let addr = base.start().await?;

    let sender_codec = config.build_codec()?;
    let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    let shards = sender_codec.encode(b"configured")?;
    assert_eq!(shards.len(), 5);
    for shard in &shards[3..] {
        raw.send_to(shard, addr).await?;
    }

    let msg = tokio::time::timeout(DELIVERY_WAIT, rx.recv())
        .await?
        .expect("handler dropped");
    assert_eq!(&msg.data[..], b"configured");
    base.stop().await?;
    Ok(())
}
