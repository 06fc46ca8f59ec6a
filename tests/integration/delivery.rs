use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;

use scatter_core::{Checksum, ChecksumKey, Codec};

use crate::relay::{spawn_relay, FaultPlan};
use crate::*;

/// Losing any Total − Required shards still delivers.
#[tokio::test]
async fn test_survives_losing_six_of_nine() -> Result<()> {
    let a = spawn_node().await?;
    let mut b = spawn_node().await?;
    let relay = spawn_relay(b.addr, FaultPlan::dropping(&[0, 1, 3, 4, 6, 8])).await?;

    let data = random_payload(500);
    a.base.send(&data, relay.addr).await?;

    let msg = b.expect_message().await?;
    assert_eq!(&msg.data[..], &data[..]);
    assert_eq!(msg.sender, relay.addr);
    assert_eq!(relay.forwarded(), 3);
    Ok(())
}

/// Corrupted shards are discarded and the rest reconstruct the message.
#[tokio::test]
async fn test_corrupted_shards_are_discarded() -> Result<()> {
    let a = spawn_node().await?;
    let mut b = spawn_node().await?;
    let relay = spawn_relay(b.addr, FaultPlan::corrupting(&[0, 2, 4, 6, 8])).await?;

    let data = random_payload(64);
    a.base.send(&data, relay.addr).await?;

    let msg = b.expect_message().await?;
    assert_eq!(&msg.data[..], &data[..]);
    Ok(())
}

/// Corruption plus loss that leaves fewer than Required good shards.
#[tokio::test]
async fn test_corruption_counts_as_loss() -> Result<()> {
    let a = spawn_node().await?;
    let mut b = spawn_node().await?;
    let plan = FaultPlan {
        drop: vec![1, 3, 5, 7],
        corrupt: vec![0, 2, 4, 6],
        duplicate: vec![],
    };
    let relay = spawn_relay(b.addr, plan).await?;

    a.base.send(&random_payload(64), relay.addr).await?;
    b.expect_silence().await;
    Ok(())
}

/// Fewer than Required shards never deliver.
#[tokio::test]
async fn test_under_threshold_is_silent() -> Result<()> {
    let a = spawn_node().await?;
    let mut b = spawn_node().await?;
    let relay = spawn_relay(b.addr, FaultPlan::dropping(&[0, 1, 2, 3, 4, 5, 6])).await?;

    a.base.send(&random_payload(64), relay.addr).await?;
    b.expect_silence().await;
    assert_eq!(relay.forwarded(), 2);
    Ok(())
}

/// Duplicated shards never produce a second delivery.
#[tokio::test]
async fn test_duplicates_deliver_exactly_once() -> Result<()> {
    let a = spawn_node().await?;
    let mut b = spawn_node().await?;
    let relay = spawn_relay(b.addr, FaultPlan::duplicating(&[0, 1, 2, 3, 4, 5, 6, 7, 8])).await?;

    let data = random_payload(128);
    a.base.send(&data, relay.addr).await?;

    assert_eq!(&b.expect_message().await?.data[..], &data[..]);
    b.expect_silence().await;
    assert_eq!(relay.forwarded(), 18);
    Ok(())
}

/// Shards of an already delivered message arriving later are absorbed.
#[tokio::test]
async fn test_late_shards_do_not_redeliver() -> Result<()> {
    let mut b = spawn_node().await?;
    let raw = UdpSocket::bind("127.0.0.1:0").await?;
    let codec = Codec::new(3, 9)?;
    let shards = codec.encode_with_uuid(b"late shards", 0xabcd_0001)?;

    for shard in &shards[..3] {
        raw.send_to(shard, b.addr).await?;
    }
    assert_eq!(&b.expect_message().await?.data[..], b"late shards");

    tokio::time::sleep(Duration::from_millis(50)).await;
    for shard in &shards[3..] {
        raw.send_to(shard, b.addr).await?;
    }
    b.expect_silence().await;
    Ok(())
}

/// A partial bundle dies at its deadline. A straggler landing just past it,
/// before the periodic sweep has run, starts a fresh bundle that cannot
/// complete on its own.
#[tokio::test]
async fn test_partial_bundle_expires() -> Result<()> {
    let timeout = Duration::from_millis(200);
    let mut b = spawn_node_with(Codec::new(3, 9)?, |c| c.bundle_timeout = timeout).await?;
    let raw = UdpSocket::bind("127.0.0.1:0").await?;
    let codec = Codec::new(3, 9)?;
    let shards = codec.encode_with_uuid(b"too slow", 0x0bad_f00d)?;

    raw.send_to(&shards[0], b.addr).await?;
    raw.send_to(&shards[4], b.addr).await?;
    tokio::time::sleep(timeout + Duration::from_millis(5)).await;
    raw.send_to(&shards[8], b.addr).await?;

    b.expect_silence().await;
    Ok(())
}

/// Messages from one sender with distinct UUIDs are reassembled separately,
/// even when their shards interleave.
#[tokio::test]
async fn test_interleaved_messages_from_one_sender() -> Result<()> {
    let mut b = spawn_node().await?;
    let raw = UdpSocket::bind("127.0.0.1:0").await?;
    let codec = Codec::new(3, 9)?;
    let first = codec.encode_with_uuid(b"first message", 1)?;
    let second = codec.encode_with_uuid(b"second, longer message", 2)?;

    for i in [0usize, 5, 7] {
        raw.send_to(&first[i], b.addr).await?;
        raw.send_to(&second[8 - i], b.addr).await?;
    }

    let mut got = vec![
        b.expect_message().await?.data.to_vec(),
        b.expect_message().await?.data.to_vec(),
    ];
    got.sort();
    assert_eq!(got, vec![b"first message".to_vec(), b"second, longer message".to_vec()]);
    Ok(())
}

/// Shards framed under a different checksum key are dropped.
#[tokio::test]
async fn test_foreign_key_is_rejected() -> Result<()> {
    let keyed = Codec::with_checksum(3, 9, Checksum::new(ChecksumKey::new([9u8; 32])))?;
    let a = spawn_node_with(keyed, |_| {}).await?;
    let mut b = spawn_node().await?;

    a.base.send(b"wrong key", b.addr).await?;
    b.expect_silence().await;
    Ok(())
}

/// Garbage datagrams do not disturb the pipeline.
#[tokio::test]
async fn test_garbage_is_ignored() -> Result<()> {
    let a = spawn_node().await?;
    let mut b = spawn_node().await?;
    let raw = UdpSocket::bind("127.0.0.1:0").await?;

    raw.send_to(&[], b.addr).await?;
    raw.send_to(&[1, 2, 3], b.addr).await?;
    raw.send_to(&random_payload(200), b.addr).await?;

    let data = random_payload(77);
    a.base.send(&data, b.addr).await?;
    assert_eq!(&b.expect_message().await?.data[..], &data[..]);
    b.expect_silence().await;
    Ok(())
}
