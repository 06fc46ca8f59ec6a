//! Units that move through the receive pipeline.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::time::Instant;

/// A checksum-valid shard datagram as read from the socket.
#[derive(Debug, Clone)]
pub struct Packet {
    pub sender: SocketAddr,
    pub uuid: u32,
    pub shard_index: u8,
    /// The full datagram, header and checksum included. `Codec::decode`
    /// consumes datagrams in this form.
    pub datagram: Bytes,
    pub received_at: Instant,
}

/// A reconstructed message, delivered to the handler exactly once.
#[derive(Debug, Clone)]
pub struct Message {
    pub sender: SocketAddr,
    pub uuid: u32,
    /// Arrival time of the first shard of the message.
    pub received_at: Instant,
    pub data: Bytes,
}

impl Message {
    /// UUID as it appears on the wire, hex-encoded.
    pub fn uuid_hex(&self) -> String {
        uuid_hex(self.uuid)
    }
}

pub(crate) fn uuid_hex(uuid: u32) -> String {
    hex::encode(uuid.to_le_bytes())
}

/// Receives delivered messages.
///
/// Each message is handed to its own invocation on the blocking pool, so
/// implementations may block and may be called concurrently.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: Message);
}

impl<F> MessageHandler for F
where
    F: Fn(Message) + Send + Sync + 'static,
{
    fn handle(&self, message: Message) {
        self(message)
    }
}
