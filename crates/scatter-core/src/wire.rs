//! Scatter wire format — the layout of every datagram on the network.
//!
//! One datagram carries one shard:
//!
//!   UUID:4B LE | ShardIndex:1B | Payload:variable | Checksum:8B
//!
//! The UUID is drawn at random once per encoded message and correlates the
//! shards of that message on the receiving side. It is a tag, not a token.
//! The checksum covers the header and the payload.
//!
//! The header is #[repr(C, packed)] with zerocopy derives, so parsing is a
//! bounds-checked copy with no unsafe code.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::checksum::{Checksum, ChecksumError, CHECKSUM_LEN};

// ── Packet Header ────────────────────────────────────────────────────────────

/// Fixed prefix of every shard datagram.
///
/// Wire size: 5 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PacketHeader {
    /// Little-endian correlation tag shared by all shards of one message.
    pub uuid: [u8; 4],

    /// Position of this shard in the code, 0..Total. Indices below Required
    /// are data shards, the rest parity.
    pub shard_index: u8,
}

assert_eq_size!(PacketHeader, [u8; 5]);

impl PacketHeader {
    pub fn new(uuid: u32, shard_index: u8) -> Self {
        Self {
            uuid: uuid.to_le_bytes(),
            shard_index,
        }
    }

    pub fn uuid(&self) -> u32 {
        u32::from_le_bytes(self.uuid)
    }
}

// ── Constants ────────────────────────────────────────────────────────────────

/// Size of [`PacketHeader`] on the wire.
pub const HEADER_LEN: usize = 5;

/// Smallest well-formed datagram: header, one payload byte, checksum.
pub const MIN_DATAGRAM_LEN: usize = HEADER_LEN + 1 + CHECKSUM_LEN;

/// Largest UDP payload that fits in a single IPv4 datagram.
pub const MAX_DATAGRAM_LEN: usize = 65_507;

/// Largest code length addressable by a one-byte shard index.
pub const MAX_TOTAL: usize = 256;

/// Default code: any 3 of 9 shards reconstruct the message.
pub const DEFAULT_REQUIRED: usize = 3;
pub const DEFAULT_TOTAL: usize = 9;

/// Default receive buffer per datagram read.
pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 16_384;

/// Default capacity of each pipeline queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Default latency budget for a partial bundle.
pub const DEFAULT_BUNDLE_TIMEOUT_MS: u64 = 250;

/// Default time a delivered bundle is remembered to absorb late shards.
pub const DEFAULT_SPENT_RETENTION_MS: u64 = 1_000;

/// Total datagram size for a shard payload of `payload_len` bytes.
pub const fn datagram_len(payload_len: usize) -> usize {
    HEADER_LEN + payload_len + CHECKSUM_LEN
}

// ── Shard Frame ──────────────────────────────────────────────────────────────

/// A verified, parsed view of one shard datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardFrame<'a> {
    pub uuid: u32,
    pub shard_index: u8,
    pub payload: &'a [u8],
}

impl<'a> ShardFrame<'a> {
    /// Build a datagram: header, payload, checksum.
    pub fn seal(uuid: u32, shard_index: u8, payload: &[u8], checksum: &Checksum) -> Vec<u8> {
        let header = PacketHeader::new(uuid, shard_index);
        let mut frame = Vec::with_capacity(datagram_len(payload.len()));
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(payload);
        checksum.append(&mut frame);
        frame
    }

    /// Verify a datagram's checksum and split it into header fields and payload.
    pub fn open(datagram: &'a [u8], checksum: &Checksum) -> Result<Self, WireError> {
        if datagram.len() < MIN_DATAGRAM_LEN {
            return Err(WireError::Truncated {
                len: datagram.len(),
                min: MIN_DATAGRAM_LEN,
            });
        }
        let body = checksum.verify(datagram)?;
        let header = PacketHeader::read_from_prefix(body).ok_or(WireError::Truncated {
            len: datagram.len(),
            min: MIN_DATAGRAM_LEN,
        })?;
        Ok(Self {
            uuid: header.uuid(),
            shard_index: header.shard_index,
            payload: &body[HEADER_LEN..],
        })
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting a datagram.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram of {len} bytes is shorter than minimum {min}")]
    Truncated { len: usize, min: usize },

    #[error(transparent)]
    Checksum(#[from] ChecksumError),
}

// ── Tests ────────────────────────────────────────────────────────────────────
