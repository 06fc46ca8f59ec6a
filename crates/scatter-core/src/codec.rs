//! Reed-Solomon (Required, Total) erasure codec.
//!
//! Encoding pads the message, splits it into `required` data chunks, and
//! synthesizes the `total - required` parity chunks by running the erasure
//! reconstruction with the parity positions marked missing. Each chunk is then
//! framed as a datagram (see [`crate::wire`]).
//!
//! Decoding verifies every candidate datagram, discards the ones that fail,
//! and rebuilds the message from any `required` survivors. Shards may be
//! presented in any order and any subset of `required` suffices.

use std::fmt;

use rand::RngCore;
use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::checksum::Checksum;
use crate::pad::{max_message_len, pad_data, unpad_data, PadError};
use crate::wire::{datagram_len, ShardFrame, MAX_TOTAL};

/// One framed shard: `UUID ‖ ShardIndex ‖ Payload ‖ Checksum`.
pub type Shard = Vec<u8>;

/// Erasure coder for a fixed (required, total) pair and checksum key.
pub struct Codec {
    required: usize,
    total: usize,
    rs: ReedSolomon,
    checksum: Checksum,
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("required", &self.required)
            .field("total", &self.total)
            .field("checksum", &self.checksum)
            .finish()
    }
}

impl Codec {
    /// Create a codec with the default (all-zero) checksum key.
    pub fn new(required: usize, total: usize) -> Result<Self, CodecError> {
        Self::with_checksum(required, total, Checksum::default())
    }

    /// Create a codec that frames shards with `checksum`.
    ///
    /// Requires `1 <= required < total <= 256`: the shard index is one byte
    /// and the code needs at least one parity shard.
    pub fn with_checksum(
        required: usize,
        total: usize,
        checksum: Checksum,
    ) -> Result<Self, CodecError> {
        if required == 0 || required >= total || total > MAX_TOTAL {
            return Err(CodecError::InvalidShape { required, total });
        }
        let rs = ReedSolomon::new(required, total - required)?;
        Ok(Self {
            required,
            total,
            rs,
            checksum,
        })
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Largest message `encode` accepts.
    pub fn max_message_len(&self) -> usize {
        max_message_len(self.required)
    }

    /// Size of each datagram produced for a message of `message_len` bytes.
    pub fn datagram_len(&self, message_len: usize) -> usize {
        datagram_len(self.chunk_len(self.padded_len(message_len)))
    }

    /// Encode `data` under a fresh random UUID.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Shard>, CodecError> {
        let uuid = rand::thread_rng().next_u32();
        self.encode_with_uuid(data, uuid)
    }

    /// Encode `data` into `total` framed shards tagged with `uuid`.
    ///
    /// Deterministic for a given codec, UUID and input.
    pub fn encode_with_uuid(&self, data: &[u8], uuid: u32) -> Result<Vec<Shard>, CodecError> {
        let padded = pad_data(data, self.required, self.total)?;
        let mut chunks = self.split(&padded);

        // Parity positions are None; reconstruction fills them from the data.
        self.rs.reconstruct(&mut chunks)?;

        let mut shards = Vec::with_capacity(self.total);
        for (index, chunk) in chunks.iter().enumerate() {
            let payload = chunk.as_deref().ok_or(CodecError::MissingShard(index))?;
            shards.push(ShardFrame::seal(uuid, index as u8, payload, &self.checksum));
        }

        tracing::trace!(
            uuid,
            len = data.len(),
            shard_len = shards[0].len(),
            total = self.total,
            "encoded message"
        );
        Ok(shards)
    }

    /// Reconstruct the message from a set of framed shards.
    ///
    /// Shards failing their checksum, carrying an out-of-range index, or
    /// repeating an index already seen are skipped. The survivors must agree
    /// on UUID and payload length.
    pub fn decode<S: AsRef<[u8]>>(&self, shards: &[S]) -> Result<Vec<u8>, CodecError> {
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; self.total];
        let mut uuid: Option<u32> = None;
        let mut chunk_len: Option<usize> = None;
        let mut present = 0usize;

        for datagram in shards {
            let frame = match ShardFrame::open(datagram.as_ref(), &self.checksum) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::trace!(error = %e, "discarding shard");
                    continue;
                }
            };
            let index = frame.shard_index as usize;
            if index >= self.total {
                tracing::trace!(index, total = self.total, "shard index out of range");
                continue;
            }

            match uuid {
                None => uuid = Some(frame.uuid),
                Some(expected) if expected != frame.uuid => {
                    return Err(CodecError::UuidMismatch {
                        expected,
                        found: frame.uuid,
                    });
                }
                Some(_) => {}
            }
            match chunk_len {
                None => chunk_len = Some(frame.payload.len()),
                Some(expected) if expected != frame.payload.len() => {
                    return Err(CodecError::LengthMismatch {
                        expected,
                        found: frame.payload.len(),
                    });
                }
                Some(_) => {}
            }

            if slots[index].is_none() {
                slots[index] = Some(frame.payload.to_vec());
                present += 1;
            }
        }

        if present < self.required {
            return Err(CodecError::NotEnoughShards {
                needed: self.required,
                got: present,
            });
        }

        self.rs.reconstruct_data(&mut slots)?;

        let mut joined = Vec::with_capacity(self.required * chunk_len.unwrap_or(0));
        for (index, slot) in slots.iter().take(self.required).enumerate() {
            let chunk = slot.as_deref().ok_or(CodecError::MissingShard(index))?;
            joined.extend_from_slice(chunk);
        }
        Ok(unpad_data(&joined)?.to_vec())
    }

    fn padded_len(&self, message_len: usize) -> usize {
        (message_len + crate::pad::LENGTH_PREFIX).div_ceil(self.total) * self.total
    }

    fn chunk_len(&self, padded_len: usize) -> usize {
        padded_len.div_ceil(self.required)
    }

    /// Split padded data into `required` equal data chunks followed by
    /// `total - required` empty parity slots.
    fn split(&self, padded: &[u8]) -> Vec<Option<Vec<u8>>> {
        let chunk_len = self.chunk_len(padded.len());
        let mut chunks: Vec<Option<Vec<u8>>> = padded
            .chunks(chunk_len)
            .map(|piece| {
                let mut chunk = piece.to_vec();
                chunk.resize(chunk_len, 0);
                Some(chunk)
            })
            .collect();
        chunks.resize(self.required, Some(vec![0u8; chunk_len]));
        chunks.resize(self.total, None);
        chunks
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid code shape: required={required} total={total}")]
    InvalidShape { required: usize, total: usize },

    #[error(transparent)]
    Pad(#[from] PadError),

    #[error("not enough valid shards: need {needed}, got {got}")]
    NotEnoughShards { needed: usize, got: usize },

    #[error("shard payload length {found} disagrees with {expected}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("shard uuid {found:08x} disagrees with {expected:08x}")]
    UuidMismatch { expected: u32, found: u32 },

    #[error("shard {0} absent after reconstruction")]
    MissingShard(usize),

    #[error("reed-solomon error: {0}")]
    ReedSolomon(#[from] reed_solomon_erasure::Error),
}

// ── Tests ────────────────────────────────────────────────────────────────────
