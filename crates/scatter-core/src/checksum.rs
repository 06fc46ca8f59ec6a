//! Per-shard integrity checksum.
//!
//! Every datagram ends with an 8-byte checksum over all bytes preceding it:
//! the first eight bytes (little-endian u64) of a BLAKE3 keyed hash. The key
//! is an explicit constructor argument and defaults to all zeros.
//!
//! This detects transmission corruption. It does not authenticate the sender:
//! anyone who knows the key can produce valid shards.

use std::fmt;

/// Length of the trailing checksum in bytes.
pub const CHECKSUM_LEN: usize = 8;

/// Length of a checksum key in bytes.
pub const KEY_LEN: usize = 32;

// ── Key ──────────────────────────────────────────────────────────────────────

/// Key for the keyed hash. Both peers must use the same key.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ChecksumKey([u8; KEY_LEN]);

impl ChecksumKey {
    /// The all-zero key used when none is configured.
    pub const ZERO: ChecksumKey = ChecksumKey([0u8; KEY_LEN]);

    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key from 64 hex characters.
    pub fn from_hex(text: &str) -> Result<Self, ChecksumError> {
        let raw = hex::decode(text.trim()).map_err(|e| ChecksumError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = raw.try_into().map_err(|raw: Vec<u8>| {
            ChecksumError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", raw.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ChecksumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to tell keys apart in logs.
        write!(f, "ChecksumKey({}..)", &self.to_hex()[..8])
    }
}

// ── Checksum ─────────────────────────────────────────────────────────────────

/// Appends and verifies shard checksums under one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum {
    key: ChecksumKey,
}

impl Checksum {
    pub fn new(key: ChecksumKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &ChecksumKey {
        &self.key
    }

    /// Compute the 64-bit checksum of `data`.
    pub fn compute(&self, data: &[u8]) -> u64 {
        let digest = blake3::keyed_hash(self.key.as_bytes(), data);
        let mut word = [0u8; CHECKSUM_LEN];
        word.copy_from_slice(&digest.as_bytes()[..CHECKSUM_LEN]);
        u64::from_le_bytes(word)
    }

    /// Append the checksum of the current contents of `frame` in place.
    pub fn append(&self, frame: &mut Vec<u8>) {
        let sum = self.compute(frame);
        frame.extend_from_slice(&sum.to_le_bytes());
    }

    /// Return `shard ‖ checksum(shard)`.
    pub fn append_checksum(&self, shard: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(shard.len() + CHECKSUM_LEN);
        framed.extend_from_slice(shard);
        self.append(&mut framed);
        framed
    }

    /// Verify the trailing checksum and return the bytes it covers.
    ///
    /// Inputs of `CHECKSUM_LEN` bytes or fewer carry nothing to verify and are
    /// rejected.
    pub fn verify<'a>(&self, framed: &'a [u8]) -> Result<&'a [u8], ChecksumError> {
        if framed.len() <= CHECKSUM_LEN {
            return Err(ChecksumError::TooShort(framed.len()));
        }
        let (body, tail) = framed.split_at(framed.len() - CHECKSUM_LEN);
        let mut word = [0u8; CHECKSUM_LEN];
        word.copy_from_slice(tail);
        let stored = u64::from_le_bytes(word);
        let computed = self.compute(body);
        if stored != computed {
            return Err(ChecksumError::Mismatch { stored, computed });
        }
        Ok(body)
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChecksumError {
    #[error("input of {0} bytes is too short to carry a checksum")]
    TooShort(usize),

    #[error("checksum mismatch: stored 0x{stored:016x}, computed 0x{computed:016x}")]
    Mismatch { stored: u64, computed: u64 },

    #[error("invalid checksum key: {0}")]
    InvalidKey(String),
}

// ── Tests ────────────────────────────────────────────────────────────────────
