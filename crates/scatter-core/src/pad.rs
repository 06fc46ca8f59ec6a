//! Length-prefixed zero padding applied before a message is split into shards.
//!
//! Padded layout:
//!
//!   Length:2B LE | RawData:Length bytes | ZeroPad to the next multiple of Total
//!
//! The prefix is 16 bits wide but messages may be up to `65536 * Required`
//! bytes. The prefix therefore stores the length modulo 65536 and `unpad_data`
//! recovers the high bits from the size of the buffer it is given. The padding
//! window is always smaller than 65536 bytes, so there is exactly one length
//! congruent to the prefix that fits.

// ── Constants ────────────────────────────────────────────────────────────────

/// Size of the little-endian length prefix.
pub const LENGTH_PREFIX: usize = 2;

/// Per-data-shard message budget. A message may carry this many bytes for
/// every required shard.
pub const MAX_CHUNK: usize = 65536;

/// Largest message accepted for a code with `required` data shards.
pub fn max_message_len(required: usize) -> usize {
    MAX_CHUNK * required
}

// ── Padding ──────────────────────────────────────────────────────────────────

/// Prefix `data` with its length and zero-pad it to a multiple of `total`.
pub fn pad_data(data: &[u8], required: usize, total: usize) -> Result<Vec<u8>, PadError> {
    if required == 0 || total == 0 {
        return Err(PadError::InvalidShape { required, total });
    }
    if data.is_empty() {
        return Err(PadError::Empty);
    }
    let max = max_message_len(required);
    if data.len() > max {
        return Err(PadError::TooLarge {
            len: data.len(),
            max,
        });
    }

    let padded_len = (data.len() + LENGTH_PREFIX).div_ceil(total) * total;
    let mut out = Vec::with_capacity(padded_len);
    // Truncation to 16 bits is part of the format; see the module docs.
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
    out.resize(padded_len, 0);
    Ok(out)
}

/// Strip the padding applied by [`pad_data`], returning the original bytes.
///
/// `padded` may carry more trailing zeros than `pad_data` produced (the codec
/// rounds the data shards up to equal length); the recovered length is the
/// largest value congruent to the prefix that fits in the buffer.
pub fn unpad_data(padded: &[u8]) -> Result<&[u8], PadError> {
    if padded.len() < LENGTH_PREFIX {
        return Err(PadError::Truncated {
            declared: 0,
            available: padded.len(),
        });
    }
    let low = u16::from_le_bytes([padded[0], padded[1]]) as usize;
    let room = padded.len() - LENGTH_PREFIX;
    if low > room {
        return Err(PadError::Truncated {
            declared: low,
            available: room,
        });
    }

    let len = low + (room - low) / MAX_CHUNK * MAX_CHUNK;
    if len == 0 {
        return Err(PadError::Empty);
    }
    Ok(&padded[LENGTH_PREFIX..LENGTH_PREFIX + len])
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PadError {
    #[error("message is empty")]
    Empty,

    #[error("message of {len} bytes exceeds maximum {max}")]
    TooLarge { len: usize, max: usize },

    #[error("padded buffer declares {declared} bytes but only {available} remain")]
    Truncated { declared: usize, available: usize },

    #[error("invalid shard shape: required={required} total={total}")]
    InvalidShape { required: usize, total: usize },
}

// ── Tests ────────────────────────────────────────────────────────────────────
