//! scatter-core — wire format, padding, checksum and erasure codec.
//! The transport crate and the daemon depend on this one.

pub mod checksum;
pub mod codec;
pub mod config;
pub mod pad;
pub mod wire;

pub use checksum::{Checksum, ChecksumError, ChecksumKey};
pub use codec::{Codec, CodecError, Shard};
pub use config::{ConfigError, ScatterConfig};
pub use wire::{ShardFrame, WireError};
