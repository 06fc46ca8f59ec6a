//! scatter-transport — erasure-coded message delivery over UDP.
//!
//! A [`Base`] owns one socket. `send` splits a message into shards and
//! transmits all of them; the receive pipeline collects shards per
//! (sender, UUID) and hands each reconstructed message to the registered
//! [`MessageHandler`] exactly once.

pub mod base;
pub mod bundle;
pub mod message;

pub use base::{Base, BaseConfig, TransportError};
pub use message::{Message, MessageHandler};
