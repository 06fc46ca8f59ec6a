//! Bundle table — per-(sender, UUID) shard accumulation.
//!
//! Owned by the router task alone. Each bundle moves through
//! `Collecting → Decodable → Delivered`, or is evicted while still
//! `Collecting` once the latency budget runs out. The budget is enforced by
//! the periodic sweep and again on every accepted shard, so a bundle can never
//! complete after its deadline. A failed decode sends the bundle back to
//! `Collecting`; within the budget it is resubmitted as soon as it holds more
//! shards than the failed attempt had.
//!
//! Delivered bundles drop their shards but stay in the table for the spent
//! retention window, so late shards of a delivered message are absorbed
//! instead of opening a fresh bundle.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::message::{uuid_hex, Packet};

/// Identifies one in-flight message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BundleKey {
    pub sender: SocketAddr,
    pub uuid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Collecting,
    /// A decode job holding `submitted` shards is outstanding.
    Decodable { submitted: usize },
    Delivered { at: Instant },
}

#[derive(Debug)]
struct Bundle {
    started_at: Instant,
    shards: Vec<Option<Bytes>>,
    valid: usize,
    state: BundleState,
}

impl Bundle {
    fn job(&self, key: BundleKey) -> DecodeJob {
        DecodeJob {
            key,
            started_at: self.started_at,
            shards: self.shards.iter().flatten().cloned().collect(),
        }
    }
}

/// Shards handed to the reassembler for one decode attempt.
#[derive(Debug, Clone)]
pub struct DecodeJob {
    pub key: BundleKey,
    pub started_at: Instant,
    pub shards: Vec<Bytes>,
}

/// Result of a decode attempt, reported back to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    Delivered,
    Failed,
}

/// What the table did with an incoming packet.
#[derive(Debug)]
pub enum Admission {
    /// Duplicate, out of range, or belongs to a delivered message.
    Ignored,
    /// Stored; not yet enough shards for a decode attempt.
    Collecting { have: usize, required: usize },
    /// Stored and the bundle just became decodable.
    Ready(DecodeJob),
}

pub struct BundleTable {
    bundles: HashMap<BundleKey, Bundle>,
    required: usize,
    total: usize,
    timeout: Duration,
    spent_retention: Duration,
}

impl BundleTable {
    pub fn new(required: usize, total: usize, timeout: Duration, spent_retention: Duration) -> Self {
        Self {
            bundles: HashMap::new(),
            required,
            total,
            timeout,
            spent_retention,
        }
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn state(&self, key: &BundleKey) -> Option<BundleState> {
        self.bundles.get(key).map(|b| b.state)
    }

    /// Merge a packet into its bundle.
    pub fn accept(&mut self, packet: Packet) -> Admission {
        let index = packet.shard_index as usize;
        if index >= self.total {
            return Admission::Ignored;
        }
        let key = BundleKey {
            sender: packet.sender,
            uuid: packet.uuid,
        };
        // A collecting bundle past its window is dead even if the sweep has
        // not reached it yet; this packet starts a fresh one.
        let expired = self.bundles.get(&key).is_some_and(|b| {
            b.state == BundleState::Collecting
                && packet.received_at.saturating_duration_since(b.started_at) >= self.timeout
        });
        if expired {
            if let Some(stale) = self.bundles.remove(&key) {
                tracing::debug!(
                    uuid = %uuid_hex(key.uuid),
                    sender = %key.sender,
                    have = stale.valid,
                    "bundle expired"
                );
            }
        }

        let total = self.total;
        let bundle = self.bundles.entry(key).or_insert_with(|| Bundle {
            started_at: packet.received_at,
            shards: vec![None; total],
            valid: 0,
            state: BundleState::Collecting,
        });

        if matches!(bundle.state, BundleState::Delivered { .. }) {
            tracing::trace!(uuid = %uuid_hex(key.uuid), sender = %key.sender, "late shard for delivered message");
            return Admission::Ignored;
        }
        if bundle.shards[index].is_some() {
            tracing::trace!(uuid = %uuid_hex(key.uuid), shard_index = index, "duplicate shard");
            return Admission::Ignored;
        }
        bundle.shards[index] = Some(packet.datagram);
        bundle.valid += 1;

        match bundle.state {
            BundleState::Collecting if bundle.valid >= self.required => {
                bundle.state = BundleState::Decodable {
                    submitted: bundle.valid,
                };
                Admission::Ready(bundle.job(key))
            }
            _ => Admission::Collecting {
                have: bundle.valid,
                required: self.required,
            },
        }
    }

    /// Record the outcome of a decode job. Returns a follow-up job when the
    /// attempt failed, more shards have arrived since it was submitted, and
    /// the bundle is still inside its latency window.
    pub fn resolve(&mut self, key: BundleKey, outcome: DecodeOutcome, now: Instant) -> Option<DecodeJob> {
        let bundle = self.bundles.get_mut(&key)?;
        match outcome {
            DecodeOutcome::Delivered => {
                bundle.state = BundleState::Delivered { at: now };
                bundle.shards = Vec::new();
                None
            }
            DecodeOutcome::Failed => {
                let submitted = match bundle.state {
                    BundleState::Decodable { submitted } => submitted,
                    _ => return None,
                };
                if now.saturating_duration_since(bundle.started_at) >= self.timeout {
                    // Out of time; leave it for the sweep.
                    bundle.state = BundleState::Collecting;
                    None
                } else if bundle.valid > submitted {
                    tracing::debug!(
                        uuid = %uuid_hex(key.uuid),
                        have = bundle.valid,
                        "retrying decode with more shards"
                    );
                    bundle.state = BundleState::Decodable {
                        submitted: bundle.valid,
                    };
                    Some(bundle.job(key))
                } else {
                    bundle.state = BundleState::Collecting;
                    None
                }
            }
        }
    }

    /// Drop collecting bundles past the latency budget and delivered markers
    /// past the retention window. Bundles with a decode outstanding are kept.
    /// Returns the number of bundles removed.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let retention = self.spent_retention;
        let before = self.bundles.len();
        self.bundles.retain(|key, bundle| match bundle.state {
            BundleState::Collecting => {
                let keep = now.saturating_duration_since(bundle.started_at) < timeout;
                if !keep {
                    tracing::debug!(
                        uuid = %uuid_hex(key.uuid),
                        sender = %key.sender,
                        have = bundle.valid,
                        "bundle expired"
                    );
                }
                keep
            }
            BundleState::Decodable { .. } => true,
            BundleState::Delivered { at } => now.saturating_duration_since(at) < retention,
        });
        before - self.bundles.len()
    }
}
