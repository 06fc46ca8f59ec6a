//! Base — the UDP endpoint and its receive pipeline.
//!
//! `start` binds the socket and spawns three tasks joined by bounded queues:
//!
//!   reader ──Packet──▶ router ──DecodeJob──▶ reassembler ──▶ handler
//!                        ▲                        │
//!                        └──────(key, outcome)────┘
//!
//! The reader verifies each datagram and drops the bad ones. The router owns
//! the bundle table and sweeps it on a timer. The reassembler decodes and
//! hands each message to the handler on the blocking pool. Outcomes flow
//! back to the router over an unbounded channel; there is at most one
//! outstanding job per bundle, and the reassembler never waits on the router.
//!
//! All tasks watch one broadcast shutdown signal. `stop` fires it and waits
//! for the tasks, dropping any partial bundles.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use scatter_core::wire::{MAX_DATAGRAM_LEN, MIN_DATAGRAM_LEN};
use scatter_core::{Codec, CodecError, ConfigError, ScatterConfig, ShardFrame};

use crate::bundle::{Admission, BundleKey, BundleTable, DecodeJob, DecodeOutcome};
use crate::message::{uuid_hex, Message, MessageHandler, Packet};

// ── Configuration ────────────────────────────────────────────────────────────

pub struct BaseConfig {
    pub handler: Arc<dyn MessageHandler>,
    /// Local address to bind, "host:port".
    pub listen: String,
    pub codec: Arc<Codec>,
    /// Bytes read per datagram.
    pub socket_buffer_size: usize,
    /// Capacity of the packet and decode-job queues.
    pub queue_capacity: usize,
    /// Latency budget for a partial bundle.
    pub bundle_timeout: Duration,
    /// How long a delivered bundle absorbs late shards.
    pub spent_retention: Duration,
    /// SO_RCVBUF override. None = OS default.
    pub os_recv_buffer: Option<usize>,
}

impl BaseConfig {
    /// Config with default buffer, queue and timing settings.
    pub fn new(handler: impl MessageHandler, listen: impl Into<String>, codec: Codec) -> Self {
        let defaults = ScatterConfig::default();
        Self {
            handler: Arc::new(handler),
            listen: listen.into(),
            codec: Arc::new(codec),
            socket_buffer_size: defaults.network.socket_buffer_size,
            queue_capacity: defaults.pipeline.queue_capacity,
            bundle_timeout: defaults.pipeline.bundle_timeout(),
            spent_retention: defaults.pipeline.spent_retention(),
            os_recv_buffer: None,
        }
    }

    pub fn from_config(
        config: &ScatterConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        Ok(Self {
            handler,
            listen: config.network.listen.clone(),
            codec: Arc::new(config.build_codec()?),
            socket_buffer_size: config.network.socket_buffer_size,
            queue_capacity: config.pipeline.queue_capacity,
            bundle_timeout: config.pipeline.bundle_timeout(),
            spent_retention: config.pipeline.spent_retention(),
            os_recv_buffer: (config.network.os_recv_buffer > 0)
                .then_some(config.network.os_recv_buffer),
        })
    }
}

// ── Base ─────────────────────────────────────────────────────────────────────

struct Running {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Base {
    config: BaseConfig,
    running: Mutex<Option<Running>>,
}

impl Base {
    pub fn new(config: BaseConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.config.codec
    }

    /// Bind the socket and launch the pipeline. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, TransportError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let listen = &self.config.listen;
        let addr = tokio::net::lookup_host(listen.as_str())
            .await
            .map_err(|source| TransportError::Resolve {
                addr: listen.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| TransportError::NoAddress(listen.clone()))?;

        let std_socket = bind_socket(addr, self.config.os_recv_buffer)
            .map_err(|source| TransportError::Bind { addr, source })?;
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;
        let socket = Arc::new(socket);

        let capacity = self.config.queue_capacity.max(1);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let (packet_tx, packet_rx) = mpsc::channel::<Packet>(capacity);
        let (job_tx, job_rx) = mpsc::channel::<DecodeJob>(capacity);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel::<(BundleKey, DecodeOutcome)>();

        let codec = self.config.codec.clone();
        let table = BundleTable::new(
            codec.required(),
            codec.total(),
            self.config.bundle_timeout,
            self.config.spent_retention,
        );
        let sweep = (self.config.bundle_timeout / 4).max(Duration::from_millis(1));

        let tasks = vec![
            tokio::spawn(reader_loop(
                socket.clone(),
                codec.clone(),
                self.config.socket_buffer_size.max(MIN_DATAGRAM_LEN),
                packet_tx,
                shutdown_tx.subscribe(),
            )),
            tokio::spawn(router_loop(
                table,
                packet_rx,
                job_tx,
                outcome_rx,
                sweep,
                shutdown_tx.subscribe(),
            )),
            tokio::spawn(reassembler_loop(
                codec.clone(),
                self.config.handler.clone(),
                job_rx,
                outcome_tx,
                shutdown_tx.subscribe(),
            )),
        ];

        tracing::info!(
            addr = %local_addr,
            required = codec.required(),
            total = codec.total(),
            "scatter transport started"
        );

        *running = Some(Running {
            socket,
            local_addr,
            shutdown: shutdown_tx,
            tasks,
        });
        Ok(local_addr)
    }

    /// Signal every stage to stop and wait for them. Partial bundles are lost.
    pub async fn stop(&self) -> Result<(), TransportError> {
        let running = self
            .running
            .lock()
            .await
            .take()
            .ok_or(TransportError::NotStarted)?;

        let _ = running.shutdown.send(());
        for task in running.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "pipeline task ended abnormally");
            }
        }
        tracing::info!(addr = %running.local_addr, "scatter transport stopped");
        Ok(())
    }

    pub async fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.local_addr)
            .ok_or(TransportError::NotStarted)
    }

    /// Encode `data` and transmit all shards to `peer`.
    ///
    /// Nothing is written if encoding fails or the shards would not fit in a
    /// UDP datagram.
    pub async fn send(&self, data: &[u8], peer: SocketAddr) -> Result<(), TransportError> {
        let socket = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|r| r.socket.clone())
            .ok_or(TransportError::NotStarted)?;

        let shards = self.config.codec.encode(data)?;
        let len = shards.first().map_or(0, Vec::len);
        if len > MAX_DATAGRAM_LEN {
            return Err(TransportError::DatagramTooLarge {
                len,
                max: MAX_DATAGRAM_LEN,
            });
        }

        for shard in &shards {
            socket
                .send_to(shard, peer)
                .await
                .map_err(|source| TransportError::Send { peer, source })?;
        }
        tracing::trace!(peer = %peer, len = data.len(), shards = shards.len(), "message sent");
        Ok(())
    }
}

/// Create a nonblocking UDP socket bound to `addr`.
fn bind_socket(addr: SocketAddr, recv_buffer: Option<usize>) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if let Some(size) = recv_buffer {
        socket.set_recv_buffer_size(size)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

// ── Pipeline stages ──────────────────────────────────────────────────────────

async fn reader_loop(
    socket: Arc<UdpSocket>,
    codec: Arc<Codec>,
    buffer_size: usize,
    packet_tx: mpsc::Sender<Packet>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; buffer_size];

    loop {
        let (len, sender) = tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("reader shutting down");
                return;
            }
            result = socket.recv_from(&mut buf) => match result {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "recv_from failed");
                    continue;
                }
            },
        };

        let datagram = &buf[..len];
        let (uuid, shard_index) = match ShardFrame::open(datagram, codec.checksum()) {
            Ok(frame) => (frame.uuid, frame.shard_index),
            Err(e) => {
                tracing::trace!(sender = %sender, len, error = %e, "dropping datagram");
                continue;
            }
        };
        if shard_index as usize >= codec.total() {
            tracing::trace!(sender = %sender, shard_index, "shard index out of range, dropping");
            continue;
        }

        let packet = Packet {
            sender,
            uuid,
            shard_index,
            datagram: Bytes::copy_from_slice(datagram),
            received_at: Instant::now(),
        };

        // Waiting here applies backpressure to the socket.
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("reader shutting down");
                return;
            }
            result = packet_tx.send(packet) => {
                if result.is_err() {
                    return;
                }
            }
        }
    }
}

async fn router_loop(
    mut table: BundleTable,
    mut packet_rx: mpsc::Receiver<Packet>,
    job_tx: mpsc::Sender<DecodeJob>,
    mut outcome_rx: mpsc::UnboundedReceiver<(BundleKey, DecodeOutcome)>,
    sweep: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(sweep);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let job = tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(bundles = table.len(), "router shutting down");
                return;
            }

            packet = packet_rx.recv() => {
                let Some(packet) = packet else { return };
                let (uuid, sender) = (packet.uuid, packet.sender);
                match table.accept(packet) {
                    Admission::Ready(job) => Some(job),
                    Admission::Collecting { have, required } => {
                        tracing::trace!(uuid = %uuid_hex(uuid), sender = %sender, have, required, "shard stored");
                        None
                    }
                    Admission::Ignored => None,
                }
            }

            Some((key, outcome)) = outcome_rx.recv() => {
                table.resolve(key, outcome, Instant::now())
            }

            _ = interval.tick() => {
                let evicted = table.evict_expired(Instant::now());
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = table.len(), "swept bundle table");
                }
                None
            }
        };

        if let Some(job) = job {
            if job_tx.send(job).await.is_err() {
                return;
            }
        }
    }
}

async fn reassembler_loop(
    codec: Arc<Codec>,
    handler: Arc<dyn MessageHandler>,
    mut job_rx: mpsc::Receiver<DecodeJob>,
    outcome_tx: mpsc::UnboundedSender<(BundleKey, DecodeOutcome)>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("reassembler shutting down");
                return;
            }
            job = job_rx.recv() => match job {
                Some(job) => job,
                None => return,
            },
        };

        let key = job.key;
        let shards = job.shards.len();
        let started_at = job.started_at;
        // Reconstruction is CPU-bound; keep it off the async workers.
        let decoder = codec.clone();
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(&job.shards)).await;
        let decoded = match decoded {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(uuid = %uuid_hex(key.uuid), error = %e, "decode task failed");
                let _ = outcome_tx.send((key, DecodeOutcome::Failed));
                continue;
            }
        };
        let outcome = match decoded {
            Ok(data) => {
                let message = Message {
                    sender: key.sender,
                    uuid: key.uuid,
                    received_at: started_at,
                    data: Bytes::from(data),
                };
                tracing::debug!(
                    uuid = %message.uuid_hex(),
                    sender = %message.sender,
                    len = message.data.len(),
                    shards,
                    "message delivered"
                );
                let handler = handler.clone();
                tokio::task::spawn_blocking(move || handler.handle(message));
                DecodeOutcome::Delivered
            }
            Err(e) => {
                tracing::debug!(
                    uuid = %uuid_hex(key.uuid),
                    sender = %key.sender,
                    shards,
                    error = %e,
                    "decode failed"
                );
                DecodeOutcome::Failed
            }
        };

        if outcome_tx.send((key, outcome)).is_err() {
            return;
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport already started")]
    AlreadyStarted,

    #[error("transport not started")]
    NotStarted,

    #[error("failed to resolve {addr}: {source}")]
    Resolve { addr: String, source: io::Error },

    #[error("no address found for {0}")]
    NoAddress(String),

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("send to {peer} failed: {source}")]
    Send { peer: SocketAddr, source: io::Error },

    #[error("shard datagram of {len} bytes exceeds UDP limit {max}")]
    DatagramTooLarge { len: usize, max: usize },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ── Tests ────────────────────────────────────────────────────────────────────
