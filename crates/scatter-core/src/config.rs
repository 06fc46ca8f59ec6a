//! Configuration system for Scatter.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SCATTER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/scatter/config.toml
//!   3. ~/.config/scatter/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checksum::{Checksum, ChecksumKey, KEY_LEN};
use crate::codec::{Codec, CodecError};
use crate::wire::{
    DEFAULT_BUNDLE_TIMEOUT_MS, DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUIRED,
    DEFAULT_SOCKET_BUFFER_SIZE, DEFAULT_SPENT_RETENTION_MS, DEFAULT_TOTAL, MAX_TOTAL,
    MIN_DATAGRAM_LEN,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScatterConfig {
    pub network: NetworkConfig,
    pub codec: CodecConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local UDP address, "host:port". Port 0 = OS-assigned.
    pub listen: String,
    /// Bytes read per datagram. Longer datagrams are truncated and then fail
    /// their checksum.
    pub socket_buffer_size: usize,
    /// SO_RCVBUF for the socket. 0 = leave the OS default.
    pub os_recv_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Shards needed to reconstruct a message.
    pub required: usize,
    /// Shards sent per message.
    pub total: usize,
    /// Checksum key, 64 hex characters. Both peers must agree.
    pub checksum_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of the packet and decode queues.
    pub queue_capacity: usize,
    /// How long a partial bundle may wait for more shards.
    pub bundle_timeout_ms: u64,
    /// How long a delivered bundle absorbs late shards.
    pub spent_retention_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7946".to_string(),
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            os_recv_buffer: 0,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            required: DEFAULT_REQUIRED,
            total: DEFAULT_TOTAL,
            checksum_key: ChecksumKey::ZERO.to_hex(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            bundle_timeout_ms: DEFAULT_BUNDLE_TIMEOUT_MS,
            spent_retention_ms: DEFAULT_SPENT_RETENTION_MS,
        }
    }
}

impl PipelineConfig {
    pub fn bundle_timeout(&self) -> Duration {
        Duration::from_millis(self.bundle_timeout_ms)
    }

    pub fn spent_retention(&self) -> Duration {
        Duration::from_millis(self.spent_retention_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("scatter")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ScatterConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read `path` if it exists, otherwise start from defaults. No env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(ScatterConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SCATTER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&ScatterConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let CodecConfig {
            required, total, ..
        } = self.codec;
        if required == 0 || required >= total || total > MAX_TOTAL {
            return Err(ConfigError::Invalid(format!(
                "codec needs 1 <= required < total <= {MAX_TOTAL}, got {required}/{total}"
            )));
        }
        if self.network.socket_buffer_size < MIN_DATAGRAM_LEN {
            return Err(ConfigError::Invalid(format!(
                "socket_buffer_size {} is below the minimum datagram size {MIN_DATAGRAM_LEN}",
                self.network.socket_buffer_size
            )));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be positive".into()));
        }
        if self.pipeline.bundle_timeout_ms == 0 {
            return Err(ConfigError::Invalid("bundle_timeout_ms must be positive".into()));
        }
        self.checksum_key()?;
        Ok(())
    }

    /// Parsed checksum key. An empty string means the all-zero key.
    pub fn checksum_key(&self) -> Result<ChecksumKey, ConfigError> {
        let text = self.codec.checksum_key.trim();
        if text.is_empty() {
            return Ok(ChecksumKey::ZERO);
        }
        ChecksumKey::from_hex(text).map_err(|e| {
            ConfigError::Invalid(format!("checksum_key ({} hex bytes expected): {e}", KEY_LEN))
        })
    }

    /// Build the codec described by the `[codec]` section.
    pub fn build_codec(&self) -> Result<Codec, ConfigError> {
        let checksum = Checksum::new(self.checksum_key()?);
        Codec::with_checksum(self.codec.required, self.codec.total, checksum)
            .map_err(|e: CodecError| ConfigError::Invalid(e.to_string()))
    }

    /// Apply SCATTER_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `SCATTER_<SECTION>__<FIELD>` overrides from `lookup`. Values that
    /// fail to parse are logged and skipped.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SCATTER_NETWORK__LISTEN") {
            self.network.listen = v;
        }
        override_parsed(
            &lookup,
            "SCATTER_NETWORK__SOCKET_BUFFER_SIZE",
            &mut self.network.socket_buffer_size,
        );
        override_parsed(
            &lookup,
            "SCATTER_NETWORK__OS_RECV_BUFFER",
            &mut self.network.os_recv_buffer,
        );
        override_parsed(&lookup, "SCATTER_CODEC__REQUIRED", &mut self.codec.required);
        override_parsed(&lookup, "SCATTER_CODEC__TOTAL", &mut self.codec.total);
        if let Some(v) = lookup("SCATTER_CODEC__CHECKSUM_KEY") {
            self.codec.checksum_key = v;
        }
        override_parsed(
            &lookup,
            "SCATTER_PIPELINE__QUEUE_CAPACITY",
            &mut self.pipeline.queue_capacity,
        );
        override_parsed(
            &lookup,
            "SCATTER_PIPELINE__BUNDLE_TIMEOUT_MS",
            &mut self.pipeline.bundle_timeout_ms,
        );
        override_parsed(
            &lookup,
            "SCATTER_PIPELINE__SPENT_RETENTION_MS",
            &mut self.pipeline.spent_retention_ms,
        );
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    field: &mut T,
) where
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(name) else { return };
    match raw.trim().parse() {
        Ok(value) => *field = value,
        Err(e) => tracing::warn!(
            var = name,
            value = %raw,
            error = %e,
            "ignoring unparsable env override"
        ),
    }
}
