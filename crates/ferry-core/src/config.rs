//! Configuration for Ferry endpoints.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FERRY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ferry/config.toml
//!   3. ~/.config/ferry/config.toml
//!
//! Sessions receive an immutable snapshot of these values at construction;
//! nothing in the protocol core reads configuration after that.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::MAX_PAYLOAD;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP address the server listens on.
    pub listen_addr: String,
    /// Directory the server serves files from. Requests never escape it.
    pub root_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address downloads go to unless overridden on the command line.
    pub server_addr: String,
    /// Directory completed downloads are written into.
    pub output_dir: PathBuf,
}

/// Knobs of the stop-and-wait exchange, shared by both endpoints.
/// Both sides must agree on nothing here except that max_payload fits in
/// the 16-bit length field — the receiver takes segment sizes from the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// How long to wait for a response before charging the retry budget.
    pub timeout_ms: u64,
    /// Retries per segment beyond the first transmission. 0 = one shot.
    pub max_retries: u32,
    /// Largest DATA payload the server will put in one datagram.
    pub max_payload: usize,
}

impl TransferConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for FerryConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:4433".to_string(),
            root_path: data_dir().join("files"),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4433".to_string(),
            output_dir: data_dir().join("downloads"),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 500,
            max_retries: 10,
            max_payload: 1024,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ferry")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("ferry")
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
    #[error("max_payload must be between 1 and {}, got {0}", MAX_PAYLOAD)]
    InvalidMaxPayload(usize),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FerryConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            FerryConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FERRY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&FerryConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// A segment size of zero cannot make progress, and one above the
    /// 16-bit length field cannot be framed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.max_payload == 0 || self.transfer.max_payload > MAX_PAYLOAD {
            return Err(ConfigError::InvalidMaxPayload(self.transfer.max_payload));
        }
        Ok(())
    }

    /// Apply FERRY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FERRY_SERVER__LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Ok(v) = std::env::var("FERRY_SERVER__ROOT_PATH") {
            self.server.root_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FERRY_CLIENT__SERVER_ADDR") {
            self.client.server_addr = v;
        }
        if let Ok(v) = std::env::var("FERRY_CLIENT__OUTPUT_DIR") {
            self.client.output_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FERRY_TRANSFER__TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.transfer.timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("FERRY_TRANSFER__MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                self.transfer.max_retries = n;
            }
        }
        if let Ok(v) = std::env::var("FERRY_TRANSFER__MAX_PAYLOAD") {
            if let Ok(n) = v.parse() {
                self.transfer.max_payload = n;
            }
        }
    }
}
