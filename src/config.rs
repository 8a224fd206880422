use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use crate::guard::{DEFAULT_GUARD_CACHE_SIZE, DEFAULT_GUARD_TTL_SECS};
use crate::writers::DEFAULT_SUBMIT_TIMEOUT;

/// Main configuration for the relayer
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub database: DatabaseConfig,
    pub relayer: RelayerConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Source ledger: where `TokensLocked` events are read
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub rpc_url: String,
    pub bridge_address: String,
    #[serde(default = "default_finality_blocks")]
    pub finality_blocks: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Largest block span requested in a single getLogs call
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    /// First block to scan when no cursor has been journaled
    #[serde(default)]
    pub start_block: Option<u64>,
}

/// Destination ledger: where release attestations are submitted
#[derive(Clone, Deserialize)]
pub struct DestinationConfig {
    pub rpc_url: String,
    pub bridge_address: String,
    /// Relayer signing key; also pays for release transactions
    pub private_key: String,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("rpc_url", &self.rpc_url)
            .field("bridge_address", &self.bridge_address)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Database configuration. Without a URL the journal lives in memory.
#[derive(Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Pipeline and replay guard tuning
#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound on one submission, receipt wait included
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_guard_cache_size")]
    pub guard_cache_size: usize,
    #[serde(default = "default_guard_ttl_secs")]
    pub guard_ttl_secs: u64,
    /// Re-enqueue journaled `failed` releases at startup
    #[serde(default)]
    pub resubmit_failed_on_start: bool,
}

/// HTTP API (health, metrics, status)
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind")]
    pub bind: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(eyre!("Unknown LOG_FORMAT: {}", other)),
        }
    }
}

/// Default functions
fn default_finality_blocks() -> u64 {
    1
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_block_range() -> u64 {
    2000
}

fn default_max_in_flight() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_submit_timeout_secs() -> u64 {
    DEFAULT_SUBMIT_TIMEOUT.as_secs()
}

fn default_guard_cache_size() -> usize {
    DEFAULT_GUARD_CACHE_SIZE
}

fn default_guard_ttl_secs() -> u64 {
    DEFAULT_GUARD_TTL_SECS
}

fn default_api_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    9090
}

/// Read an optional variable; unparsable values fall back to the default
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| eyre!("{} environment variable is required", key))
}

fn parse_address(field: &str, value: &str) -> Result<Address> {
    if value.len() != 42 || !value.starts_with("0x") {
        return Err(eyre!(
            "{} must be a valid hex address (42 chars with 0x prefix)",
            field
        ));
    }
    Address::from_str(value).wrap_err_with(|| format!("{} is not a valid address", field))
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let source = SourceConfig {
            rpc_url: env_required("SOURCE_RPC_URL")?,
            bridge_address: env_required("SOURCE_BRIDGE_ADDRESS")?,
            finality_blocks: env_parse("FINALITY_BLOCKS").unwrap_or(default_finality_blocks()),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS").unwrap_or(default_poll_interval()),
            max_block_range: env_parse("MAX_BLOCK_RANGE").unwrap_or(default_max_block_range()),
            start_block: env_parse("START_BLOCK"),
        };

        let destination = DestinationConfig {
            rpc_url: env_required("DEST_RPC_URL")?,
            bridge_address: env_required("DEST_BRIDGE_ADDRESS")?,
            private_key: env_required("RELAYER_PRIVATE_KEY")?,
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").ok().filter(|u| !u.trim().is_empty()),
        };

        let relayer = RelayerConfig {
            max_in_flight: env_parse("MAX_IN_FLIGHT").unwrap_or(default_max_in_flight()),
            queue_capacity: env_parse("QUEUE_CAPACITY").unwrap_or(default_queue_capacity()),
            submit_timeout_secs: env_parse("SUBMIT_TIMEOUT_SECS")
                .unwrap_or(default_submit_timeout_secs()),
            guard_cache_size: env_parse("GUARD_CACHE_SIZE").unwrap_or(default_guard_cache_size()),
            guard_ttl_secs: env_parse("GUARD_TTL_SECS").unwrap_or(default_guard_ttl_secs()),
            resubmit_failed_on_start: env_parse("RESUBMIT_FAILED_ON_START").unwrap_or(false),
        };

        let api = ApiConfig {
            bind: env::var("API_BIND").unwrap_or_else(|_| default_api_bind()),
            port: env_parse("API_PORT").unwrap_or(default_api_port()),
        };

        let log_format = match env::var("LOG_FORMAT") {
            Ok(v) => v.parse()?,
            Err(_) => LogFormat::default(),
        };

        let config = Config {
            source,
            destination,
            database,
            relayer,
            api,
            log_format,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.source.rpc_url.is_empty() {
            return Err(eyre!("source.rpc_url cannot be empty"));
        }
        if self.destination.rpc_url.is_empty() {
            return Err(eyre!("destination.rpc_url cannot be empty"));
        }

        let source = parse_address("source.bridge_address", &self.source.bridge_address)?;
        let destination =
            parse_address("destination.bridge_address", &self.destination.bridge_address)?;

        // An attestation is bound to one destination deployment; relaying a
        // bridge onto itself is always a misconfiguration.
        if source == destination {
            return Err(eyre!(
                "source and destination bridge addresses must differ ({})",
                source
            ));
        }

        if self.destination.private_key.len() != 66
            || !self.destination.private_key.starts_with("0x")
        {
            return Err(eyre!(
                "destination.private_key must be 66 chars (0x + 64 hex chars)"
            ));
        }

        if self.source.max_block_range == 0 {
            return Err(eyre!("source.max_block_range must be greater than 0"));
        }
        if self.relayer.max_in_flight == 0 {
            return Err(eyre!("relayer.max_in_flight must be greater than 0"));
        }
        if self.relayer.queue_capacity == 0 {
            return Err(eyre!("relayer.queue_capacity must be greater than 0"));
        }
        if self.relayer.submit_timeout_secs == 0 {
            return Err(eyre!("relayer.submit_timeout_secs must be greater than 0"));
        }
        if self.relayer.guard_cache_size == 0 {
            return Err(eyre!("relayer.guard_cache_size must be greater than 0"));
        }
        if self.relayer.guard_ttl_secs == 0 {
            return Err(eyre!("relayer.guard_ttl_secs must be greater than 0"));
        }

        self.api_addr()?;
        Ok(())
    }

    pub fn source_bridge(&self) -> Result<Address> {
        parse_address("source.bridge_address", &self.source.bridge_address)
    }

    pub fn destination_bridge(&self) -> Result<Address> {
        parse_address("destination.bridge_address", &self.destination.bridge_address)
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api.bind, self.api.port)
            .parse()
            .wrap_err_with(|| format!("Invalid API bind address {}:{}", self.api.bind, self.api.port))
    }
}
