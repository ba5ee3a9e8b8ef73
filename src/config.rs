//! Facilitator configuration.
//!
//! Settings come from a JSON file selected with `--config` (default
//! `facilitator.json`), except the signing key, which is only ever read from
//! the `X402_FACILITATOR_PRIVATE_KEY` environment variable and never
//! persisted. Configuration is validated once at startup and immutable
//! afterwards; validation failure is fatal before the server binds.

use alloy::signers::local::PrivateKeySigner;
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use crate::chain::ChainId;
use crate::types::{EvmAddress, SupportedKind};

const ENV_PRIVATE_KEY: &str = "X402_FACILITATOR_PRIVATE_KEY";

/// CLI arguments for the facilitator server.
#[derive(Parser, Debug)]
#[command(name = "tollgate-facilitator")]
#[command(about = "HTTP-402 payment facilitator server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long = "config", short = 'c', default_value = "facilitator.json")]
    config: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub networks: HashMap<ChainId, NetworkConfig>,
    pub supported: Vec<SupportedKind>,
    pub transaction: TransactionConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "config_defaults::default_host")]
    pub host: String,
    #[serde(default = "config_defaults::default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: config_defaults::default_host(),
            port: config_defaults::default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub rpc_url: Url,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionConfig {
    pub timeout_seconds: u64,
    /// Gas price ceiling in wei, as a decimal string. Settlement refuses to
    /// broadcast above it.
    pub max_gas_price: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The `tracing` filter directive for this level.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
}

mod config_defaults {
    use std::env;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";

    /// Default port: `$PORT` env var, then 8080.
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Default host: `$HOST` env var, then `0.0.0.0`.
    pub fn default_host() -> String {
        env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("invalid server port: 0")]
    InvalidPort,
    #[error("at least one network must be configured")]
    NoNetworks,
    #[error("supported network {0} is not defined in networks config")]
    UnknownSupportedNetwork(ChainId),
    #[error("transaction timeout must be positive")]
    NonPositiveTimeout,
    #[error("invalid max gas price {0:?}: expected a decimal wei amount")]
    InvalidMaxGasPrice(String),
    #[error("invalid host address {0:?}")]
    InvalidHost(String),
    #[error("{ENV_PRIVATE_KEY} environment variable required")]
    MissingPrivateKey,
    #[error("failed to parse private key: {0}")]
    InvalidPrivateKey(String),
}

impl FacilitatorConfig {
    /// Loads and validates configuration from the `--config` CLI argument.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        Self::load_from_path(&cli_args.config)
    }

    /// Loads and validates configuration from a specific file.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: FacilitatorConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Every referenced network must have an RPC
    /// endpoint, timing must be positive, and the gas ceiling must parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.server.host.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::InvalidHost(self.server.host.clone()));
        }
        if self.networks.is_empty() {
            return Err(ConfigError::NoNetworks);
        }
        for kind in &self.supported {
            if !self.networks.contains_key(&kind.network) {
                return Err(ConfigError::UnknownSupportedNetwork(kind.network.clone()));
            }
        }
        if self.transaction.timeout_seconds == 0 {
            return Err(ConfigError::NonPositiveTimeout);
        }
        self.max_gas_price_wei()?;
        Ok(())
    }

    /// The gas price ceiling as wei.
    pub fn max_gas_price_wei(&self) -> Result<u128, ConfigError> {
        let raw = &self.transaction.max_gas_price;
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::InvalidMaxGasPrice(raw.clone()));
        }
        raw.parse()
            .map_err(|_| ConfigError::InvalidMaxGasPrice(raw.clone()))
    }

    /// RPC endpoints keyed by network, for the provider cache.
    pub fn rpc_urls(&self) -> HashMap<ChainId, Url> {
        self.networks
            .iter()
            .map(|(network, config)| (network.clone(), config.rpc_url.clone()))
            .collect()
    }
}

/// The facilitator's on-chain identity: a secp256k1 key loaded from the
/// environment once at startup, with its address derived and cached.
#[derive(Debug, Clone)]
pub struct SignerConfig {
    pub signer: PrivateKeySigner,
    pub address: EvmAddress,
}

impl SignerConfig {
    /// Reads `X402_FACILITATOR_PRIVATE_KEY` (32-byte hex scalar, optional
    /// `0x` prefix). Required for the facilitator to start.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = env::var(ENV_PRIVATE_KEY).map_err(|_| ConfigError::MissingPrivateKey)?;
        Self::from_key_str(&raw)
    }

    pub fn from_key_str(raw: &str) -> Result<Self, ConfigError> {
        let signer = PrivateKeySigner::from_str(raw.trim_start_matches("0x"))
            .map_err(|e| ConfigError::InvalidPrivateKey(e.to_string()))?;
        let address = EvmAddress(signer.address());
        Ok(Self { signer, address })
    }
}
