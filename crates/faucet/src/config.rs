//! Faucet configuration

use drip_common::utils::config::load_config;
use drip_common::utils::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Keypair, signer::Signer};
use std::fmt;
use std::num::NonZeroU32;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";
pub const DEFAULT_TOKENS_PER_REQUEST: u64 = 200;
pub const DEFAULT_MAX_REQUESTS_PER_WINDOW: u32 = 1;
pub const DEFAULT_QUOTA_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Startup configuration problems. The process must not start with any of these.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("FAUCET_PRIVATE_KEY environment variable is required")]
    MissingPrivateKey,

    #[error("Invalid FAUCET_PRIVATE_KEY format: {0}")]
    InvalidPrivateKey(String),

    #[error("TOKEN_MINT_ADDRESS environment variable is required")]
    MissingMint,

    #[error("Invalid TOKEN_MINT_ADDRESS: {0}")]
    InvalidMint(String),

    #[error("Invalid commitment level: {0}")]
    InvalidCommitment(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Faucet service configuration, as read from file, environment and CLI.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// Server address
    pub server_addr: String,

    /// RPC endpoint of the Solana cluster
    pub rpc_url: String,

    /// Commitment level used for reads and confirmations
    pub commitment: String,

    /// Mint of the token being dispensed
    pub token_mint: Option<String>,

    /// Funding account secret key, JSON byte array or base58
    #[serde(skip_serializing)]
    pub private_key: Option<String>,

    /// Whole tokens transferred per successful request
    pub tokens_per_request: u64,

    /// Successful requests allowed per identity within one quota window
    pub max_requests_per_window: u32,

    /// Quota window length in seconds
    pub quota_window_secs: u64,

    /// Interval of the background sweep of expired quota records; disabled when unset
    pub sweep_interval_secs: Option<u64>,

    /// Process-wide cap on dispense attempts per minute; disabled when unset
    pub global_requests_per_minute: Option<u32>,

    /// Enable CORS
    pub cors_enabled: bool,

    pub logging: LoggingConfig,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:3000".to_string(),
            rpc_url: DEFAULT_RPC_URL.to_string(),
            commitment: "confirmed".to_string(),
            token_mint: None,
            private_key: None,
            tokens_per_request: DEFAULT_TOKENS_PER_REQUEST,
            max_requests_per_window: DEFAULT_MAX_REQUESTS_PER_WINDOW,
            quota_window_secs: DEFAULT_QUOTA_WINDOW_SECS,
            sweep_interval_secs: None,
            global_requests_per_minute: None,
            cors_enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl fmt::Debug for FaucetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaucetConfig")
            .field("server_addr", &self.server_addr)
            .field("rpc_url", &self.rpc_url)
            .field("commitment", &self.commitment)
            .field("token_mint", &self.token_mint)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("tokens_per_request", &self.tokens_per_request)
            .field("max_requests_per_window", &self.max_requests_per_window)
            .field("quota_window_secs", &self.quota_window_secs)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("global_requests_per_minute", &self.global_requests_per_minute)
            .field("cors_enabled", &self.cors_enabled)
            .finish()
    }
}

impl FaucetConfig {
    /// Load defaults, then the optional config file, then environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => load_config(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("FAUCET_SERVER_ADDR") {
            self.server_addr = addr;
        }

        if let Some(rpc_url) = lookup("SOLANA_RPC_URL") {
            self.rpc_url = rpc_url;
        }

        if let Some(commitment) = lookup("FAUCET_COMMITMENT") {
            self.commitment = commitment;
        }

        if let Some(mint) = lookup("TOKEN_MINT_ADDRESS") {
            self.token_mint = Some(mint);
        }

        if let Some(key) = lookup("FAUCET_PRIVATE_KEY") {
            self.private_key = Some(key);
        }

        if let Some(amount) = lookup("TOKENS_PER_REQUEST") {
            self.tokens_per_request = amount.parse().unwrap_or(self.tokens_per_request);
        }

        if let Some(max_req) = lookup("FAUCET_MAX_REQUESTS") {
            self.max_requests_per_window = max_req.parse().unwrap_or(self.max_requests_per_window);
        }

        if let Some(window) = lookup("FAUCET_QUOTA_WINDOW") {
            self.quota_window_secs = window.parse().unwrap_or(self.quota_window_secs);
        }

        if let Some(sweep) = lookup("FAUCET_SWEEP_INTERVAL") {
            self.sweep_interval_secs = sweep.parse().ok().or(self.sweep_interval_secs);
        }

        if let Some(rpm) = lookup("FAUCET_GLOBAL_RPM") {
            self.global_requests_per_minute = rpm.parse().ok().or(self.global_requests_per_minute);
        }

        if let Some(level) = lookup("FAUCET_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate and convert into the immutable runtime settings.
    pub fn resolve(&self) -> Result<FaucetSettings, ConfigError> {
        let private_key = non_empty(self.private_key.as_deref()).ok_or(ConfigError::MissingPrivateKey)?;
        let funding_keypair = parse_keypair(private_key)?;

        let mint = non_empty(self.token_mint.as_deref()).ok_or(ConfigError::MissingMint)?;
        let mint = Pubkey::from_str(mint).map_err(|e| ConfigError::InvalidMint(e.to_string()))?;

        let commitment = CommitmentConfig::from_str(&self.commitment)
            .map_err(|_| ConfigError::InvalidCommitment(self.commitment.clone()))?;

        if self.tokens_per_request == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tokens_per_request",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_requests_per_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_requests_per_window",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.quota_window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "quota_window_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        let global_requests_per_minute = match self.global_requests_per_minute {
            Some(rpm) => Some(NonZeroU32::new(rpm).ok_or(ConfigError::InvalidValue {
                field: "global_requests_per_minute",
                reason: "must be greater than zero when set".to_string(),
            })?),
            None => None,
        };

        Ok(FaucetSettings {
            rpc_url: self.rpc_url.clone(),
            commitment,
            mint,
            funding_keypair: Arc::new(funding_keypair),
            tokens_per_request: self.tokens_per_request,
            max_requests_per_window: self.max_requests_per_window,
            quota_window: Duration::from_secs(self.quota_window_secs),
            global_requests_per_minute,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Accepts the `solana-keygen` JSON byte array or a base58 encoded secret key.
fn parse_keypair(raw: &str) -> Result<Keypair, ConfigError> {
    let bytes: Vec<u8> = if raw.starts_with('[') {
        serde_json::from_str(raw).map_err(|_| {
            ConfigError::InvalidPrivateKey("expected JSON array of numbers".to_string())
        })?
    } else {
        bs58::decode(raw).into_vec().map_err(|_| {
            ConfigError::InvalidPrivateKey("expected JSON array of numbers or base58 string".to_string())
        })?
    };

    Keypair::from_bytes(&bytes).map_err(|e| ConfigError::InvalidPrivateKey(e.to_string()))
}

/// Validated runtime settings, immutable for the lifetime of the process.
pub struct FaucetSettings {
    pub rpc_url: String,
    pub commitment: CommitmentConfig,
    pub mint: Pubkey,
    pub funding_keypair: Arc<Keypair>,
    pub tokens_per_request: u64,
    pub max_requests_per_window: u32,
    pub quota_window: Duration,
    pub global_requests_per_minute: Option<NonZeroU32>,
}

impl FaucetSettings {
    /// Settings with default quota and amounts for the given mint and funding key.
    pub fn new(mint: Pubkey, funding_keypair: Keypair) -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            commitment: CommitmentConfig::confirmed(),
            mint,
            funding_keypair: Arc::new(funding_keypair),
            tokens_per_request: DEFAULT_TOKENS_PER_REQUEST,
            max_requests_per_window: DEFAULT_MAX_REQUESTS_PER_WINDOW,
            quota_window: Duration::from_secs(DEFAULT_QUOTA_WINDOW_SECS),
            global_requests_per_minute: None,
        }
    }

    pub fn funding_wallet(&self) -> Pubkey {
        self.funding_keypair.pubkey()
    }
}

impl fmt::Debug for FaucetSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaucetSettings")
            .field("rpc_url", &self.rpc_url)
            .field("commitment", &self.commitment.commitment)
            .field("mint", &self.mint)
            .field("funding_wallet", &self.funding_wallet())
            .field("tokens_per_request", &self.tokens_per_request)
            .field("max_requests_per_window", &self.max_requests_per_window)
            .field("quota_window", &self.quota_window)
            .field("global_requests_per_minute", &self.global_requests_per_minute)
            .finish()
    }
}
