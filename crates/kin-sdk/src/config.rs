// ============================================================================
// KIN-SDK - Configuration
// ============================================================================
// Network environments, transport options and protocol constants.
// Everything is passed by value into the client; nothing is registered
// process-wide.

use crate::error::KinError;
use crate::Result;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Maximum memo size in bytes (UTF-8 encoded)
pub const MEMO_CAP: usize = 28;

/// Version prefix of the `<version>-<app id>-<text>` memo template
pub const MEMO_TEMPLATE_VERSION: u8 = 1;

/// App id used when the caller doesn't supply one
pub const ANON_APP_ID: &str = "anon";

/// App ids are exactly this many ASCII letters/digits
pub const APP_ID_LENGTH: usize = 4;

/// Horizon caps page sizes at this value
pub const MAX_RECORDS_PER_REQUEST: u32 = 200;

/// Fractional digits of a KIN amount
pub const AMOUNT_PRECISION: usize = 7;

/// Base fee per operation in stroops
pub const DEFAULT_FEE: u32 = 100;

/// Only this many HD channels may be derived from one seed + salt
pub const MAX_HD_CHANNELS: usize = 100;

/// Two ledger closes plus one second
pub const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(11);

pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn sdk_user_agent() -> String {
    format!("kin-sdk-rust/{}", SDK_VERSION)
}

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// A Kin network: where Horizon lives and which passphrase signs for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    /// Upper-cased environment name
    pub name: String,

    /// Horizon API URL (no trailing slash)
    pub horizon_url: String,

    /// Network passphrase, hashed into every transaction signature
    pub passphrase: String,

    /// Friendbot service, if the network has one
    pub friendbot_url: Option<String>,

    #[serde(skip)]
    passphrase_hash: [u8; 32],
}

impl Environment {
    /// Create an environment, validating both URLs
    pub fn new(
        name: &str,
        horizon_url: &str,
        passphrase: &str,
        friendbot_url: Option<&str>,
    ) -> Result<Self> {
        validate_url(horizon_url)?;
        if let Some(url) = friendbot_url {
            validate_url(url)?;
        }

        Ok(Self {
            name: name.to_uppercase(),
            horizon_url: horizon_url.trim_end_matches('/').to_string(),
            passphrase: passphrase.to_string(),
            friendbot_url: friendbot_url.map(|u| u.trim_end_matches('/').to_string()),
            passphrase_hash: Sha256::digest(passphrase.as_bytes()).into(),
        })
    }

    /// Kin production ecosystem
    pub fn production() -> Self {
        Self::preset(
            "ECOSYSTEM",
            "https://horizon-ecosystem.kininfrastructure.com",
            "Public Global Kin Ecosystem Network ; June 2018",
            None,
        )
    }

    /// Kin playground (test) network
    pub fn playground() -> Self {
        Self::preset(
            "PLAYGROUND",
            "https://horizon-playground.kininfrastructure.com",
            "Kin Playground Network ; June 2018",
            Some("http://friendbot-playground.kininfrastructure.com"),
        )
    }

    fn preset(name: &str, horizon_url: &str, passphrase: &str, friendbot_url: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            horizon_url: horizon_url.to_string(),
            passphrase: passphrase.to_string(),
            friendbot_url: friendbot_url.map(str::to_string),
            passphrase_hash: Sha256::digest(passphrase.as_bytes()).into(),
        }
    }

    /// sha256 of the passphrase, a.k.a. the network id
    pub fn passphrase_hash(&self) -> &[u8; 32] {
        &self.passphrase_hash
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Kin Environment>: Name: {}, Horizon: {}, Passphrase: {}",
            self.name, self.horizon_url, self.passphrase
        )
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url)
        .map_err(|e| KinError::Configuration(format!("invalid url {}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(KinError::Configuration(format!(
            "unsupported url scheme {} in {}",
            scheme, url
        ))),
    }
}

// ============================================================================
// TRANSPORT / CHANNEL OPTIONS
// ============================================================================

/// Horizon transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonOptions {
    /// Per-request timeout
    pub request_timeout: Duration,

    /// Retries for idempotent reads; submissions are never retried
    pub num_retries: u32,

    /// First retry delay, doubled on each further attempt
    pub backoff_factor: Duration,

    /// Idle connections kept per host
    pub pool_size: usize,

    pub user_agent: String,
}

impl Default for HorizonOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_CHANNEL_TIMEOUT,
            num_retries: 5,
            backoff_factor: Duration::from_millis(500),
            pool_size: 10,
            user_agent: sdk_user_agent(),
        }
    }
}

/// Channel pool behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// How long a send waits for a free channel
    pub acquire_timeout: Duration,

    /// Top-ups attempted for one send before giving up
    pub max_top_ups: u32,

    /// A top-up pays for this many transactions at the failing fee
    pub top_up_transactions: i64,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: DEFAULT_CHANNEL_TIMEOUT,
            max_top_ups: 1,
            top_up_transactions: 1000,
        }
    }
}
