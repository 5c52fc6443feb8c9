/// Runtime configuration.
///
/// Every setting can come from a command-line flag or an environment
/// variable; flags win.
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::Args;

use crate::anchor::submit::ConfirmationPolicy;
use crate::anchor::DEFAULT_WINDOW_SECS;
use crate::error::{AnchorError, Result};
use crate::ledger::algod::{AlgodConfig, DEFAULT_ALGOD_URL};

/// Which public network the configured node belongs to. Only used to build
/// explorer links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Testnet,
    Mainnet,
}

impl Network {
    pub fn explorer_base(self) -> &'static str {
        match self {
            Network::Testnet => "https://testnet.explorer.perawallet.app",
            Network::Mainnet => "https://explorer.perawallet.app",
        }
    }
}

impl FromStr for Network {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "testnet" => Ok(Network::Testnet),
            "mainnet" => Ok(Network::Mainnet),
            other => Err(AnchorError::Config(format!(
                "unknown network '{other}', expected testnet or mainnet"
            ))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Network::Testnet => "testnet",
            Network::Mainnet => "mainnet",
        })
    }
}

/// Ledger and anchoring settings.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// algod endpoint
    #[arg(long, env = "ALGOD_URL", default_value = DEFAULT_ALGOD_URL)]
    pub algod_url: String,

    /// algod API token (empty for public nodes)
    #[arg(long, env = "ALGOD_TOKEN", default_value = "", hide_env_values = true)]
    pub algod_token: String,

    /// Id of the deployed anchor application
    #[arg(long, env = "ANCHOR_APP_ID")]
    pub app_id: Option<u64>,

    /// testnet or mainnet
    #[arg(long, env = "ALGORAND_NETWORK", default_value = "testnet")]
    pub network: Network,

    /// Deadline for each algod request, in milliseconds
    #[arg(long, env = "ALGOD_TIMEOUT_MS", default_value_t = 10_000)]
    pub algod_timeout_ms: u64,

    /// Status polls before a submission times out
    #[arg(long, env = "ANCHOR_CONFIRMATION_ROUNDS", default_value_t = 4)]
    pub confirmation_rounds: u32,

    /// Delay between status polls, in milliseconds
    #[arg(long, env = "ANCHOR_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Window length used when a batch gives no time bounds, in seconds
    #[arg(long, env = "ANCHOR_DEFAULT_WINDOW_SECS", default_value_t = DEFAULT_WINDOW_SECS)]
    pub default_window_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            algod_url: DEFAULT_ALGOD_URL.to_string(),
            algod_token: String::new(),
            algod_timeout_ms: 10_000,
            app_id: None,
            network: Network::Testnet,
            confirmation_rounds: 4,
            poll_interval_ms: 1000,
            default_window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !self.algod_url.starts_with("http://") && !self.algod_url.starts_with("https://") {
            return Err(AnchorError::Config(format!(
                "ALGOD_URL must be an http(s) URL, got '{}'",
                self.algod_url
            )));
        }
        if self.algod_timeout_ms == 0 {
            return Err(AnchorError::Config(
                "ALGOD_TIMEOUT_MS must be at least 1".into(),
            ));
        }
        if self.app_id == Some(0) {
            return Err(AnchorError::Config("ANCHOR_APP_ID must not be 0".into()));
        }
        if self.confirmation_rounds == 0 {
            return Err(AnchorError::Config(
                "ANCHOR_CONFIRMATION_ROUNDS must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(AnchorError::Config(
                "ANCHOR_POLL_INTERVAL_MS must be at least 1".into(),
            ));
        }
        if self.default_window_secs == 0 {
            return Err(AnchorError::Config(
                "ANCHOR_DEFAULT_WINDOW_SECS must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The application id, required by every operation that touches it.
    pub fn require_app_id(&self) -> Result<u64> {
        self.app_id
            .ok_or_else(|| AnchorError::Config("ANCHOR_APP_ID is not set".into()))
    }

    pub fn algod(&self) -> AlgodConfig {
        AlgodConfig {
            url: self.algod_url.clone(),
            token: self.algod_token.clone(),
            timeout: Duration::from_millis(self.algod_timeout_ms),
        }
    }

    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            max_rounds: self.confirmation_rounds,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}
