//! Runtime configuration.
//!
//! Loaded from environment variables (a `.env` file is read first if present)
//! and validated eagerly, so the rest of the crate only sees checked values.
//!
//! ## Environment Variables
//!
//! Endpoints (either the explicit URLs or `ALCHEMY_API_KEY`):
//! - `WS_RPC_URL`: streaming endpoint, `ws://` or `wss://`
//! - `HTTP_RPC_URL`: endpoint for factory calls, `http://` or `https://`
//! - `ALCHEMY_API_KEY`: derives whichever of the two URLs is unset
//!
//! Optional (with defaults):
//! - `NETWORK`: `ethereum`
//! - `TOKEN_A` / `TOKEN_B`: registry symbol or 0x address (`ETH` / `USDC`)
//! - `POOL_ADDRESS`: skip pool discovery and stream this pool
//! - `MAX_RECONNECT_ATTEMPTS`: 5
//! - `BACKOFF_BASE`: 2
//! - `BACKOFF_UNIT_MS`: 1000
//! - `SUBSCRIBE_TIMEOUT_SECS`: 10
//! - `OUTPUT_DIR`: `./data`
//! - `SWAP_SELECTOR` / `MINT_SELECTOR` / `BURN_SELECTOR`: override the
//!   signature-derived event selectors
//!
//! ## Example
//!
//! ```no_run
//! use v3_pool_stream::config::Config;
//! use v3_pool_stream::error::MonitorResult;
//!
//! # fn main() -> MonitorResult<()> {
//! let config = Config::from_env()?;
//! println!("Streaming {} on {}", config.pair_label(), config.network());
//! # Ok(())
//! # }
//! ```

use alloy::primitives::{address, Address, B256};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MonitorError, MonitorResult};
use crate::events::{EventKind, SelectorSet};
use crate::pool::TokenPair;
use crate::subscription::BackoffPolicy;

/// Supported chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    /// Ethereum mainnet
    Ethereum,
}

impl Network {
    /// Uniswap V3 factory deployment.
    #[must_use]
    pub const fn factory_address(self) -> Address {
        match self {
            Self::Ethereum => address!("1F98431c8aD98523631AE4a59f267346ea31F984"),
        }
    }

    /// Look up a token symbol (case-insensitive).
    #[must_use]
    pub fn token(self, symbol: &str) -> Option<Address> {
        let symbol = symbol.to_ascii_uppercase();
        match self {
            Self::Ethereum => match symbol.as_str() {
                "ETH" | "WETH" => Some(address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2")),
                "USDC" => Some(address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")),
                "USDT" => Some(address!("dAC17F958D2ee523a2206206994597C13D831ec7")),
                "DAI" => Some(address!("6B175474E89094C44Da98b954EedeAC495271d0F")),
                "WBTC" => Some(address!("2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599")),
                _ => None,
            },
        }
    }

    fn alchemy_host(self) -> &'static str {
        match self {
            Self::Ethereum => "eth-mainnet.g.alchemy.com",
        }
    }
}

impl FromStr for Network {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "mainnet" | "eth" => Ok(Self::Ethereum),
            other => Err(MonitorError::config(
                format!("unsupported NETWORK '{other}', expected 'ethereum'"),
                None,
            )),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ethereum => write!(f, "ethereum"),
        }
    }
}

/// A token as configured: the user's label and its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpec {
    /// Symbol or address text as given
    pub label: String,
    /// Resolved address
    pub address: Address,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    network: Network,
    token_a: TokenSpec,
    token_b: TokenSpec,
    ws_rpc_url: String,
    http_rpc_url: String,
    pool_address: Option<Address>,
    backoff: BackoffPolicy,
    subscribe_timeout: Duration,
    output_dir: PathBuf,
    selectors: SelectorSet,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a value is missing or invalid.
    pub fn from_env() -> MonitorResult<Self> {
        // A missing .env file is fine.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a value is missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> MonitorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let network = var("NETWORK").map_or(Ok(Network::Ethereum), |n| n.parse())?;

        let token_a = resolve_token(network, "TOKEN_A", &var("TOKEN_A").unwrap_or_else(|| "ETH".into()))?;
        let token_b = resolve_token(network, "TOKEN_B", &var("TOKEN_B").unwrap_or_else(|| "USDC".into()))?;
        if token_a.address == token_b.address {
            return Err(MonitorError::config(
                format!(
                    "TOKEN_A and TOKEN_B must differ, both resolve to {}",
                    token_a.address
                ),
                None,
            ));
        }

        let api_key = var("ALCHEMY_API_KEY").filter(|k| k != "your_alchemy_api_key_here");
        let derived = |scheme: &str| {
            api_key
                .as_ref()
                .map(|key| format!("{scheme}://{}/v2/{key}", network.alchemy_host()))
        };

        let ws_rpc_url = var("WS_RPC_URL").or_else(|| derived("wss")).ok_or_else(|| {
            MonitorError::config("WS_RPC_URL or ALCHEMY_API_KEY must be set", None)
        })?;
        if !ws_rpc_url.starts_with("ws://") && !ws_rpc_url.starts_with("wss://") {
            return Err(MonitorError::config(
                "WS_RPC_URL must be a streaming endpoint (ws:// or wss://)",
                None,
            ));
        }

        let http_rpc_url = var("HTTP_RPC_URL").or_else(|| derived("https")).ok_or_else(|| {
            MonitorError::config("HTTP_RPC_URL or ALCHEMY_API_KEY must be set", None)
        })?;
        if !http_rpc_url.starts_with("http://") && !http_rpc_url.starts_with("https://") {
            return Err(MonitorError::config(
                "HTTP_RPC_URL must start with http:// or https://",
                None,
            ));
        }

        let pool_address = var("POOL_ADDRESS")
            .map(|raw| parse_address("POOL_ADDRESS", &raw))
            .transpose()?;

        let max_attempts = parse_or("MAX_RECONNECT_ATTEMPTS", var("MAX_RECONNECT_ATTEMPTS"), 5u32)?;
        let base = parse_or("BACKOFF_BASE", var("BACKOFF_BASE"), 2u32)?;
        if base == 0 {
            return Err(MonitorError::config("BACKOFF_BASE must be at least 1", None));
        }
        let unit_ms = parse_or("BACKOFF_UNIT_MS", var("BACKOFF_UNIT_MS"), 1000u64)?;
        let timeout_secs = parse_or("SUBSCRIBE_TIMEOUT_SECS", var("SUBSCRIBE_TIMEOUT_SECS"), 10u64)?;
        if timeout_secs == 0 {
            return Err(MonitorError::config(
                "SUBSCRIBE_TIMEOUT_SECS must be greater than zero",
                None,
            ));
        }

        let output_dir = var("OUTPUT_DIR").map_or_else(|| PathBuf::from("./data"), PathBuf::from);

        let mut selectors = SelectorSet::from_signatures();
        for kind in EventKind::ALL {
            let key = format!("{}_SELECTOR", kind.slug().to_ascii_uppercase());
            if let Some(raw) = var(key.as_str()) {
                let selector = B256::from_str(&raw).map_err(|e| {
                    MonitorError::config(
                        format!("{key} must be a 0x-prefixed 32-byte hex value"),
                        Some(Box::new(e)),
                    )
                })?;
                match kind {
                    EventKind::Swap => selectors.swap = selector,
                    EventKind::Mint => selectors.mint = selector,
                    EventKind::Burn => selectors.burn = selector,
                }
            }
        }

        Ok(Self {
            network,
            token_a,
            token_b,
            ws_rpc_url,
            http_rpc_url,
            pool_address,
            backoff: BackoffPolicy::new(max_attempts, base).with_unit(Duration::from_millis(unit_ms)),
            subscribe_timeout: Duration::from_secs(timeout_secs),
            output_dir,
            selectors,
        })
    }

    /// Override the reconnect budget.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.backoff.max_attempts = max_attempts;
        self
    }

    /// Override the output directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = dir;
        self
    }

    /// Override the pool address, skipping discovery.
    #[must_use]
    pub fn with_pool_address(mut self, pool: Address) -> Self {
        self.pool_address = Some(pool);
        self
    }

    /// Selected network.
    #[must_use]
    pub const fn network(&self) -> Network {
        self.network
    }

    /// Uniswap V3 factory of the selected network.
    #[must_use]
    pub const fn factory_address(&self) -> Address {
        self.network.factory_address()
    }

    /// First configured token.
    #[must_use]
    pub const fn token_a(&self) -> &TokenSpec {
        &self.token_a
    }

    /// Second configured token.
    #[must_use]
    pub const fn token_b(&self) -> &TokenSpec {
        &self.token_b
    }

    /// Ordered token pair for pool discovery.
    ///
    /// # Errors
    ///
    /// Never fails for a validated config; kept fallible to mirror
    /// [`TokenPair::new`].
    pub fn pair(&self) -> MonitorResult<TokenPair> {
        TokenPair::new(self.token_a.address, self.token_b.address)
    }

    /// `A/B` label for display.
    #[must_use]
    pub fn pair_label(&self) -> String {
        format!("{}/{}", self.token_a.label, self.token_b.label)
    }

    /// Streaming endpoint.
    #[must_use]
    pub fn ws_rpc_url(&self) -> &str {
        &self.ws_rpc_url
    }

    /// Endpoint for factory calls.
    #[must_use]
    pub fn http_rpc_url(&self) -> &str {
        &self.http_rpc_url
    }

    /// Explicit pool, if configured.
    #[must_use]
    pub const fn pool_address(&self) -> Option<Address> {
        self.pool_address
    }

    /// Reconnect policy.
    #[must_use]
    pub const fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// How long to wait for the `eth_subscribe` acknowledgement.
    #[must_use]
    pub const fn subscribe_timeout(&self) -> Duration {
        self.subscribe_timeout
    }

    /// Directory receiving the CSV files.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Event selectors to subscribe to and decode.
    #[must_use]
    pub const fn selectors(&self) -> SelectorSet {
        self.selectors
    }
}

fn resolve_token(network: Network, key: &str, raw: &str) -> MonitorResult<TokenSpec> {
    let address = if raw.starts_with("0x") {
        parse_address(key, raw)?
    } else {
        network.token(raw).ok_or_else(|| {
            MonitorError::config(
                format!("{key}: unknown token '{raw}' on {network}, use a symbol from the registry or an address"),
                None,
            )
        })?
    };
    Ok(TokenSpec {
        label: raw.to_string(),
        address,
    })
}

fn parse_address(key: &str, raw: &str) -> MonitorResult<Address> {
    Address::from_str(raw).map_err(|e| {
        MonitorError::config(
            format!("{key} must be a valid Ethereum address (0x + 40 hex chars), got: {raw}"),
            Some(Box::new(e)),
        )
    })
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> MonitorResult<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map_or(Ok(default), |v| {
        v.parse::<T>().map_err(|e| {
            MonitorError::config(format!("{key} must be a valid number, got: {v}"), Some(Box::new(e)))
        })
    })
}
