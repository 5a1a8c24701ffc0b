//! HTTP provider for read-only contract calls.
//!
//! Pool discovery only needs `eth_call`, so a plain alloy HTTP provider is
//! enough; the event stream itself goes through [`super::websocket`].
//!
//! ## Example
//!
//! ```no_run
//! use v3_pool_stream::rpc::create_provider;
//! use v3_pool_stream::error::MonitorResult;
//!
//! # fn example() -> MonitorResult<()> {
//! let provider = create_provider("https://eth-mainnet.g.alchemy.com/v2/API_KEY")?;
//! # Ok(())
//! # }
//! ```

use crate::error::{MonitorError, MonitorResult};
use alloy::providers::{ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};
use tracing::{debug, info, instrument};

/// HTTP provider type used for factory calls.
pub type Provider = RootProvider<Http<Client>>;

/// Create an alloy provider over HTTP(S).
///
/// No request is made here; an unreachable node surfaces on the first call.
///
/// # Errors
///
/// Returns an RPC error if the URL does not parse or is not an HTTP(S) URL.
#[instrument(skip(rpc_url), fields(rpc_host = tracing::field::Empty))]
pub fn create_provider(rpc_url: &str) -> MonitorResult<Provider> {
    // Extract host for logging (without sensitive API key)
    let host = redact_url(rpc_url);
    tracing::Span::current().record("rpc_host", host);
    debug!(rpc_host = host, "Creating HTTP provider");

    if !rpc_url.starts_with("http://") && !rpc_url.starts_with("https://") {
        return Err(MonitorError::rpc(
            format!("HTTP RPC URL must start with http:// or https://, got '{host}'"),
            None,
        ));
    }

    let url = rpc_url
        .parse()
        .map_err(|e| MonitorError::rpc(format!("Failed to parse RPC URL '{host}'"), Some(Box::new(e))))?;

    let provider = ProviderBuilder::new().on_http(url);

    info!(rpc_host = host, "RPC provider initialized");
    Ok(provider)
}

/// Strip the credential path segment from provider URLs before logging.
#[must_use]
pub fn redact_url(url: &str) -> &str {
    url.split("/v2/").next().unwrap_or("unknown")
}
