//! Error types for the pool event stream.
//!
//! This module provides a unified error type [`MonitorError`] covering every
//! failure the ingestion pipeline can surface, from configuration through
//! decoding, pool discovery, transport and persistence.
//!
//! # Design
//!
//! The error hierarchy is organized by how far a failure is allowed to travel:
//! - [`MonitorError::DecodingError`]: contained per message (log and skip)
//! - [`MonitorError::ConnectionError`] and [`MonitorError::SubscriptionError`]:
//!   contained per connection attempt, they drive the reconnect state machine
//! - [`MonitorError::PoolNotFound`] and [`MonitorError::ExhaustedRetries`]:
//!   fatal, they end the run with a non-zero exit status
//! - [`MonitorError::ConfigError`], [`MonitorError::RpcError`] and
//!   [`MonitorError::StorageError`]: fatal at the point they occur
//!
//! An unrecognized event selector is not an error at all; the decoder reports
//! it as `Ok(None)`.
//!
//! # Example
//!
//! ```
//! use v3_pool_stream::error::{MonitorError, MonitorResult};
//!
//! fn require_word(data: &[u8]) -> MonitorResult<()> {
//!     if data.len() < 32 {
//!         return Err(MonitorError::decoding("need a full 32-byte word", None));
//!     }
//!     Ok(())
//! }
//! ```

use alloy::primitives::Address;
use std::fmt;

/// Result type alias using [`MonitorError`].
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Boxed underlying cause carried by most variants.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the pool event stream.
#[derive(Debug)]
pub enum MonitorError {
    /// Configuration or environment variable errors.
    ///
    /// Variants include:
    /// - Missing or invalid environment variables
    /// - Unknown token symbols or networks
    /// - Malformed endpoint URLs
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// Read-only contract call or HTTP provider errors.
    RpcError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// A byte buffer was too short, mis-sized or badly padded for the field
    /// being decoded. Recoverable by skipping the single event.
    DecodingError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// No fee tier of the factory yielded a pool for the token pair.
    PoolNotFound {
        /// Lower address of the ordered pair
        token0: Address,
        /// Higher address of the ordered pair
        token1: Address,
        /// Fee tiers (hundredths of a bip) that were queried
        fees_tried: Vec<u32>,
    },

    /// Transient transport failure: connect refused, socket error,
    /// remote close.
    ConnectionError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// The node rejected or never acknowledged the `eth_subscribe` request.
    SubscriptionError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// The reconnect budget was spent.
    ExhaustedRetries {
        /// Number of reconnect attempts made
        attempts: u32,
        /// Failure that consumed the last attempt
        last_error: Box<MonitorError>,
    },

    /// Record sink could not create or append to its files.
    StorageError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },
}

impl MonitorError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use v3_pool_stream::error::MonitorError;
    ///
    /// let err = MonitorError::config("WS_RPC_URL not set", None);
    /// assert!(matches!(err, MonitorError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new RPC error.
    #[must_use]
    pub fn rpc(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::RpcError {
            message: message.into(),
            source,
        }
    }

    /// Create a new decoding error.
    ///
    /// # Example
    ///
    /// ```
    /// use v3_pool_stream::error::MonitorError;
    ///
    /// let err = MonitorError::decoding("data must be 160 bytes", None);
    /// assert!(err.is_decoding());
    /// ```
    #[must_use]
    pub fn decoding(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::DecodingError {
            message: message.into(),
            source,
        }
    }

    /// Create a pool-not-found error for an ordered pair.
    #[must_use]
    pub fn pool_not_found(token0: Address, token1: Address, fees_tried: Vec<u32>) -> Self {
        Self::PoolNotFound {
            token0,
            token1,
            fees_tried,
        }
    }

    /// Create a new connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::ConnectionError {
            message: message.into(),
            source,
        }
    }

    /// Create a new subscription error.
    #[must_use]
    pub fn subscription(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::SubscriptionError {
            message: message.into(),
            source,
        }
    }

    /// Create a retry-exhaustion error wrapping the last failure.
    ///
    /// # Example
    ///
    /// ```
    /// use v3_pool_stream::error::MonitorError;
    ///
    /// let last = MonitorError::connection("connection refused", None);
    /// let err = MonitorError::exhausted_retries(5, last);
    /// assert!(matches!(err, MonitorError::ExhaustedRetries { attempts: 5, .. }));
    /// ```
    #[must_use]
    pub fn exhausted_retries(attempts: u32, last_error: Self) -> Self {
        Self::ExhaustedRetries {
            attempts,
            last_error: Box::new(last_error),
        }
    }

    /// Create a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::StorageError {
            message: message.into(),
            source,
        }
    }

    /// Whether this is a per-message decoding failure.
    #[must_use]
    pub const fn is_decoding(&self) -> bool {
        matches!(self, Self::DecodingError { .. })
    }

    /// Whether the subscription client may retry after this error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionError { .. } | Self::SubscriptionError { .. }
        )
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::RpcError { message, .. } => write!(f, "RPC error: {message}"),
            Self::DecodingError { message, .. } => write!(f, "Decoding error: {message}"),
            Self::PoolNotFound {
                token0,
                token1,
                fees_tried,
            } => write!(
                f,
                "No pool found for {token0}/{token1} in fee tiers {fees_tried:?}"
            ),
            Self::ConnectionError { message, .. } => write!(f, "Connection error: {message}"),
            Self::SubscriptionError { message, .. } => {
                write!(f, "Subscription error: {message}")
            }
            Self::ExhaustedRetries {
                attempts,
                last_error,
            } => write!(
                f,
                "Reconnect budget exhausted after {attempts} attempts. Last error: {last_error}"
            ),
            Self::StorageError { message, .. } => write!(f, "Storage error: {message}"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. }
            | Self::RpcError { source, .. }
            | Self::DecodingError { source, .. }
            | Self::ConnectionError { source, .. }
            | Self::SubscriptionError { source, .. }
            | Self::StorageError { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
            Self::ExhaustedRetries { last_error, .. } => Some(last_error.as_ref()),
            Self::PoolNotFound { .. } => None,
        }
    }
}

/// Convert from `eyre::Report` to `MonitorError`.
///
/// The WebSocket transport builds its failures with `eyre` context chains;
/// anything that reaches this boundary is a transport failure.
impl From<eyre::Report> for MonitorError {
    fn from(err: eyre::Report) -> Self {
        Self::ConnectionError {
            message: format!("{err:#}"),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use std::error::Error;

    #[test]
    fn test_decoding_error() {
        let err = MonitorError::decoding("short buffer", None);
        assert!(err.is_decoding());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Decoding error: short buffer");
    }

    #[test]
    fn test_transient_errors() {
        assert!(MonitorError::connection("reset", None).is_transient());
        assert!(MonitorError::subscription("no ack", None).is_transient());
        assert!(!MonitorError::storage("disk full", None).is_transient());
        assert!(!MonitorError::config("bad", None).is_transient());
    }

    #[test]
    fn test_pool_not_found_display() {
        let err = MonitorError::pool_not_found(
            address!("0000000000000000000000000000000000000001"),
            address!("0000000000000000000000000000000000000002"),
            vec![100, 500, 3000, 10000],
        );
        let text = err.to_string();
        assert!(text.starts_with("No pool found for"));
        assert!(text.contains("[100, 500, 3000, 10000]"));
    }

    #[test]
    fn test_exhausted_retries_keeps_last_cause() {
        let err = MonitorError::exhausted_retries(3, MonitorError::connection("refused", None));
        assert_eq!(
            err.to_string(),
            "Reconnect budget exhausted after 3 attempts. Last error: Connection error: refused"
        );
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("Connection error: refused"));
    }

    #[test]
    fn test_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = MonitorError::storage("cannot create data dir", Some(Box::new(source)));
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Storage error: cannot create data dir");
    }

    #[test]
    fn test_from_eyre_is_connection() {
        let err: MonitorError = eyre::eyre!("socket closed").into();
        assert!(matches!(err, MonitorError::ConnectionError { .. }));
    }
}
