//! Node connectivity.
//!
//! - [`http`]: alloy HTTP provider for `eth_call` (pool discovery)
//! - [`websocket`]: raw `eth_subscribe` transport for the log stream
//!
//! ```text
//!   PoolResolver ──eth_call──► http::Provider
//!
//!   SubscriptionClient ──eth_subscribe──► websocket::WsSession
//!                      ◄──notifications──
//! ```

pub mod http;
pub mod websocket;

pub use http::{create_provider, redact_url, Provider};
pub use websocket::{
    parse_envelope, InboundMessage, LogConnector, LogFilter, LogSession, WsConnector, WsSession,
};
