//! # Uniswap V3 Pool Event Stream
//!
//! Live ingestion of one Uniswap V3 pool: find the pool through the factory,
//! subscribe to its logs over WebSocket, decode Swap/Mint/Burn into typed
//! events and append them to per-kind CSV files.
//!
//! ## Architecture
//!
//! ```text
//! pool::PoolResolver ──► pool address
//!                              │
//!                              ▼
//! subscription::SubscriptionClient ◄── rpc::websocket (eth_subscribe)
//!        │ raw log
//!        ▼
//! events::EventDecoder ──► codec (words, int24 ticks)
//!        │ DecodedEvent
//!        ▼
//! sink::RecordSink (+ optional broadcast observer)
//! ```
//!
//! - [`codec`]: pure fixed-width decoding of topics and data words
//! - [`events`]: raw log to [`events::DecodedEvent`]
//! - [`pool`]: fee-tier discovery through the factory
//! - [`rpc`]: HTTP provider and WebSocket transport
//! - [`subscription`]: connect/subscribe/stream/reconnect state machine
//! - [`sink`]: append-only CSV records
//! - [`config`], [`observability`], [`cli`]: process wiring
//!
//! ## Library use
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use v3_pool_stream::events::{EventDecoder, SelectorSet};
//! use v3_pool_stream::rpc::{LogFilter, WsConnector};
//! use v3_pool_stream::sink::RecordSink;
//! use v3_pool_stream::subscription::{BackoffPolicy, SubscriptionClient};
//!
//! # async fn example(pool: alloy::primitives::Address) -> v3_pool_stream::error::MonitorResult<()> {
//! let selectors = SelectorSet::default();
//! let mut client = SubscriptionClient::new(
//!     WsConnector::new("wss://example.invalid".into(), Duration::from_secs(10)),
//!     EventDecoder::new(selectors),
//!     LogFilter::new(pool, selectors.all()),
//!     RecordSink::open("./data")?,
//!     BackoffPolicy::default(),
//! );
//! let stats = client.run().await?;
//! println!("{} events", stats.decoded());
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`error::MonitorResult`]. Decoding errors
//! are contained per log, transport errors per reconnect attempt; pool
//! discovery, storage and retry exhaustion end the run.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod pool;
pub mod rpc;
pub mod sink;
pub mod subscription;
