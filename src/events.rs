//! Typed decoding of Uniswap V3 pool logs.
//!
//! A pool emits many events; this pipeline cares about three of them, each
//! identified by its selector (`topics[0]`):
//!
//! | Event | Topics | Data words |
//! |-------|--------|------------|
//! | Swap  | selector, sender, recipient | amount0, amount1, sqrtPriceX96, liquidity, tick |
//! | Mint  | selector, sender, owner, tickLower | tickUpper, amount, amount0, amount1 |
//! | Burn  | selector, owner, tickLower\[, tickUpper\] | amount, amount0, amount1 |
//!
//! Decoding is a single exhaustive `match` over [`EventKind`], so the set of
//! handled shapes is closed: a selector outside the configured
//! [`SelectorSet`] is skipped, never guessed at.
//!
//! Outcomes of [`EventDecoder::try_decode`]:
//! - `Ok(Some(event))`: fully decoded
//! - `Ok(None)`: not ours (unknown selector) or too few topics
//! - `Err(DecodingError)`: the data buffer has the wrong length or a field is
//!   malformed; the whole event is rejected
//!
//! ## Example
//!
//! ```
//! use v3_pool_stream::events::{EventDecoder, RawLog, SelectorSet};
//! use alloy::primitives::{Address, Bytes};
//!
//! let decoder = EventDecoder::new(SelectorSet::default());
//! let log = RawLog::new(Address::ZERO, vec![], Bytes::new());
//! assert!(decoder.decode(&log).is_none());
//! ```

use alloy::primitives::aliases::U160;
use alloy::primitives::{keccak256, Address, Bytes, B256, I256, U256, U64};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, warn};

use crate::codec::{
    address_from_topic, decode_int256, decode_tick_from_slot, decode_tick_from_topic,
    decode_uint128, decode_uint160, decode_uint256, word_at, WORD_SIZE,
};
use crate::error::{MonitorError, MonitorResult};

/// Canonical Solidity signature of the pool `Swap` event.
pub const SWAP_SIGNATURE: &str = "Swap(address,address,int256,int256,uint160,uint128,int24)";

/// Canonical Solidity signature of the pool `Mint` event.
pub const MINT_SIGNATURE: &str = "Mint(address,address,int24,int24,uint128,uint256,uint256)";

/// Canonical Solidity signature of the pool `Burn` event.
pub const BURN_SIGNATURE: &str = "Burn(address,int24,int24,uint128,uint256,uint256)";

const SWAP_DATA_LEN: usize = 5 * WORD_SIZE;
const MINT_DATA_LEN: usize = 4 * WORD_SIZE;
const BURN_DATA_LEN: usize = 3 * WORD_SIZE;

/// A log record as delivered inside an `eth_subscription` notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    /// Emitting contract
    pub address: Address,
    /// `topics[0]` is the selector, the rest are indexed parameters
    pub topics: Vec<B256>,
    /// Unindexed parameters, ABI-encoded
    pub data: Bytes,
    /// Block the log was included in, if the node reported it
    #[serde(default)]
    pub block_number: Option<U64>,
    /// Transaction that emitted the log, if the node reported it
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    /// Set by the node when a previously delivered log was reorged out
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// Build a log without block metadata.
    #[must_use]
    pub const fn new(address: Address, topics: Vec<B256>, data: Bytes) -> Self {
        Self {
            address,
            topics,
            data,
            block_number: None,
            transaction_hash: None,
            removed: false,
        }
    }

    /// The event selector, if the log has any topics.
    #[must_use]
    pub fn selector(&self) -> Option<&B256> {
        self.topics.first()
    }
}

/// The three event shapes this pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Token swap through the pool
    Swap,
    /// Liquidity added to a tick range
    Mint,
    /// Liquidity removed from a tick range
    Burn,
}

impl EventKind {
    /// Every kind, in record-sink order.
    pub const ALL: [Self; 3] = [Self::Swap, Self::Mint, Self::Burn];

    /// Event name as written to the `event` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Swap => "Swap",
            Self::Mint => "Mint",
            Self::Burn => "Burn",
        }
    }

    /// Lower-case name used for file names.
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Swap => "swap",
            Self::Mint => "mint",
            Self::Burn => "burn",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selector for each handled event.
///
/// Passed to the decoder at construction; nothing is looked up globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorSet {
    /// `topics[0]` of Swap logs
    pub swap: B256,
    /// `topics[0]` of Mint logs
    pub mint: B256,
    /// `topics[0]` of Burn logs
    pub burn: B256,
}

impl SelectorSet {
    /// Selectors computed as keccak-256 of the canonical event signatures.
    #[must_use]
    pub fn from_signatures() -> Self {
        Self {
            swap: keccak256(SWAP_SIGNATURE),
            mint: keccak256(MINT_SIGNATURE),
            burn: keccak256(BURN_SIGNATURE),
        }
    }

    /// Which event a selector belongs to, if any.
    #[must_use]
    pub fn classify(&self, selector: &B256) -> Option<EventKind> {
        EventKind::ALL
            .into_iter()
            .find(|kind| self.get(*kind) == *selector)
    }

    /// Selector of one event kind.
    #[must_use]
    pub const fn get(&self, kind: EventKind) -> B256 {
        match kind {
            EventKind::Swap => self.swap,
            EventKind::Mint => self.mint,
            EventKind::Burn => self.burn,
        }
    }

    /// All selectors, for the subscription topic filter.
    #[must_use]
    pub const fn all(&self) -> [B256; 3] {
        [self.swap, self.mint, self.burn]
    }
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self::from_signatures()
    }
}

/// Decoded Swap event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapEvent {
    /// Pool that emitted the log
    pub pool: Address,
    /// `topics[1]`
    pub sender: Address,
    /// `topics[2]`
    pub recipient: Address,
    /// Pool delta of token0
    pub amount0: I256,
    /// Pool delta of token1
    pub amount1: I256,
    /// Price after the swap, Q64.96
    pub sqrt_price_x96: U160,
    /// In-range liquidity after the swap
    pub liquidity: u128,
    /// Tick after the swap
    pub tick: i32,
}

/// Decoded Mint event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintEvent {
    /// Pool that emitted the log
    pub pool: Address,
    /// `topics[1]`
    pub sender: Address,
    /// `topics[2]`
    pub owner: Address,
    /// `topics[3]`
    pub tick_lower: i32,
    /// First data word
    pub tick_upper: i32,
    /// Liquidity minted
    pub amount: u128,
    /// Token0 deposited
    pub amount0: U256,
    /// Token1 deposited
    pub amount1: U256,
}

/// Decoded Burn event.
///
/// `tick_upper` is `None` for the truncated 3-topic form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnEvent {
    /// Pool that emitted the log
    pub pool: Address,
    /// `topics[1]`
    pub owner: Address,
    /// `topics[2]`
    pub tick_lower: i32,
    /// `topics[3]` when present
    pub tick_upper: Option<i32>,
    /// Liquidity burned
    pub amount: u128,
    /// Token0 owed
    pub amount0: U256,
    /// Token1 owed
    pub amount1: U256,
}

impl BurnEvent {
    /// Whether the log carried all four topics.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.tick_upper.is_some()
    }
}

/// One decoded pool event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// See [`SwapEvent`]
    Swap(SwapEvent),
    /// See [`MintEvent`]
    Mint(MintEvent),
    /// See [`BurnEvent`]
    Burn(BurnEvent),
}

impl DecodedEvent {
    /// Kind tag of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Swap(_) => EventKind::Swap,
            Self::Mint(_) => EventKind::Mint,
            Self::Burn(_) => EventKind::Burn,
        }
    }

    /// Pool that emitted the event.
    #[must_use]
    pub const fn pool(&self) -> Address {
        match self {
            Self::Swap(e) => e.pool,
            Self::Mint(e) => e.pool,
            Self::Burn(e) => e.pool,
        }
    }
}

/// Maps raw logs to [`DecodedEvent`]s using an explicit selector set.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    selectors: SelectorSet,
}

impl EventDecoder {
    /// Create a decoder for the given selectors.
    #[must_use]
    pub const fn new(selectors: SelectorSet) -> Self {
        Self { selectors }
    }

    /// Selectors this decoder recognizes.
    #[must_use]
    pub const fn selectors(&self) -> &SelectorSet {
        &self.selectors
    }

    /// Decode a log, logging and swallowing rejections.
    ///
    /// Returns `None` for unknown selectors, failed topic-count preconditions
    /// and malformed data alike.
    #[must_use]
    pub fn decode(&self, log: &RawLog) -> Option<DecodedEvent> {
        match self.try_decode(log) {
            Ok(event) => event,
            Err(e) => {
                warn!(pool = %log.address, error = %e, "Rejected malformed pool log");
                None
            }
        }
    }

    /// Decode a log, reporting malformed data as an error.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::DecodingError`] when the selector is known and
    /// the topic count is sufficient but the data buffer does not match the
    /// event layout exactly.
    pub fn try_decode(&self, log: &RawLog) -> MonitorResult<Option<DecodedEvent>> {
        let Some(selector) = log.selector() else {
            debug!(pool = %log.address, "Log without topics, skipping");
            return Ok(None);
        };
        let Some(kind) = self.selectors.classify(selector) else {
            debug!(pool = %log.address, selector = %selector, "Unknown selector, skipping");
            return Ok(None);
        };

        let min_topics = match kind {
            EventKind::Swap | EventKind::Burn => 3,
            EventKind::Mint => 4,
        };
        if log.topics.len() < min_topics {
            warn!(
                event = %kind,
                topics = log.topics.len(),
                required = min_topics,
                "Too few topics, skipping"
            );
            return Ok(None);
        }

        let event = match kind {
            EventKind::Swap => DecodedEvent::Swap(decode_swap(log)?),
            EventKind::Mint => DecodedEvent::Mint(decode_mint(log)?),
            EventKind::Burn => DecodedEvent::Burn(decode_burn(log)?),
        };
        Ok(Some(event))
    }
}

fn expect_data_len(kind: EventKind, data: &[u8], expected: usize) -> MonitorResult<()> {
    if data.len() != expected {
        return Err(MonitorError::decoding(
            format!(
                "{kind} data must be {expected} bytes, got {}",
                data.len()
            ),
            None,
        ));
    }
    Ok(())
}

fn decode_swap(log: &RawLog) -> MonitorResult<SwapEvent> {
    let data = log.data.as_ref();
    expect_data_len(EventKind::Swap, data, SWAP_DATA_LEN)?;

    Ok(SwapEvent {
        pool: log.address,
        sender: address_from_topic(&log.topics[1]),
        recipient: address_from_topic(&log.topics[2]),
        amount0: decode_int256(word_at(data, 0)?),
        amount1: decode_int256(word_at(data, 1)?),
        sqrt_price_x96: decode_uint160(word_at(data, 2)?)?,
        liquidity: decode_uint128(word_at(data, 3)?)?,
        tick: decode_tick_from_slot(word_at(data, 4)?)?,
    })
}

fn decode_mint(log: &RawLog) -> MonitorResult<MintEvent> {
    let data = log.data.as_ref();
    expect_data_len(EventKind::Mint, data, MINT_DATA_LEN)?;

    Ok(MintEvent {
        pool: log.address,
        sender: address_from_topic(&log.topics[1]),
        owner: address_from_topic(&log.topics[2]),
        tick_lower: decode_tick_from_topic(&log.topics[3]),
        tick_upper: decode_tick_from_slot(word_at(data, 0)?)?,
        amount: decode_uint128(word_at(data, 1)?)?,
        amount0: decode_uint256(word_at(data, 2)?),
        amount1: decode_uint256(word_at(data, 3)?),
    })
}

fn decode_burn(log: &RawLog) -> MonitorResult<BurnEvent> {
    let data = log.data.as_ref();
    expect_data_len(EventKind::Burn, data, BURN_DATA_LEN)?;

    Ok(BurnEvent {
        pool: log.address,
        owner: address_from_topic(&log.topics[1]),
        tick_lower: decode_tick_from_topic(&log.topics[2]),
        tick_upper: log.topics.get(3).map(decode_tick_from_topic),
        amount: decode_uint128(word_at(data, 0)?)?,
        amount0: decode_uint256(word_at(data, 1)?),
        amount1: decode_uint256(word_at(data, 2)?),
    })
}
