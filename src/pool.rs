//! Pool discovery through the Uniswap V3 factory.
//!
//! A V3 pool is keyed by `(token0, token1, fee)` with `token0 < token1`. The
//! resolver orders the pair, asks the factory's `getPool` for each fee tier in
//! a fixed order and treats the zero address as "no pool at this tier".
//!
//! Two selection rules are offered:
//! - [`PoolResolver::resolve_first`]: the first tier (in tier order) with a pool
//! - [`PoolResolver::resolve_preferred`]: query every tier, return the 0.3%
//!   pool when it exists, else the first found
//!
//! The 0.3% preference is a static heuristic: that tier is conventionally the
//! deepest for most pairs, but no liquidity is consulted. Callers that care
//! about depth should inspect [`PoolResolver::find_all`] themselves.

use alloy::primitives::aliases::U24;
use alloy::primitives::Address;
use alloy::sol;
use std::fmt;
use std::future::Future;
use tracing::{debug, info, instrument, warn};

use crate::error::{MonitorError, MonitorResult};
use crate::rpc::http::Provider;

sol! {
    #[sol(rpc)]
    interface IUniswapV3Factory {
        /// Returns the pool for a pair and fee, or the zero address.
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool);
    }
}

/// Caveat shown wherever the preferred pool is reported.
pub const PREFERENCE_NOTE: &str = "the 0.3% tier is preferred when several tiers have a pool \
because it is conventionally the deepest; this is a static tie-break and no liquidity is consulted";

/// Apply the 0.3% preference to pools found in tier order.
#[must_use]
pub fn choose_preferred(found: &[(FeeTier, Address)]) -> Option<(FeeTier, Address)> {
    found
        .iter()
        .find(|(tier, _)| *tier == FeeTier::Medium)
        .or_else(|| found.first())
        .copied()
}

/// A Uniswap V3 fee tier, in hundredths of a basis point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeeTier {
    /// 0.01%
    Lowest,
    /// 0.05%
    Low,
    /// 0.3%
    Medium,
    /// 1%
    High,
}

impl FeeTier {
    /// Tiers in query order.
    pub const ALL: [Self; 4] = [Self::Lowest, Self::Low, Self::Medium, Self::High];

    /// Fee as passed to `getPool`.
    #[must_use]
    pub const fn fee(self) -> u32 {
        match self {
            Self::Lowest => 100,
            Self::Low => 500,
            Self::Medium => 3000,
            Self::High => 10_000,
        }
    }

    /// Look up a tier by its raw fee value.
    #[must_use]
    pub fn from_fee(fee: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|tier| tier.fee() == fee)
    }
}

impl fmt::Display for FeeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Lowest => "0.01%",
            Self::Low => "0.05%",
            Self::Medium => "0.3%",
            Self::High => "1%",
        };
        f.write_str(label)
    }
}

/// A token pair ordered the way the factory keys pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPair {
    token0: Address,
    token1: Address,
}

impl TokenPair {
    /// Order two distinct tokens so that `token0 < token1`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if both addresses are the same.
    ///
    /// # Example
    ///
    /// ```
    /// use v3_pool_stream::pool::TokenPair;
    /// use alloy::primitives::address;
    ///
    /// let usdc = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
    /// let weth = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    /// let pair = TokenPair::new(weth, usdc).unwrap();
    /// assert_eq!(pair.token0(), usdc);
    /// ```
    pub fn new(a: Address, b: Address) -> MonitorResult<Self> {
        if a == b {
            return Err(MonitorError::config(
                format!("pool tokens must differ, got {a} twice"),
                None,
            ));
        }
        let (token0, token1) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { token0, token1 })
    }

    /// Lower address.
    #[must_use]
    pub const fn token0(&self) -> Address {
        self.token0
    }

    /// Higher address.
    #[must_use]
    pub const fn token1(&self) -> Address {
        self.token1
    }
}

/// Read-only access to a factory's `getPool`.
pub trait FactoryClient: Send + Sync {
    /// Pool for the ordered pair at one fee tier; the zero address when none.
    fn get_pool(
        &self,
        pair: TokenPair,
        tier: FeeTier,
    ) -> impl Future<Output = MonitorResult<Address>> + Send;
}

/// [`FactoryClient`] backed by an alloy HTTP provider.
#[derive(Clone)]
pub struct AlloyFactoryClient {
    provider: Provider,
    factory: Address,
}

impl AlloyFactoryClient {
    /// Bind the factory at `factory` through `provider`.
    #[must_use]
    pub const fn new(provider: Provider, factory: Address) -> Self {
        Self { provider, factory }
    }

    /// Factory contract address.
    #[must_use]
    pub const fn factory(&self) -> Address {
        self.factory
    }
}

impl FactoryClient for AlloyFactoryClient {
    async fn get_pool(&self, pair: TokenPair, tier: FeeTier) -> MonitorResult<Address> {
        let factory = IUniswapV3Factory::new(self.factory, self.provider.clone());
        let IUniswapV3Factory::getPoolReturn { pool } = factory
            .getPool(pair.token0(), pair.token1(), U24::from(tier.fee()))
            .call()
            .await
            .map_err(|e| {
                MonitorError::rpc(
                    format!("getPool call failed for fee tier {tier}"),
                    Some(Box::new(e)),
                )
            })?;
        Ok(pool)
    }
}

/// Finds the pool for a token pair across fee tiers.
#[derive(Debug, Clone)]
pub struct PoolResolver<C> {
    client: C,
    tiers: Vec<FeeTier>,
}

impl<C: FactoryClient> PoolResolver<C> {
    /// Resolver over the canonical tier set.
    pub fn new(client: C) -> Self {
        Self::with_tiers(client, FeeTier::ALL.to_vec())
    }

    /// Resolver over a custom tier order.
    pub const fn with_tiers(client: C, tiers: Vec<FeeTier>) -> Self {
        Self { client, tiers }
    }

    /// Every tier that has a live pool, in tier order.
    ///
    /// # Errors
    ///
    /// Propagates the first failed factory call.
    #[instrument(skip(self), fields(token0 = %pair.token0(), token1 = %pair.token1()))]
    pub async fn find_all(&self, pair: TokenPair) -> MonitorResult<Vec<(FeeTier, Address)>> {
        let mut found = Vec::new();
        for &tier in &self.tiers {
            let pool = self.client.get_pool(pair, tier).await?;
            if pool == Address::ZERO {
                debug!(%tier, "No pool at tier");
            } else {
                debug!(%tier, %pool, "Pool found");
                found.push((tier, pool));
            }
        }
        Ok(found)
    }

    /// First pool found, stopping at the first live tier.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PoolNotFound`] if no tier has a pool, or the
    /// first failed factory call.
    #[instrument(skip(self), fields(token0 = %pair.token0(), token1 = %pair.token1()))]
    pub async fn resolve_first(&self, pair: TokenPair) -> MonitorResult<(FeeTier, Address)> {
        for &tier in &self.tiers {
            let pool = self.client.get_pool(pair, tier).await?;
            if pool != Address::ZERO {
                info!(%tier, %pool, "Resolved pool");
                return Ok((tier, pool));
            }
        }
        Err(self.not_found(pair))
    }

    /// Pool at the 0.3% tier when present, else the first found.
    ///
    /// This is a fixed tie-break, not a liquidity measurement.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PoolNotFound`] if no tier has a pool, or the
    /// first failed factory call.
    pub async fn resolve_preferred(&self, pair: TokenPair) -> MonitorResult<(FeeTier, Address)> {
        let found = self.find_all(pair).await?;

        match choose_preferred(&found) {
            Some((tier, pool)) => {
                if found.len() > 1 {
                    warn!(
                        candidates = found.len(),
                        %tier,
                        "Several fee tiers have pools, picked by static 0.3% preference"
                    );
                }
                info!(%tier, %pool, "Resolved pool");
                Ok((tier, pool))
            }
            None => Err(self.not_found(pair)),
        }
    }

    fn not_found(&self, pair: TokenPair) -> MonitorError {
        MonitorError::pool_not_found(
            pair.token0(),
            pair.token1(),
            self.tiers.iter().map(|t| t.fee()).collect(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

    #[derive(Default)]
    struct FakeFactory {
        pools: HashMap<u32, Address>,
        calls: Mutex<Vec<(TokenPair, u32)>>,
    }

    impl FakeFactory {
        fn with(pools: &[(u32, Address)]) -> Self {
            Self {
                pools: pools.iter().copied().collect(),
                calls: Mutex::default(),
            }
        }

        fn calls(&self) -> Vec<(TokenPair, u32)> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    impl FactoryClient for FakeFactory {
        async fn get_pool(&self, pair: TokenPair, tier: FeeTier) -> MonitorResult<Address> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((pair, tier.fee()));
            }
            Ok(self.pools.get(&tier.fee()).copied().unwrap_or(Address::ZERO))
        }
    }

    #[test]
    fn test_pair_is_ordered() {
        let pair = TokenPair::new(WETH, USDC);
        assert!(pair.is_ok());
        if let Ok(pair) = pair {
            assert_eq!(pair.token0(), USDC);
            assert_eq!(pair.token1(), WETH);
            assert_eq!(TokenPair::new(USDC, WETH).ok(), Some(pair));
        }
    }

    #[test]
    fn test_pair_rejects_same_token() {
        assert!(matches!(
            TokenPair::new(WETH, WETH),
            Err(MonitorError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_fee_tier_roundtrip() {
        for tier in FeeTier::ALL {
            assert_eq!(FeeTier::from_fee(tier.fee()), Some(tier));
        }
        assert_eq!(FeeTier::from_fee(200), None);
        assert_eq!(FeeTier::Medium.to_string(), "0.3%");
    }

    #[tokio::test]
    async fn test_resolve_first_stops_at_first_pool() {
        let pool = address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640");
        let resolver = PoolResolver::new(FakeFactory::with(&[(500, pool)]));
        let pair = TokenPair::new(WETH, USDC).unwrap_or_else(|e| panic!("{e}"));

        let resolved = resolver.resolve_first(pair).await;
        assert_eq!(resolved.ok(), Some((FeeTier::Low, pool)));

        let calls = resolver.client.calls();
        assert_eq!(calls.iter().map(|c| c.1).collect::<Vec<_>>(), vec![100, 500]);
        assert!(calls.iter().all(|(p, _)| p.token0() == USDC));
    }

    #[tokio::test]
    async fn test_resolve_preferred_picks_medium_tier() {
        let low = address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640");
        let medium = address!("8ad599c3A0ff1De082011EFDDc58f1908eb6e6D8");
        let resolver = PoolResolver::new(FakeFactory::with(&[(500, low), (3000, medium)]));
        let pair = TokenPair::new(USDC, WETH).unwrap_or_else(|e| panic!("{e}"));

        let resolved = resolver.resolve_preferred(pair).await;
        assert_eq!(resolved.ok(), Some((FeeTier::Medium, medium)));
        assert_eq!(resolver.client.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_resolve_preferred_falls_back_to_first() {
        let lowest = address!("0000000000000000000000000000000000000100");
        let high = address!("0000000000000000000000000000000000010000");
        let resolver = PoolResolver::new(FakeFactory::with(&[(10_000, high), (100, lowest)]));
        let pair = TokenPair::new(USDC, WETH).unwrap_or_else(|e| panic!("{e}"));

        let resolved = resolver.resolve_preferred(pair).await;
        assert_eq!(resolved.ok(), Some((FeeTier::Lowest, lowest)));
    }

    #[tokio::test]
    async fn test_no_pool_is_pool_not_found() {
        let resolver = PoolResolver::new(FakeFactory::default());
        let pair = TokenPair::new(USDC, WETH).unwrap_or_else(|e| panic!("{e}"));

        let err = resolver.resolve_preferred(pair).await;
        assert!(matches!(
            err,
            Err(MonitorError::PoolNotFound { ref fees_tried, .. }) if fees_tried == &vec![100, 500, 3000, 10_000]
        ));
        assert!(resolver.resolve_first(pair).await.is_err());
    }
}
