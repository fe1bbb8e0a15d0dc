/*
 * Constant-product pair discovery and reserve pricing
 */

use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CachePolicy, MemoCache};
use crate::dex::DexVenue;
use crate::models::{PoolDescriptor, QuoterError, Result, VenueKind};
use crate::rpc::contract::{token_address, token_uint, ContractReader};
use crate::rpc::ChainReader;
use crate::utils::Ratio;

#[derive(Clone)]
pub struct ConstantProductVenue {
    chain: Arc<dyn ChainReader>,
    factory: ContractReader,
    cache: MemoCache,
}

impl ConstantProductVenue {
    pub fn new(chain: Arc<dyn ChainReader>, factory: Address, cache: &MemoCache) -> Self {
        Self {
            factory: ContractReader::new(chain.clone(), factory),
            chain,
            cache: cache.scoped(),
        }
    }

    /// Pair address for the two tokens, `None` when the factory has none.
    /// Pair addresses never change once created, so hits are kept forever.
    pub async fn pair_address(&self, base: Address, quote: Address) -> Result<Option<Address>> {
        let factory = self.factory.clone();
        let pair = self
            .cache
            .get_or_fetch("get_pair", &(base, quote), CachePolicy::Forever, || async move {
                token_address(
                    factory
                        .read_one(
                            "getPair(address,address)",
                            &[Token::Address(base), Token::Address(quote)],
                            ParamType::Address,
                        )
                        .await?,
                )
            })
            .await?;

        if pair.is_zero() {
            self.cache.invalidate("get_pair", &(base, quote))?;
            return Ok(None);
        }
        Ok(Some(pair))
    }

    /// (reserve0, reserve1) in token order.
    pub async fn reserves(&self, pair: Address) -> Result<(U256, U256)> {
        let result = ContractReader::new(self.chain.clone(), pair)
            .read(
                "getReserves()",
                &[],
                &[ParamType::Uint(112), ParamType::Uint(112), ParamType::Uint(32)],
            )
            .await?;
        let mut tokens = result.into_iter();
        let reserve0 = tokens.next().map(token_uint).transpose()?;
        let reserve1 = tokens.next().map(token_uint).transpose()?;
        match (reserve0, reserve1) {
            (Some(r0), Some(r1)) => Ok((r0, r1)),
            _ => Err(QuoterError::ContractError(
                "Invalid reserves response - insufficient data".to_string(),
            )),
        }
    }

    /// Quote units per base unit from the two reserves.
    pub fn price_from_reserves(reserve_base: U256, reserve_quote: U256) -> Result<Ratio> {
        if reserve_base.is_zero() || reserve_quote.is_zero() {
            return Err(QuoterError::ContractError("Pool has no liquidity".to_string()));
        }
        Ratio::from_u256(reserve_quote).div(&Ratio::from_u256(reserve_base))
    }
}

#[async_trait]
impl DexVenue for ConstantProductVenue {
    fn kind(&self) -> VenueKind {
        VenueKind::ConstantProduct
    }

    async fn locate_pools(&self, base: Address, quote: Address) -> Result<Vec<PoolDescriptor>> {
        let pools = self
            .pair_address(base, quote)
            .await?
            .map(|address| PoolDescriptor {
                venue: VenueKind::ConstantProduct,
                address,
                fee_tier: super::FEE_TIER,
                base,
                quote,
            })
            .into_iter()
            .collect::<Vec<_>>();
        debug!("Constant-product pools for {:?}/{:?}: {}", base, quote, pools.len());
        Ok(pools)
    }

    async fn derive_price(&self, pool: &PoolDescriptor) -> Result<Ratio> {
        let (reserve0, reserve1) = self.reserves(pool.address).await?;
        if pool.base_is_token0() {
            Self::price_from_reserves(reserve0, reserve1)
        } else {
            Self::price_from_reserves(reserve1, reserve0)
        }
    }

    fn pool_fee_rate(&self, pool: &PoolDescriptor) -> Decimal {
        pool.fee_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockChain;

    const FACTORY: Address = ethers::types::H160([0xfa; 20]);

    fn pair_args(a: Address, b: Address) -> [Token; 2] {
        [Token::Address(a), Token::Address(b)]
    }

    #[test]
    fn reserve_ratio_is_exact() {
        let price = ConstantProductVenue::price_from_reserves(U256::from(1000u64), U256::from(2000u64)).unwrap();
        assert_eq!(price.to_string(), "2");
        assert!(ConstantProductVenue::price_from_reserves(U256::zero(), U256::one()).is_err());
    }

    #[tokio::test]
    async fn price_follows_token_order() {
        let chain = Arc::new(MockChain::new());
        let low = Address::repeat_byte(0x01);
        let high = Address::repeat_byte(0x02);
        let pair = Address::repeat_byte(0x99);
        chain.respond(
            pair,
            "getReserves()",
            &[],
            &[Token::Uint(U256::from(1000u64)), Token::Uint(U256::from(4000u64)), Token::Uint(U256::zero())],
        );
        let venue = ConstantProductVenue::new(chain, FACTORY, &MemoCache::new());

        let buy_high = PoolDescriptor {
            venue: VenueKind::ConstantProduct,
            address: pair,
            fee_tier: 2500,
            base: high,
            quote: low,
        };
        // reserve0 belongs to `low`: 1000 low buys 4000 high
        assert_eq!(venue.derive_price(&buy_high).await.unwrap().to_string(), "0.25");

        let buy_low = PoolDescriptor { base: low, quote: high, ..buy_high };
        assert_eq!(venue.derive_price(&buy_low).await.unwrap().to_string(), "4");
    }

    #[tokio::test]
    async fn missing_pair_is_not_remembered() {
        let chain = Arc::new(MockChain::new());
        let (a, b) = (Address::repeat_byte(0x01), Address::repeat_byte(0x02));
        chain.respond(FACTORY, "getPair(address,address)", &pair_args(a, b), &[Token::Address(Address::zero())]);
        let venue = ConstantProductVenue::new(chain.clone(), FACTORY, &MemoCache::new());

        assert!(venue.locate_pools(a, b).await.unwrap().is_empty());

        let pair = Address::repeat_byte(0x77);
        chain.respond(FACTORY, "getPair(address,address)", &pair_args(a, b), &[Token::Address(pair)]);
        let pools = venue.locate_pools(a, b).await.unwrap();
        assert_eq!(pools[0].address, pair);
        assert_eq!(pools[0].fee_rate().to_string(), "0.0025");

        venue.locate_pools(a, b).await.unwrap();
        assert_eq!(chain.call_count(FACTORY, "getPair(address,address)", &pair_args(a, b)), 2);
    }
}
