/*
 * Concentrated-liquidity pool discovery across fee tiers and slot0 pricing
 */

use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, U256};
use futures::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::dex::DexVenue;
use crate::models::{PoolDescriptor, QuoterError, Result, VenueKind};
use crate::rpc::contract::{token_address, token_uint, ContractReader};
use crate::rpc::ChainReader;
use crate::utils::{sqrt_price_x96_to_price, Ratio};

#[derive(Clone)]
pub struct ConcentratedLiquidityVenue {
    chain: Arc<dyn ChainReader>,
    factory: ContractReader,
    fee_tiers: Vec<u32>,
}

impl ConcentratedLiquidityVenue {
    pub fn new(chain: Arc<dyn ChainReader>, factory: Address, fee_tiers: Vec<u32>) -> Self {
        Self {
            factory: ContractReader::new(chain.clone(), factory),
            chain,
            fee_tiers,
        }
    }

    #[must_use]
    pub fn fee_tiers(&self) -> &[u32] {
        &self.fee_tiers
    }

    pub async fn pool_address(&self, base: Address, quote: Address, fee: u32) -> Result<Option<Address>> {
        let pool = token_address(
            self.factory
                .read_one(
                    "getPool(address,address,uint24)",
                    &[Token::Address(base), Token::Address(quote), Token::Uint(U256::from(fee))],
                    ParamType::Address,
                )
                .await?,
        )?;
        Ok((!pool.is_zero()).then_some(pool))
    }

    pub async fn sqrt_price_x96(&self, pool: Address) -> Result<U256> {
        let slot0 = ContractReader::new(self.chain.clone(), pool)
            .read("slot0()", &[], &[ParamType::Uint(160), ParamType::Int(24)])
            .await?;
        let sqrt_price = slot0
            .into_iter()
            .next()
            .ok_or_else(|| QuoterError::ContractError("Invalid slot0 response".to_string()))?;
        token_uint(sqrt_price)
    }
}

#[async_trait]
impl DexVenue for ConcentratedLiquidityVenue {
    fn kind(&self) -> VenueKind {
        VenueKind::ConcentratedLiquidity
    }

    /// All tiers are probed at once, but results are read back in tier order:
    /// the outcome never depends on which probe answers first. A failed probe
    /// ahead of the first pool found aborts discovery.
    async fn locate_pools(&self, base: Address, quote: Address) -> Result<Vec<PoolDescriptor>> {
        let probes = join_all(
            self.fee_tiers
                .iter()
                .map(|&fee| async move { (fee, self.pool_address(base, quote, fee).await) }),
        )
        .await;

        let mut pools = Vec::new();
        for (fee, probe) in probes {
            match probe {
                Ok(Some(address)) => pools.push(PoolDescriptor {
                    venue: VenueKind::ConcentratedLiquidity,
                    address,
                    fee_tier: fee,
                    base,
                    quote,
                }),
                Ok(None) => {}
                Err(e) if pools.is_empty() => return Err(e),
                Err(e) => warn!("Ignoring failed probe for fee tier {}: {}", fee, e),
            }
        }
        debug!("Concentrated pools for {:?}/{:?}: {}", base, quote, pools.len());
        Ok(pools)
    }

    async fn derive_price(&self, pool: &PoolDescriptor) -> Result<Ratio> {
        let token1_per_token0 = sqrt_price_x96_to_price(self.sqrt_price_x96(pool.address).await?)?;
        if pool.base_is_token0() {
            Ok(token1_per_token0)
        } else {
            Ratio::one().div(&token1_per_token0)
        }
    }

    fn pool_fee_rate(&self, pool: &PoolDescriptor) -> Decimal {
        pool.fee_rate()
    }
}
