/*
 * AMM router: pool discovery with fee-tier fallback, pricing and trade bounds
 */

use chrono::Utc;
use ethers::abi::ParamType;
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CachePolicy, MemoCache};
use crate::dex::{ConcentratedLiquidityVenue, ConstantProductVenue, DexVenue};
use crate::fees::{apply_pool_fee, max_in, min_out, validate_slippage};
use crate::metrics::QuoterMetrics;
use crate::models::{PoolDescriptor, PriceQuote, QuoterError, Result, TradeBound, TradeParams, VenueKind};
use crate::rpc::contract::{token_address, ContractReader};
use crate::rpc::ChainReader;
use crate::utils::Ratio;

pub const ROUTER_ADDRESS: &str = "0x13f4EA83D0bd40E75C8222255bc855a974568Dd4";

#[derive(Clone)]
pub struct Router {
    contract: ContractReader,
    constant_product: ConstantProductVenue,
    concentrated: ConcentratedLiquidityVenue,
    cache: MemoCache,
    metrics: Option<Arc<QuoterMetrics>>,
}

impl Router {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        address: Address,
        constant_product: ConstantProductVenue,
        concentrated: ConcentratedLiquidityVenue,
        cache: &MemoCache,
    ) -> Self {
        Self {
            contract: ContractReader::new(chain, address),
            constant_product,
            concentrated,
            cache: cache.scoped(),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<QuoterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.contract.address()
    }

    async fn immutable_address(&self, operation: &'static str, signature: &'static str) -> Result<Address> {
        let contract = self.contract.clone();
        self.cache
            .get_or_fetch(operation, &(), CachePolicy::Forever, || async move {
                token_address(contract.read_one(signature, &[], ParamType::Address).await?)
            })
            .await
    }

    /// Wrapped form of the native asset, used wherever an AMM needs a token.
    pub async fn native_wrapped_address(&self) -> Result<Address> {
        self.immutable_address("native_wrapped_address", "WETH9()").await
    }

    pub async fn factory_v2(&self) -> Result<Address> {
        self.immutable_address("factory_v2", "factoryV2()").await
    }

    pub async fn factory_v3(&self) -> Result<Address> {
        self.immutable_address("factory_v3", "factory()").await
    }

    fn venue(&self, kind: VenueKind) -> Result<&dyn DexVenue> {
        match kind {
            VenueKind::ConstantProduct => Ok(&self.constant_product),
            VenueKind::ConcentratedLiquidity => Ok(&self.concentrated),
            VenueKind::BondingCurve => Err(QuoterError::ConfigError(format!("Router does not serve {kind} pools"))),
        }
    }

    /// Pool to trade `quote` for `base`: the constant-product pair when one
    /// exists, otherwise the first concentrated pool in fee-tier order.
    pub async fn get_pool(&self, base: Address, quote: Address) -> Result<PoolDescriptor> {
        let constant_product = self.constant_product.clone();
        let concentrated = self.concentrated.clone();
        self.cache
            .get_or_fetch("get_pool", &(base, quote), CachePolicy::Forever, || async move {
                if let Some(pool) = constant_product.locate_pools(base, quote).await?.into_iter().next() {
                    debug!("Using constant-product pair {:?}", pool.address);
                    return Ok(pool);
                }
                match concentrated.locate_pools(base, quote).await?.into_iter().next() {
                    Some(pool) => {
                        info!(
                            "No constant-product pair for {:?}/{:?}, falling back to fee tier {}",
                            base, quote, pool.fee_tier
                        );
                        Ok(pool)
                    }
                    None => Err(QuoterError::PoolNotFound { base, quote }),
                }
            })
            .await
    }

    pub async fn get_price(&self, pool: &PoolDescriptor) -> Result<Ratio> {
        self.venue(pool.venue)?.derive_price(pool).await
    }

    pub fn pool_fee_rate(&self, pool: &PoolDescriptor) -> Result<Decimal> {
        Ok(self.venue(pool.venue)?.pool_fee_rate(pool))
    }

    pub async fn quote(&self, base: Address, quote: Address) -> Result<PriceQuote> {
        let pool = self.get_pool(base, quote).await?;
        let price = self.get_price(&pool).await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_quote(pool.venue);
        }
        Ok(PriceQuote {
            price,
            fallback: pool.venue == VenueKind::ConcentratedLiquidity,
            pool,
            quoted_at: Utc::now(),
        })
    }

    /// floor(amount_in * (1 - pool fee) / price * (1 - slippage))
    pub async fn get_min_out_token(
        &self,
        out_asset: Address,
        in_asset: Address,
        amount_in: U256,
        slippage: Decimal,
    ) -> Result<U256> {
        Ok(self.exact_in(out_asset, in_asset, amount_in, slippage).await?.1)
    }

    /// ceil(amount_out * price * (1 + slippage) / (1 - pool fee))
    pub async fn get_max_in_token(
        &self,
        out_asset: Address,
        in_asset: Address,
        amount_out: U256,
        slippage: Decimal,
    ) -> Result<U256> {
        validate_slippage(slippage)?;
        let quote = self.quote(out_asset, in_asset).await?;
        max_in(amount_out, &quote.price, slippage, self.pool_fee_rate(&quote.pool)?)
    }

    pub async fn trade_params(
        &self,
        out_asset: Address,
        in_asset: Address,
        amount_in: U256,
        slippage: Decimal,
    ) -> Result<TradeParams> {
        let (pool, min_out) = self.exact_in(out_asset, in_asset, amount_in, slippage).await?;
        Ok(TradeParams {
            venue: pool.venue,
            pool: pool.address,
            fee_tier: pool.fee_tier,
            amount_in,
            bound: TradeBound::MinOut(min_out),
        })
    }

    async fn exact_in(
        &self,
        out_asset: Address,
        in_asset: Address,
        amount_in: U256,
        slippage: Decimal,
    ) -> Result<(PoolDescriptor, U256)> {
        validate_slippage(slippage)?;
        let quote = self.quote(out_asset, in_asset).await?;
        let real_in = apply_pool_fee(amount_in, self.pool_fee_rate(&quote.pool)?)?;
        let out = min_out(&real_in, &quote.price, slippage)?;
        debug!(
            "{} {:?} -> at least {} {:?} via {} pool {:?}",
            amount_in, in_asset, out, out_asset, quote.pool.venue, quote.pool.address
        );
        Ok((quote.pool, out))
    }
}
