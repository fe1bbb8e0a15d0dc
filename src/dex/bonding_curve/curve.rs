/*
 * Bonding-curve listing reads, fee math and trade parameter construction
 */

use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, U256};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ALIGNMENT, FEE_RATE_DENOMINATOR, LAUNCH_COST, LISTING_FEE_RATE};
use crate::cache::{CachePolicy, MemoCache};
use crate::dex::DexVenue;
use crate::fees::{self, align_down, deduct_fee, net_proceeds, unit_scale, validate_slippage, FeeSplit};
use crate::models::{
    BondingCurveState, PoolDescriptor, QuoterError, Result, StaticCurveInfo, TradeBound, TradeParams, VenueKind,
};
use crate::rpc::contract::{token_address, token_bool, token_uint, u256_to_u64, ContractReader};
use crate::rpc::erc20::read_decimals;
use crate::rpc::ChainReader;
use crate::utils::{biguint_to_u256, Ratio};

const GET_TOKEN_INFO: &str = "getTokenInfo(address)";

fn fee_tier_of(rate: Decimal) -> Result<u32> {
    (rate * Decimal::from(1_000_000u32))
        .trunc()
        .to_u32()
        .ok_or_else(|| QuoterError::CalculationError(format!("Fee rate {rate} has no fee tier")))
}

impl BondingCurveState {
    fn ensure_priced(&self) -> Result<()> {
        if self.last_price.is_zero() {
            return Err(QuoterError::ContractError("Curve reports a zero price".to_string()));
        }
        Ok(())
    }

    pub fn fee_for_buy(&self, funds_in: U256) -> Result<FeeSplit> {
        deduct_fee(funds_in, self.trading_fee_rate, self.min_trading_fee)
    }

    /// Smallest token units guaranteed for `funds_in`, after the buy fee:
    /// floor(net * 10^decimals / last_price * (1 - slippage)), aligned down.
    pub fn min_out_token(&self, funds_in: U256, slippage: Decimal, decimals: u8) -> Result<U256> {
        validate_slippage(slippage)?;
        self.ensure_priced()?;
        let split = self.fee_for_buy(funds_in)?;
        let scaled = Ratio::from_u256(split.net).mul(&unit_scale(decimals));
        let out = fees::min_out(&scaled, &Ratio::from_u256(self.last_price), slippage)?;
        Ok(align_down(out, ALIGNMENT))
    }

    /// Quote units guaranteed for selling `amount` token units: proceeds at
    /// `last_price` less slippage, rounded down, then less the sell fee,
    /// clamped at zero.
    pub fn min_out_base(&self, amount: U256, slippage: Decimal, decimals: u8) -> Result<U256> {
        validate_slippage(slippage)?;
        self.ensure_priced()?;
        let value = Ratio::from_u256(amount).mul(&Ratio::from_u256(self.last_price));
        let gross = fees::min_out(&value, &unit_scale(decimals), slippage)?;
        net_proceeds(gross, self.trading_fee_rate, self.min_trading_fee)
    }

    /// Quote units per token unit.
    pub fn unit_price(&self, decimals: u8) -> Result<Ratio> {
        self.ensure_priced()?;
        Ratio::from_u256(self.last_price).div(&unit_scale(decimals))
    }

    pub fn fee_tier(&self) -> Result<u32> {
        fee_tier_of(self.trading_fee_rate)
    }
}

/// Funds to send with a listing so the LP fee is covered: funds * 1.0025,
/// rounded half up, aligned down.
pub fn value_with_listing_fee(funds: U256) -> Result<U256> {
    let with_fee = Ratio::from_u256(funds).mul(&Ratio::one().add(&Ratio::from_decimal(LISTING_FEE_RATE)?));
    Ok(align_down(biguint_to_u256(&with_fee.round_half_up())?, ALIGNMENT))
}

#[derive(Clone)]
pub struct BondingCurveVenue {
    chain: Arc<dyn ChainReader>,
    manager: Address,
    helper: ContractReader,
    cache: MemoCache,
}

impl BondingCurveVenue {
    pub fn new(chain: Arc<dyn ChainReader>, manager: Address, helper: Address, cache: &MemoCache) -> Self {
        Self {
            helper: ContractReader::new(chain.clone(), helper),
            chain,
            manager,
            cache: cache.scoped(),
        }
    }

    #[must_use]
    pub fn manager(&self) -> Address {
        self.manager
    }

    /// Live curve record. Fails with `NotListed` when the helper knows
    /// nothing about `token`.
    pub async fn get_state(&self, token: Address) -> Result<BondingCurveState> {
        let mut fields = self
            .helper
            .read(
                GET_TOKEN_INFO,
                &[Token::Address(token)],
                &[
                    ParamType::Uint(256),
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Bool,
                ],
            )
            .await?
            .into_iter();
        let mut next = || {
            fields
                .next()
                .ok_or_else(|| QuoterError::ContractError("Invalid token info - insufficient data".to_string()))
        };

        let version = u256_to_u64(token_uint(next()?)?, "version")?;
        if version == 0 {
            return Err(QuoterError::NotListed(token));
        }
        let manager = token_address(next()?)?;
        let quote = token_address(next()?)?;
        let last_price = token_uint(next()?)?;
        let raw_fee_rate = u256_to_u64(token_uint(next()?)?, "tradingFeeRate")?;
        let trading_fee_rate = Decimal::from(raw_fee_rate) / Decimal::from(FEE_RATE_DENOMINATOR);
        if trading_fee_rate >= Decimal::ONE {
            return Err(QuoterError::ContractError(format!("Trading fee rate out of range: {trading_fee_rate}")));
        }

        Ok(BondingCurveState {
            version,
            manager,
            quote,
            last_price,
            trading_fee_rate,
            min_trading_fee: token_uint(next()?)?,
            launch_time: u256_to_u64(token_uint(next()?)?, "launchTime")?,
            offers: token_uint(next()?)?,
            max_offers: token_uint(next()?)?,
            funds: token_uint(next()?)?,
            max_funds: token_uint(next()?)?,
            liquidity_added: token_bool(next()?)?,
        })
    }

    /// The part of the record that never changes once a listing exists.
    pub async fn static_state(&self, token: Address) -> Result<StaticCurveInfo> {
        let venue = self.clone();
        self.cache
            .get_or_fetch("static_state", &token, CachePolicy::Forever, || async move {
                Ok(StaticCurveInfo::from(&venue.get_state(token).await?))
            })
            .await
    }

    pub async fn decimals(&self, token: Address) -> Result<u8> {
        let contract = ContractReader::new(self.chain.clone(), token);
        self.cache
            .get_or_fetch("decimals", &token, CachePolicy::Forever, || async move {
                read_decimals(&contract).await
            })
            .await
    }

    pub async fn compute_fee_for_buy(&self, token: Address, funds_in: U256) -> Result<FeeSplit> {
        let info = self.static_state(token).await?;
        deduct_fee(funds_in, info.trading_fee_rate, info.min_trading_fee)
    }

    pub async fn compute_min_out_token(&self, token: Address, funds_in: U256, slippage: Decimal) -> Result<U256> {
        validate_slippage(slippage)?;
        let state = self.get_state(token).await?;
        let decimals = self.decimals(token).await?;
        state.min_out_token(funds_in, slippage, decimals)
    }

    pub async fn compute_min_out_base(&self, token: Address, amount: U256, slippage: Decimal) -> Result<U256> {
        validate_slippage(slippage)?;
        let state = self.get_state(token).await?;
        let decimals = self.decimals(token).await?;
        state.min_out_base(amount, slippage, decimals)
    }

    /// Buy parameters against an already-read record. The submitted amount
    /// is aligned first and the bound derived from what is actually sent.
    pub async fn trade_params_buy(
        &self,
        token: Address,
        state: &BondingCurveState,
        funds_in: U256,
        slippage: Decimal,
    ) -> Result<TradeParams> {
        let amount_in = align_down(funds_in, ALIGNMENT);
        let decimals = self.decimals(token).await?;
        let min_out = state.min_out_token(amount_in, slippage, decimals)?;
        debug!("Curve buy of {:?}: {} in, at least {} out", token, amount_in, min_out);
        Ok(TradeParams {
            venue: VenueKind::BondingCurve,
            pool: state.manager,
            fee_tier: state.fee_tier()?,
            amount_in,
            bound: TradeBound::MinOut(min_out),
        })
    }

    pub async fn trade_params_sell(
        &self,
        token: Address,
        state: &BondingCurveState,
        amount: U256,
        slippage: Decimal,
    ) -> Result<TradeParams> {
        let amount_in = align_down(amount, ALIGNMENT);
        let decimals = self.decimals(token).await?;
        let min_out = align_down(state.min_out_base(amount_in, slippage, decimals)?, ALIGNMENT);
        debug!("Curve sell of {:?}: {} in, at least {} out", token, amount_in, min_out);
        Ok(TradeParams {
            venue: VenueKind::BondingCurve,
            pool: state.manager,
            fee_tier: state.fee_tier()?,
            amount_in,
            bound: TradeBound::MinOut(min_out),
        })
    }

    /// `None` once the listing's liquidity has moved to an AMM.
    pub async fn quote_buy(&self, token: Address, funds_in: U256, slippage: Decimal) -> Result<Option<TradeParams>> {
        validate_slippage(slippage)?;
        let state = self.get_state(token).await?;
        if state.liquidity_added {
            info!("Curve for {:?} has migrated its liquidity", token);
            return Ok(None);
        }
        self.trade_params_buy(token, &state, funds_in, slippage).await.map(Some)
    }

    pub async fn quote_sell(&self, token: Address, amount: U256, slippage: Decimal) -> Result<Option<TradeParams>> {
        validate_slippage(slippage)?;
        let state = self.get_state(token).await?;
        if state.liquidity_added {
            info!("Curve for {:?} has migrated its liquidity", token);
            return Ok(None);
        }
        self.trade_params_sell(token, &state, amount, slippage).await.map(Some)
    }

    pub fn value_with_listing_fee(funds: U256) -> Result<U256> {
        value_with_listing_fee(funds)
    }

    /// Value to send when creating a listing with an initial buy of
    /// `initial_buy`.
    pub fn launch_value(initial_buy: U256) -> Result<U256> {
        let total = initial_buy
            .checked_add(LAUNCH_COST)
            .ok_or_else(|| QuoterError::CalculationError("Launch value overflows".to_string()))?;
        value_with_listing_fee(total)
    }

    /// Live listing that trades `token` against `counter`, if any.
    async fn tradable(&self, token: Address, counter: Address) -> Result<Option<BondingCurveState>> {
        match self.get_state(token).await {
            Ok(state) if state.quote == counter && !state.liquidity_added => Ok(Some(state)),
            Ok(_) | Err(QuoterError::NotListed(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DexVenue for BondingCurveVenue {
    fn kind(&self) -> VenueKind {
        VenueKind::BondingCurve
    }

    async fn locate_pools(&self, base: Address, quote: Address) -> Result<Vec<PoolDescriptor>> {
        let state = match self.tradable(base, quote).await? {
            Some(state) => Some(state),
            None => self.tradable(quote, base).await?,
        };
        state
            .map(|state| {
                Ok(PoolDescriptor {
                    venue: VenueKind::BondingCurve,
                    address: state.manager,
                    fee_tier: state.fee_tier()?,
                    base,
                    quote,
                })
            })
            .into_iter()
            .collect()
    }

    async fn derive_price(&self, pool: &PoolDescriptor) -> Result<Ratio> {
        match self.get_state(pool.base).await {
            Ok(state) => state.unit_price(self.decimals(pool.base).await?),
            Err(QuoterError::NotListed(_)) => {
                let state = self.get_state(pool.quote).await?;
                Ratio::one().div(&state.unit_price(self.decimals(pool.quote).await?)?)
            }
            Err(e) => Err(e),
        }
    }

    fn pool_fee_rate(&self, pool: &PoolDescriptor) -> Decimal {
        pool.fee_rate()
    }
}
