/*
 * Data models and error types shared by the venues, router and quote service
 */

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::utils::Ratio;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueKind {
    BondingCurve,
    ConstantProduct,
    ConcentratedLiquidity,
}

impl fmt::Display for VenueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VenueKind::BondingCurve => "bonding_curve",
            VenueKind::ConstantProduct => "constant_product",
            VenueKind::ConcentratedLiquidity => "concentrated_liquidity",
        };
        f.write_str(name)
    }
}

/// A pool that can serve a base/quote pair.
///
/// `base` is the asset being acquired, `quote` the asset paid for it.
/// `fee_tier` is in millionths (2500 = 0.25%), the unit the factories use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDescriptor {
    pub venue: VenueKind,
    pub address: Address,
    pub fee_tier: u32,
    pub base: Address,
    pub quote: Address,
}

impl PoolDescriptor {
    #[must_use]
    pub fn fee_rate(&self) -> Decimal {
        Decimal::from(self.fee_tier) / Decimal::from(1_000_000u32)
    }

    /// True when `base` sorts as token0 of the pool.
    #[must_use]
    pub fn base_is_token0(&self) -> bool {
        self.base < self.quote
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Quote-asset smallest units per base-asset smallest unit, so an input
    /// of the quote asset buys `amount_in / price` of the base asset. Every
    /// min-out and max-in bound relies on this orientation. Serialized
    /// exactly.
    pub price: Ratio,
    pub pool: PoolDescriptor,
    pub fallback: bool,
    pub quoted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub in_asset: Address,
    pub out_asset: Address,
    pub in_amount: U256,
    pub slippage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum TradeBound {
    MinOut(U256),
    MaxIn(U256),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeParams {
    pub venue: VenueKind,
    pub pool: Address,
    pub fee_tier: u32,
    pub amount_in: U256,
    pub bound: TradeBound,
}

impl TradeParams {
    #[must_use]
    pub fn min_out(&self) -> Option<U256> {
        match self.bound {
            TradeBound::MinOut(v) => Some(v),
            TradeBound::MaxIn(_) => None,
        }
    }
}

/// On-chain record of a bonding-curve listing.
///
/// `last_price` is the number of quote smallest units one whole token costs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondingCurveState {
    pub version: u64,
    pub manager: Address,
    pub quote: Address,
    pub last_price: U256,
    pub trading_fee_rate: Decimal,
    pub min_trading_fee: U256,
    pub launch_time: u64,
    pub offers: U256,
    pub max_offers: U256,
    pub funds: U256,
    pub max_funds: U256,
    pub liquidity_added: bool,
}

/// Fields of a listing that never change once it exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCurveInfo {
    pub version: u64,
    pub manager: Address,
    pub quote: Address,
    pub launch_time: u64,
    pub trading_fee_rate: Decimal,
    pub min_trading_fee: U256,
}

impl From<&BondingCurveState> for StaticCurveInfo {
    fn from(state: &BondingCurveState) -> Self {
        Self {
            version: state.version,
            manager: state.manager,
            quote: state.quote,
            launch_time: state.launch_time,
            trading_fee_rate: state.trading_fee_rate,
            min_trading_fee: state.min_trading_fee,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum QuoterError {
    #[error("Token {0:?} is not listed on the bonding curve")]
    NotListed(Address),

    #[error("No pool found for {base:?}/{quote:?}")]
    PoolNotFound { base: Address, quote: Address },

    #[error("Amount too small: fee {fee} consumes input {amount}")]
    AmountTooSmall { amount: U256, fee: U256 },

    #[error("Invalid slippage {0}: must be within [0, 1)")]
    InvalidSlippage(Decimal),

    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Contract interaction error: {0}")]
    ContractError(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    #[error("Transaction reverted: {0:?}")]
    TransactionReverted(ethers::types::H256),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, QuoterError>;
