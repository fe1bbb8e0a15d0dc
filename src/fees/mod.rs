/*
 * Fee and slippage arithmetic
 *
 * Rounding policy: delivered outputs round down, fees round up, sell
 * proceeds round down, spend ceilings round up.
 */

use ethers::types::U256;
use num_bigint::BigUint;
use rust_decimal::Decimal;

use crate::models::{QuoterError, Result};
use crate::utils::{biguint_to_u256, Ratio};

pub fn validate_slippage(slippage: Decimal) -> Result<()> {
    if slippage < Decimal::ZERO || slippage >= Decimal::ONE {
        return Err(QuoterError::InvalidSlippage(slippage));
    }
    Ok(())
}

fn complement(rate: Decimal) -> Result<Ratio> {
    Ratio::one()
        .checked_sub(&Ratio::from_decimal(rate)?)
        .ok_or_else(|| QuoterError::CalculationError(format!("Rate {rate} exceeds one")))
}

/// max(ceil(amount * fee_rate), min_fee)
pub fn trading_fee(amount: U256, fee_rate: Decimal, min_fee: U256) -> Result<U256> {
    let proportional = Ratio::from_u256(amount).mul(&Ratio::from_decimal(fee_rate)?).ceil();
    Ok(biguint_to_u256(&proportional)?.max(min_fee))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub fee: U256,
    pub net: U256,
}

/// Deducts the trading fee from a gross input; nothing may be left over for
/// the fee to swallow.
pub fn deduct_fee(amount: U256, fee_rate: Decimal, min_fee: U256) -> Result<FeeSplit> {
    let fee = trading_fee(amount, fee_rate, min_fee)?;
    if fee >= amount {
        return Err(QuoterError::AmountTooSmall { amount, fee });
    }
    Ok(FeeSplit {
        fee,
        net: amount - fee,
    })
}

/// Proceeds left after the fee, clamped at zero.
pub fn net_proceeds(gross: U256, fee_rate: Decimal, min_fee: U256) -> Result<U256> {
    let fee = trading_fee(gross, fee_rate, min_fee)?;
    Ok(gross.saturating_sub(fee))
}

/// amount * (1 - fee_rate), kept exact.
pub fn apply_pool_fee(amount_in: U256, fee_rate: Decimal) -> Result<Ratio> {
    Ok(Ratio::from_u256(amount_in).mul(&complement(fee_rate)?))
}

/// floor(amount_in / price * (1 - slippage))
pub fn min_out(amount_in: &Ratio, price: &Ratio, slippage: Decimal) -> Result<U256> {
    validate_slippage(slippage)?;
    let out = amount_in.div(price)?.mul(&complement(slippage)?);
    biguint_to_u256(&out.floor())
}

/// ceil(amount_out * price * (1 + slippage) / (1 - fee_rate))
pub fn max_in(amount_out: U256, price: &Ratio, slippage: Decimal, fee_rate: Decimal) -> Result<U256> {
    validate_slippage(slippage)?;
    let with_slippage = Ratio::one().add(&Ratio::from_decimal(slippage)?);
    let spend = Ratio::from_u256(amount_out)
        .mul(price)
        .mul(&with_slippage)
        .div(&complement(fee_rate)?)?;
    biguint_to_u256(&spend.ceil())
}

#[must_use]
pub fn align_down(value: U256, granularity: U256) -> U256 {
    if granularity.is_zero() {
        return value;
    }
    value / granularity * granularity
}

/// Whole-unit multiplier for a token with `decimals` places.
#[must_use]
pub fn unit_scale(decimals: u8) -> Ratio {
    Ratio::from_integer(BigUint::from(10u32).pow(u32::from(decimals)))
}
