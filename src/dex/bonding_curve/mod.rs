/*
 * Bonding-curve launch market: tokens trade against the curve until their
 * liquidity migrates to an AMM pool
 */

mod curve;

pub use curve::BondingCurveVenue;

use ethers::types::U256;
use rust_decimal::Decimal;

pub const MANAGER_ADDRESS: &str = "0x5c952063c7fc8610FFDB798152D69F0B9550762b";
pub const HELPER_ADDRESS: &str = "0xF251F83e40a78868FcfA3FA4599Dad6494E46034";

/// The manager only accepts amounts that are whole multiples of 10^9
/// smallest units.
pub const ALIGNMENT: U256 = U256([1_000_000_000, 0, 0, 0]);

/// LP trading fee charged on top of funds sent with a listing (0.25%).
pub const LISTING_FEE_RATE: Decimal = Decimal::from_parts(25, 0, 0, false, 4);

/// Flat cost of creating a listing: 0.01 of the native asset.
pub const LAUNCH_COST: U256 = U256([10_000_000_000_000_000, 0, 0, 0]);

/// Fee rates come back from the helper in units of 1/10000.
pub(crate) const FEE_RATE_DENOMINATOR: u32 = 10_000;
