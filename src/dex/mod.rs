/*
 * Trading venues: a bonding-curve launch market and two AMM styles
 */

pub mod bonding_curve;
pub mod concentrated;
pub mod constant_product;

use async_trait::async_trait;
use ethers::types::{Address, H160};
use rust_decimal::Decimal;

use crate::models::{PoolDescriptor, Result, VenueKind};
use crate::utils::Ratio;

pub use bonding_curve::BondingCurveVenue;
pub use concentrated::ConcentratedLiquidityVenue;
pub use constant_product::ConstantProductVenue;

/// Zero address, used for the chain's native asset.
pub const NATIVE_ASSET: Address = H160([0u8; 20]);

#[async_trait]
pub trait DexVenue: Send + Sync {
    fn kind(&self) -> VenueKind;

    /// Pools serving `base`/`quote` in preference order; empty when the venue
    /// has none.
    async fn locate_pools(&self, base: Address, quote: Address) -> Result<Vec<PoolDescriptor>>;

    /// Quote smallest units per base smallest unit.
    async fn derive_price(&self, pool: &PoolDescriptor) -> Result<Ratio>;

    fn pool_fee_rate(&self, pool: &PoolDescriptor) -> Decimal;
}
