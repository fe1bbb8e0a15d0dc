/*
 * Constant-product (x*y=k) pair venue
 */

mod pool;

pub use pool::ConstantProductVenue;

pub const FACTORY_ADDRESS: &str = "0xcA143Ce32Fe78f1f7019d7d551a6402fC5350c73";

/// Every pair charges 0.25%, in factory fee units.
pub const FEE_TIER: u32 = 2500;
