/*
 * Concentrated-liquidity venue: one pool per fee tier
 */

mod pool;

pub use pool::ConcentratedLiquidityVenue;

pub const FACTORY_ADDRESS: &str = "0x0BFbCF9fa4f9C56B0F40a671Ad40E0805A091865";

/// Probe order for pool discovery: 0.01%, 0.05%, 0.25%, 1%.
pub const DEFAULT_FEE_TIERS: [u32; 4] = [100, 500, 2500, 10_000];
