/*
 * Configuration for the quoting engine: endpoints, contract addresses and
 * routing knobs
 */

use crate::dex::{bonding_curve, concentrated, constant_product};
use crate::models::{QuoterError, Result};
use crate::router::ROUTER_ADDRESS;
use crate::utils::parse_address;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::env;

pub const BSC_CHAIN_ID: u64 = 56;
pub const DEFAULT_GAS_PRICE_TTL_MS: u64 = 10_000;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub chain: ChainConfig,
    pub contracts: ContractsConfig,
    pub routing: RoutingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub chain_id: u64,
    pub gas_price_ttl_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContractsConfig {
    pub router: Address,
    pub constant_product_factory: Address,
    pub concentrated_factory: Address,
    pub bonding_curve_manager: Address,
    pub bonding_curve_helper: Address,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Probe order for concentrated-liquidity pools, in millionths.
    pub concentrated_fee_tiers: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub json: bool,
}

impl Config {
    /// BSC mainnet deployments behind the given endpoint.
    pub fn bsc(rpc_url: impl Into<String>) -> Result<Self> {
        Ok(Config {
            chain: ChainConfig {
                rpc_url: rpc_url.into(),
                ws_url: None,
                chain_id: BSC_CHAIN_ID,
                gas_price_ttl_ms: DEFAULT_GAS_PRICE_TTL_MS,
            },
            contracts: ContractsConfig {
                router: parse_address(ROUTER_ADDRESS)?,
                constant_product_factory: parse_address(constant_product::FACTORY_ADDRESS)?,
                concentrated_factory: parse_address(concentrated::FACTORY_ADDRESS)?,
                bonding_curve_manager: parse_address(bonding_curve::MANAGER_ADDRESS)?,
                bonding_curve_helper: parse_address(bonding_curve::HELPER_ADDRESS)?,
            },
            routing: RoutingConfig {
                concentrated_fee_tiers: concentrated::DEFAULT_FEE_TIERS.to_vec(),
            },
            logging: LoggingConfig { json: false },
        })
    }

    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, starting from the BSC
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rpc_url = lookup("RPC_URL").ok_or_else(|| QuoterError::ConfigError("RPC_URL not set".to_string()))?;
        let mut config = Self::bsc(rpc_url)?;

        config.chain.ws_url = lookup("WS_URL").filter(|url| !url.is_empty());
        if let Some(chain_id) = lookup("CHAIN_ID") {
            config.chain.chain_id = chain_id
                .parse()
                .map_err(|e| QuoterError::ConfigError(format!("Invalid CHAIN_ID: {e}")))?;
        }
        if let Some(ttl) = lookup("GAS_PRICE_TTL_MS") {
            config.chain.gas_price_ttl_ms = ttl
                .parse()
                .map_err(|e| QuoterError::ConfigError(format!("Invalid GAS_PRICE_TTL_MS: {e}")))?;
        }

        let contracts = &mut config.contracts;
        for (key, slot) in [
            ("ROUTER_ADDRESS", &mut contracts.router),
            ("CONSTANT_PRODUCT_FACTORY", &mut contracts.constant_product_factory),
            ("CONCENTRATED_FACTORY", &mut contracts.concentrated_factory),
            ("BONDING_CURVE_MANAGER", &mut contracts.bonding_curve_manager),
            ("BONDING_CURVE_HELPER", &mut contracts.bonding_curve_helper),
        ] {
            if let Some(value) = lookup(key) {
                *slot = parse_address(&value)
                    .map_err(|e| QuoterError::ConfigError(format!("Invalid {key}: {e}")))?;
            }
        }

        if let Some(tiers) = lookup("CONCENTRATED_FEE_TIERS") {
            config.routing.concentrated_fee_tiers = parse_fee_tiers(&tiers)?;
        }
        if let Some(json) = lookup("LOG_JSON") {
            config.logging.json = matches!(json.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }
}

fn parse_fee_tiers(raw: &str) -> Result<Vec<u32>> {
    let tiers = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|e| QuoterError::ConfigError(format!("Invalid fee tier '{s}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    if tiers.is_empty() {
        return Err(QuoterError::ConfigError("CONCENTRATED_FEE_TIERS is empty".to_string()));
    }
    if tiers.iter().any(|&fee| fee >= 1_000_000) {
        return Err(QuoterError::ConfigError(format!("Fee tier out of range in '{raw}'")));
    }
    Ok(tiers)
}
