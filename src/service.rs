/*
 * Quote service: wires the venues together and turns a trade intent into
 * executable trade parameters
 */

use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    cache::MemoCache,
    config::Config,
    dex::{BondingCurveVenue, ConcentratedLiquidityVenue, ConstantProductVenue, NATIVE_ASSET},
    fees::validate_slippage,
    metrics::QuoterMetrics,
    models::{QuoterError, Result, TradeIntent, TradeParams, VenueKind},
    router::Router,
    rpc::{ChainClient, ChainReader, RpcClient},
};

pub struct QuoteService {
    config: Config,
    chain: ChainClient,
    bonding_curve: BondingCurveVenue,
    router: Router,
    metrics: Arc<QuoterMetrics>,
}

impl QuoteService {
    pub async fn connect(config: &Config) -> Result<Self> {
        info!("Initializing quote service");

        let rpc = Arc::new(RpcClient::new(&config.chain.rpc_url, config.chain.chain_id).await?);
        info!("Connected to chain {}", config.chain.chain_id);

        Self::from_reader(rpc, config)
    }

    pub fn from_reader(reader: Arc<dyn ChainReader>, config: &Config) -> Result<Self> {
        let metrics = Arc::new(QuoterMetrics::new()?);
        let cache = MemoCache::new().with_metrics(metrics.clone());
        let contracts = &config.contracts;

        let chain = ChainClient::new(
            reader.clone(),
            &cache,
            Duration::from_millis(config.chain.gas_price_ttl_ms),
        );
        let bonding_curve = BondingCurveVenue::new(
            reader.clone(),
            contracts.bonding_curve_manager,
            contracts.bonding_curve_helper,
            &cache,
        );
        let constant_product = ConstantProductVenue::new(reader.clone(), contracts.constant_product_factory, &cache);
        let concentrated = ConcentratedLiquidityVenue::new(
            reader.clone(),
            contracts.concentrated_factory,
            config.routing.concentrated_fee_tiers.clone(),
        );
        let router = Router::new(reader, contracts.router, constant_product, concentrated, &cache)
            .with_metrics(metrics.clone());
        debug!("Venues initialized");

        Ok(Self {
            config: config.clone(),
            chain,
            bonding_curve,
            router,
            metrics,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn chain(&self) -> &ChainClient {
        &self.chain
    }

    #[must_use]
    pub fn bonding_curve(&self) -> &BondingCurveVenue {
        &self.bonding_curve
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<QuoterMetrics> {
        self.metrics.clone()
    }

    /// Checks the endpoint and the router against the configured deployment.
    pub async fn verify_deployment(&self) -> Result<()> {
        let chain_id = self.chain.chain_id().await?;
        if chain_id != self.config.chain.chain_id {
            return Err(QuoterError::ConfigError(format!(
                "Chain ID mismatch: expected {}, got {}",
                self.config.chain.chain_id, chain_id
            )));
        }

        let (factory_v2, factory_v3) = tokio::try_join!(self.router.factory_v2(), self.router.factory_v3())?;
        let contracts = &self.config.contracts;
        if factory_v2 != contracts.constant_product_factory {
            warn!("Router reports constant-product factory {:?}", factory_v2);
            return Err(QuoterError::ConfigError(format!(
                "Constant-product factory mismatch: configured {:?}, router uses {:?}",
                contracts.constant_product_factory, factory_v2
            )));
        }
        if factory_v3 != contracts.concentrated_factory {
            warn!("Router reports concentrated factory {:?}", factory_v3);
            return Err(QuoterError::ConfigError(format!(
                "Concentrated factory mismatch: configured {:?}, router uses {:?}",
                contracts.concentrated_factory, factory_v3
            )));
        }

        info!("Deployment verified on chain {}", chain_id);
        Ok(())
    }

    /// A native in-asset buys the out asset, anything else sells the in
    /// asset. Live curve listings are quoted on the curve; everything else
    /// goes through the router with the native asset wrapped.
    pub async fn trade_params(&self, intent: &TradeIntent) -> Result<TradeParams> {
        validate_slippage(intent.slippage)?;
        info!(
            "Quoting {} {:?} -> {:?} at slippage {}",
            intent.in_amount, intent.in_asset, intent.out_asset, intent.slippage
        );

        let buying = intent.in_asset == NATIVE_ASSET;
        let (token, counter) = if buying {
            (intent.out_asset, intent.in_asset)
        } else {
            (intent.in_asset, intent.out_asset)
        };

        match self.bonding_curve.get_state(token).await {
            Ok(state) if state.quote == counter && !state.liquidity_added => {
                self.metrics.record_quote(VenueKind::BondingCurve);
                return if buying {
                    self.bonding_curve
                        .trade_params_buy(token, &state, intent.in_amount, intent.slippage)
                        .await
                } else {
                    self.bonding_curve
                        .trade_params_sell(token, &state, intent.in_amount, intent.slippage)
                        .await
                };
            }
            Ok(state) if state.liquidity_added => {
                info!("Liquidity for {:?} has migrated, routing through AMM pools", token);
            }
            Ok(state) => {
                debug!("Curve for {:?} trades against {:?}, routing through AMM pools", token, state.quote);
            }
            Err(QuoterError::NotListed(_)) => {
                debug!("{:?} is not on the bonding curve", token);
            }
            Err(e) => return Err(e),
        }

        let wrapped = self.router.native_wrapped_address().await?;
        let amm_asset = |asset: Address| if asset == NATIVE_ASSET { wrapped } else { asset };
        self.router
            .trade_params(
                amm_asset(intent.out_asset),
                amm_asset(intent.in_asset),
                intent.in_amount,
                intent.slippage,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CacheOutcome;
    use crate::models::TradeBound;
    use crate::test_support::MockChain;
    use ethers::abi::Token;
    use ethers::types::{Address, U256};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const ROUTER: Address = ethers::types::H160([0x13; 20]);
    const V2_FACTORY: Address = ethers::types::H160([0xfa; 20]);
    const V3_FACTORY: Address = ethers::types::H160([0xfb; 20]);
    const MANAGER: Address = ethers::types::H160([0x5c; 20]);
    const HELPER: Address = ethers::types::H160([0xf2; 20]);
    const WRAPPED: Address = ethers::types::H160([0xbb; 20]);

    fn config() -> Config {
        let mut config = Config::bsc("http://localhost:8545").unwrap();
        config.contracts.router = ROUTER;
        config.contracts.constant_product_factory = V2_FACTORY;
        config.contracts.concentrated_factory = V3_FACTORY;
        config.contracts.bonding_curve_manager = MANAGER;
        config.contracts.bonding_curve_helper = HELPER;
        config
    }

    fn script_listing(chain: &MockChain, token: Address, version: u64, liquidity_added: bool) {
        chain.respond(
            HELPER,
            "getTokenInfo(address)",
            &[Token::Address(token)],
            &[
                Token::Uint(U256::from(version)),
                Token::Address(MANAGER),
                Token::Address(NATIVE_ASSET),
                Token::Uint(U256::exp10(10)),
                Token::Uint(U256::from(100u64)),
                Token::Uint(U256::zero()),
                Token::Uint(U256::from(1_700_000_000u64)),
                Token::Uint(U256::zero()),
                Token::Uint(U256::zero()),
                Token::Uint(U256::zero()),
                Token::Uint(U256::zero()),
                Token::Bool(liquidity_added),
            ],
        );
    }

    fn script_pair(chain: &MockChain, base: Address, quote: Address, reserve_base: u64, reserve_quote: u64) {
        let pair = Address::repeat_byte(0x99);
        chain.respond(
            V2_FACTORY,
            "getPair(address,address)",
            &[Token::Address(base), Token::Address(quote)],
            &[Token::Address(pair)],
        );
        let (reserve0, reserve1) = if base < quote {
            (reserve_base, reserve_quote)
        } else {
            (reserve_quote, reserve_base)
        };
        chain.respond(
            pair,
            "getReserves()",
            &[],
            &[Token::Uint(U256::from(reserve0)), Token::Uint(U256::from(reserve1)), Token::Uint(U256::zero())],
        );
    }

    fn intent(in_asset: Address, out_asset: Address, in_amount: U256, slippage: Decimal) -> TradeIntent {
        TradeIntent {
            in_asset,
            out_asset,
            in_amount,
            slippage,
        }
    }

    #[tokio::test]
    async fn listed_token_is_bought_on_the_curve() {
        let chain = Arc::new(MockChain::new());
        let token = Address::repeat_byte(0x44);
        script_listing(&chain, token, 2, false);
        chain.respond(token, "decimals()", &[], &[Token::Uint(U256::from(18u8))]);
        let service = QuoteService::from_reader(chain.clone(), &config()).unwrap();

        let params = service
            .trade_params(&intent(NATIVE_ASSET, token, U256::exp10(18), dec!(0.05)))
            .await
            .unwrap();
        assert_eq!(params.venue, VenueKind::BondingCurve);
        assert_eq!(params.pool, MANAGER);
        assert_eq!(params.bound, TradeBound::MinOut(U256::from(9405u64) * U256::exp10(22)));
        assert_eq!(chain.call_count(ROUTER, "WETH9()", &[]), 0);
        assert!(service.metrics().render().unwrap().contains("bonding_curve"));
    }

    #[tokio::test]
    async fn migrated_token_routes_through_wrapped_native() {
        let chain = Arc::new(MockChain::new());
        let token = Address::repeat_byte(0x44);
        script_listing(&chain, token, 2, true);
        chain.respond(ROUTER, "WETH9()", &[], &[Token::Address(WRAPPED)]);
        script_pair(&chain, token, WRAPPED, 1000, 2000);
        let service = QuoteService::from_reader(chain.clone(), &config()).unwrap();

        let params = service
            .trade_params(&intent(NATIVE_ASSET, token, U256::from(100u64), dec!(0.01)))
            .await
            .unwrap();
        assert_eq!(params.venue, VenueKind::ConstantProduct);
        assert_eq!(params.amount_in, U256::from(100u64));
        assert_eq!(params.min_out(), Some(U256::from(49u64)));
    }

    #[tokio::test]
    async fn unlisted_token_is_sold_through_the_router() {
        let chain = Arc::new(MockChain::new());
        let token = Address::repeat_byte(0xee);
        script_listing(&chain, token, 0, false);
        chain.respond(ROUTER, "WETH9()", &[], &[Token::Address(WRAPPED)]);
        // 500 wrapped against 1000 tokens: one wrapped unit costs 2 tokens
        script_pair(&chain, WRAPPED, token, 500, 1000);
        let service = QuoteService::from_reader(chain.clone(), &config()).unwrap();

        let params = service
            .trade_params(&intent(token, NATIVE_ASSET, U256::from(100u64), dec!(0.01)))
            .await
            .unwrap();
        assert_eq!(params.venue, VenueKind::ConstantProduct);
        assert_eq!(params.min_out(), Some(U256::from(49u64)));

        service
            .trade_params(&intent(token, NATIVE_ASSET, U256::from(100u64), dec!(0.01)))
            .await
            .unwrap();
        assert_eq!(chain.call_count(ROUTER, "WETH9()", &[]), 1);
        assert_eq!(
            service.metrics().cache_count("native_wrapped_address", CacheOutcome::Hit),
            1
        );
    }

    #[tokio::test]
    async fn rejects_bad_slippage_without_reading() {
        let chain = Arc::new(MockChain::new());
        let service = QuoteService::from_reader(chain.clone(), &config()).unwrap();
        let result = service
            .trade_params(&intent(NATIVE_ASSET, Address::repeat_byte(0x44), U256::one(), dec!(1)))
            .await;
        assert!(matches!(result, Err(QuoterError::InvalidSlippage(_))));
        assert_eq!(chain.count("eth_call"), 0);
    }

    #[tokio::test]
    async fn verifies_router_factories() {
        let chain = Arc::new(MockChain::new());
        chain.respond(ROUTER, "factoryV2()", &[], &[Token::Address(V2_FACTORY)]);
        chain.respond(ROUTER, "factory()", &[], &[Token::Address(V3_FACTORY)]);
        let service = QuoteService::from_reader(chain.clone(), &config()).unwrap();
        tokio_test::assert_ok!(service.verify_deployment().await);

        let mut wrong = config();
        wrong.contracts.concentrated_factory = Address::repeat_byte(0x01);
        let service = QuoteService::from_reader(chain.clone(), &wrong).unwrap();
        assert!(matches!(service.verify_deployment().await, Err(QuoterError::ConfigError(_))));

        wrong.chain.chain_id = 1;
        let service = QuoteService::from_reader(chain, &wrong).unwrap();
        assert!(matches!(service.verify_deployment().await, Err(QuoterError::ConfigError(_))));
    }
}
