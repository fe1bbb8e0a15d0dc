/*
 * Chain access: the read capability the venues build on, its ethers-backed
 * implementation, and the cached facade for idempotent reads
 */

pub mod contract;
pub mod erc20;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, PendingTransaction, Provider};
use ethers::types::{Address, Block, BlockNumber, Bytes, TransactionReceipt, TransactionRequest, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{CachePolicy, MemoCache};
use crate::models::{QuoterError, Result};

pub use contract::ContractReader;
pub use erc20::Erc20;

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;
    async fn get_balance(&self, address: Address) -> Result<U256>;
    async fn get_block_number(&self) -> Result<u64>;
    async fn get_latest_block(&self) -> Result<Block<H256>>;
    async fn get_gas_price(&self) -> Result<U256>;
    async fn get_nonce(&self, address: Address) -> Result<U256>;
    async fn get_chain_id(&self) -> Result<u64>;
}

pub struct RpcClient {
    provider: Arc<Provider<Http>>,
    chain_id: u64,
}

impl RpcClient {
    pub async fn new(rpc_url: &str, chain_id: u64) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| QuoterError::RpcError(format!("Failed to create provider: {e}")))?;

        let chain = provider
            .get_chainid()
            .await
            .map_err(|e| QuoterError::RpcError(format!("Failed to get chain ID: {e}")))?;

        if chain.as_u64() != chain_id {
            return Err(QuoterError::RpcError(format!(
                "Chain ID mismatch: expected {}, got {}",
                chain_id,
                chain.as_u64()
            )));
        }

        info!("Connected to chain {} via {}", chain_id, rpc_url);

        Ok(Self {
            provider: Arc::new(provider),
            chain_id,
        })
    }

    #[must_use]
    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub async fn send_raw_transaction(&self, signed: Bytes) -> Result<H256> {
        let pending = self
            .provider
            .send_raw_transaction(signed)
            .await
            .map_err(|e| QuoterError::RpcError(format!("Failed to submit transaction: {e}")))?;
        Ok(pending.tx_hash())
    }

    pub async fn wait_for_confirmation(&self, hash: H256, confirmations: usize) -> Result<TransactionReceipt> {
        let receipt = PendingTransaction::new(hash, self.provider.as_ref())
            .interval(Duration::from_secs(1))
            .confirmations(confirmations)
            .await
            .map_err(|e| QuoterError::RpcError(format!("Failed waiting for {hash:?}: {e}")))?
            .ok_or_else(|| QuoterError::RpcError(format!("Transaction {hash:?} was dropped")))?;

        if receipt.status.map_or(false, |status| status.is_zero()) {
            warn!("Transaction {:?} reverted in block {:?}", hash, receipt.block_number);
            return Err(QuoterError::TransactionReverted(hash));
        }
        Ok(receipt)
    }
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx = TransactionRequest::new().to(to).data(data);
        self.provider
            .call(&tx.into(), None)
            .await
            .map_err(|e| QuoterError::RpcError(format!("eth_call to {to:?} failed: {e}")))
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.provider
            .get_balance(address, None)
            .await
            .map_err(|e| QuoterError::RpcError(format!("Failed to get balance: {e}")))
    }

    async fn get_block_number(&self) -> Result<u64> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| QuoterError::RpcError(format!("Failed to get block number: {e}")))?;
        Ok(number.as_u64())
    }

    async fn get_latest_block(&self) -> Result<Block<H256>> {
        self.provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| QuoterError::RpcError(format!("Failed to get latest block: {e}")))?
            .ok_or_else(|| QuoterError::RpcError("Latest block not found".to_string()))
    }

    async fn get_gas_price(&self) -> Result<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| QuoterError::RpcError(format!("Failed to get gas price: {e}")))
    }

    async fn get_nonce(&self, address: Address) -> Result<U256> {
        self.provider
            .get_transaction_count(address, None)
            .await
            .map_err(|e| QuoterError::RpcError(format!("Failed to get nonce: {e}")))
    }

    async fn get_chain_id(&self) -> Result<u64> {
        let chain = self
            .provider
            .get_chainid()
            .await
            .map_err(|e| QuoterError::RpcError(format!("Failed to get chain ID: {e}")))?;
        Ok(chain.as_u64())
    }
}

/// Chain reads with memoization where the value allows it: the chain id
/// never changes, the gas price is reused for a short window.
pub struct ChainClient {
    reader: Arc<dyn ChainReader>,
    cache: MemoCache,
    gas_price_ttl: Duration,
}

impl ChainClient {
    pub fn new(reader: Arc<dyn ChainReader>, cache: &MemoCache, gas_price_ttl: Duration) -> Self {
        Self {
            reader,
            cache: cache.scoped(),
            gas_price_ttl,
        }
    }

    #[must_use]
    pub fn reader(&self) -> Arc<dyn ChainReader> {
        self.reader.clone()
    }

    #[must_use]
    pub fn contract(&self, address: Address) -> ContractReader {
        ContractReader::new(self.reader.clone(), address)
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let reader = self.reader.clone();
        self.cache
            .get_or_fetch("chain_id", &(), CachePolicy::Forever, || async move {
                reader.get_chain_id().await
            })
            .await
    }

    pub async fn gas_price(&self) -> Result<U256> {
        let reader = self.reader.clone();
        self.cache
            .get_or_fetch("gas_price", &(), CachePolicy::Ttl(self.gas_price_ttl), || async move {
                reader.get_gas_price().await
            })
            .await
    }

    pub async fn balance(&self, address: Address) -> Result<U256> {
        self.reader.get_balance(address).await
    }

    pub async fn block_number(&self) -> Result<u64> {
        self.reader.get_block_number().await
    }

    pub async fn latest_block(&self) -> Result<Block<H256>> {
        self.reader.get_latest_block().await
    }

    pub async fn nonce(&self, address: Address) -> Result<U256> {
        self.reader.get_nonce(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockChain;
    use mockito::Matcher;

    fn rpc_result(result: &str) -> String {
        format!(r#"{{"jsonrpc":"2.0","id":1,"result":{result}}}"#)
    }

    async fn mock_method(server: &mut mockito::ServerGuard, method: &str, result: &str) -> mockito::Mock {
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(format!(r#"{{"method":"{method}"}}"#)))
            .with_header("content-type", "application/json")
            .with_body(rpc_result(result))
            .create_async()
            .await
    }

    #[tokio::test]
    async fn rpc_client_verifies_chain_id() {
        let mut server = mockito::Server::new_async().await;
        let _chain = mock_method(&mut server, "eth_chainId", r#""0x38""#).await;

        let client = RpcClient::new(&server.url(), 56).await.unwrap();
        assert_eq!(client.chain_id(), 56);

        let mismatch = RpcClient::new(&server.url(), 1).await;
        assert!(matches!(mismatch, Err(QuoterError::RpcError(_))));
    }

    #[tokio::test]
    async fn rpc_client_reads_gas_price_and_submits() {
        let mut server = mockito::Server::new_async().await;
        let _chain = mock_method(&mut server, "eth_chainId", r#""0x38""#).await;
        let _gas = mock_method(&mut server, "eth_gasPrice", r#""0x3b9aca00""#).await;
        let hash = format!("0x{}", "ab".repeat(32));
        let _send = mock_method(&mut server, "eth_sendRawTransaction", &format!(r#""{hash}""#)).await;

        let client = RpcClient::new(&server.url(), 56).await.unwrap();
        assert_eq!(client.get_gas_price().await.unwrap(), U256::from(1_000_000_000u64));

        let submitted = client.send_raw_transaction(Bytes::from(vec![0x02, 0x01])).await.unwrap();
        assert_eq!(submitted, H256::repeat_byte(0xab));
    }

    #[tokio::test(start_paused = true)]
    async fn chain_client_memoizes_chain_id_and_gas_price() {
        let chain = Arc::new(MockChain::new());
        chain.set_gas_price(U256::from(5u64));
        let client = ChainClient::new(chain.clone(), &MemoCache::new(), Duration::from_secs(10));

        assert_eq!(client.chain_id().await.unwrap(), 56);
        assert_eq!(client.chain_id().await.unwrap(), 56);
        assert_eq!(chain.count("eth_chainId"), 1);

        assert_eq!(client.gas_price().await.unwrap(), U256::from(5u64));
        chain.set_gas_price(U256::from(6u64));
        assert_eq!(client.gas_price().await.unwrap(), U256::from(5u64));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(client.gas_price().await.unwrap(), U256::from(6u64));
        assert_eq!(chain.count("eth_gasPrice"), 2);

        client.nonce(Address::zero()).await.unwrap();
        client.nonce(Address::zero()).await.unwrap();
        assert_eq!(chain.count("eth_getTransactionCount"), 2);
    }
}
