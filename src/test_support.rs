/*
 * Scripted in-memory chain for unit tests
 */

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{Address, Block, Bytes, H256, U256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::models::{QuoterError, Result};
use crate::rpc::contract::encode_call;
use crate::rpc::ChainReader;

struct Scripted {
    result: Result<Bytes>,
    delay: Duration,
}

/// Answers `eth_call` by exact (contract, calldata) match; anything unscripted
/// reverts.
pub struct MockChain {
    calls: Mutex<HashMap<(Address, Vec<u8>), Scripted>>,
    call_counts: Mutex<HashMap<(Address, Vec<u8>), usize>>,
    method_counts: Mutex<HashMap<&'static str, usize>>,
    gas_price: Mutex<U256>,
    chain_id: u64,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            call_counts: Mutex::new(HashMap::new()),
            method_counts: Mutex::new(HashMap::new()),
            gas_price: Mutex::new(U256::from(1_000_000_000u64)),
            chain_id: 56,
        }
    }

    pub fn respond(&self, to: Address, signature: &str, args: &[Token], outputs: &[Token]) {
        self.respond_after(to, signature, args, outputs, Duration::ZERO);
    }

    pub fn respond_after(&self, to: Address, signature: &str, args: &[Token], outputs: &[Token], delay: Duration) {
        let key = (to, encode_call(signature, args).to_vec());
        let result = Ok(Bytes::from(encode(outputs)));
        self.calls.lock().unwrap().insert(key, Scripted { result, delay });
    }

    pub fn fail(&self, to: Address, signature: &str, args: &[Token], error: QuoterError) {
        let key = (to, encode_call(signature, args).to_vec());
        self.calls.lock().unwrap().insert(
            key,
            Scripted {
                result: Err(error),
                delay: Duration::ZERO,
            },
        );
    }

    pub fn set_gas_price(&self, price: U256) {
        *self.gas_price.lock().unwrap() = price;
    }

    pub fn call_count(&self, to: Address, signature: &str, args: &[Token]) -> usize {
        let key = (to, encode_call(signature, args).to_vec());
        self.call_counts.lock().unwrap().get(&key).copied().unwrap_or(0)
    }

    pub fn count(&self, method: &str) -> usize {
        self.method_counts.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    fn bump(&self, method: &'static str) {
        *self.method_counts.lock().unwrap().entry(method).or_insert(0) += 1;
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        self.bump("eth_call");
        let key = (to, data.to_vec());
        *self.call_counts.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

        let scripted = {
            let calls = self.calls.lock().unwrap();
            calls.get(&key).map(|s| (s.result.clone(), s.delay))
        };
        match scripted {
            Some((result, delay)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            None => Err(QuoterError::ContractError(format!("execution reverted at {to:?}"))),
        }
    }

    async fn get_balance(&self, _address: Address) -> Result<U256> {
        self.bump("eth_getBalance");
        Ok(U256::zero())
    }

    async fn get_block_number(&self) -> Result<u64> {
        self.bump("eth_blockNumber");
        Ok(1)
    }

    async fn get_latest_block(&self) -> Result<Block<H256>> {
        self.bump("eth_getBlockByNumber");
        Ok(Block::default())
    }

    async fn get_gas_price(&self) -> Result<U256> {
        self.bump("eth_gasPrice");
        Ok(*self.gas_price.lock().unwrap())
    }

    async fn get_nonce(&self, _address: Address) -> Result<U256> {
        self.bump("eth_getTransactionCount");
        Ok(U256::zero())
    }

    async fn get_chain_id(&self) -> Result<u64> {
        self.bump("eth_chainId");
        Ok(self.chain_id)
    }
}
