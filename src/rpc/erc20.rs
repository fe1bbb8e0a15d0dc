/*
 * ERC-20 token reads
 */

use ethers::abi::{ParamType, Token};
use ethers::types::{Address, U256};
use std::sync::Arc;

use super::contract::{token_string, token_uint, ContractReader};
use super::ChainReader;
use crate::cache::{CachePolicy, MemoCache};
use crate::models::{QuoterError, Result};

/// Uncached `decimals()` read, for callers that memoize it themselves.
pub(crate) async fn read_decimals(contract: &ContractReader) -> Result<u8> {
    let raw = token_uint(contract.read_one("decimals()", &[], ParamType::Uint(8)).await?)?;
    if raw > U256::from(u8::MAX) {
        return Err(QuoterError::ContractError(format!("Invalid decimals: {raw}")));
    }
    u8::try_from(raw.low_u32()).map_err(|e| QuoterError::ContractError(format!("Invalid decimals {raw}: {e}")))
}

/// Token metadata is immutable and cached for the lifetime of the reader;
/// balances and allowances are always read fresh.
pub struct Erc20 {
    contract: ContractReader,
    cache: MemoCache,
}

impl Erc20 {
    pub fn new(chain: Arc<dyn ChainReader>, token: Address, cache: &MemoCache) -> Self {
        Self {
            contract: ContractReader::new(chain, token),
            cache: cache.scoped(),
        }
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.contract.address()
    }

    pub async fn name(&self) -> Result<String> {
        let contract = self.contract.clone();
        self.cache
            .get_or_fetch("name", &self.address(), CachePolicy::Forever, || async move {
                token_string(contract.read_one("name()", &[], ParamType::String).await?)
            })
            .await
    }

    pub async fn symbol(&self) -> Result<String> {
        let contract = self.contract.clone();
        self.cache
            .get_or_fetch("symbol", &self.address(), CachePolicy::Forever, || async move {
                token_string(contract.read_one("symbol()", &[], ParamType::String).await?)
            })
            .await
    }

    pub async fn decimals(&self) -> Result<u8> {
        let contract = self.contract.clone();
        self.cache
            .get_or_fetch("decimals", &self.address(), CachePolicy::Forever, || async move {
                read_decimals(&contract).await
            })
            .await
    }

    pub async fn total_supply(&self) -> Result<U256> {
        let contract = self.contract.clone();
        self.cache
            .get_or_fetch("total_supply", &self.address(), CachePolicy::Forever, || async move {
                token_uint(contract.read_one("totalSupply()", &[], ParamType::Uint(256)).await?)
            })
            .await
    }

    pub async fn balance_of(&self, owner: Address) -> Result<U256> {
        token_uint(
            self.contract
                .read_one("balanceOf(address)", &[Token::Address(owner)], ParamType::Uint(256))
                .await?,
        )
    }

    pub async fn allowance(&self, owner: Address, spender: Address) -> Result<U256> {
        token_uint(
            self.contract
                .read_one(
                    "allowance(address,address)",
                    &[Token::Address(owner), Token::Address(spender)],
                    ParamType::Uint(256),
                )
                .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockChain;

    #[tokio::test]
    async fn metadata_is_read_once() {
        let chain = Arc::new(MockChain::new());
        let token = Address::repeat_byte(0x42);
        chain.respond(token, "decimals()", &[], &[Token::Uint(U256::from(18u8))]);
        chain.respond(token, "symbol()", &[], &[Token::String("MEME".to_string())]);

        let erc20 = Erc20::new(chain.clone(), token, &MemoCache::new());
        for _ in 0..3 {
            assert_eq!(erc20.decimals().await.unwrap(), 18);
            assert_eq!(erc20.symbol().await.unwrap(), "MEME");
        }
        assert_eq!(chain.call_count(token, "decimals()", &[]), 1);
        assert_eq!(chain.call_count(token, "symbol()", &[]), 1);
    }

    #[tokio::test]
    async fn balances_are_not_cached() {
        let chain = Arc::new(MockChain::new());
        let token = Address::repeat_byte(0x42);
        let owner = Address::repeat_byte(0x01);
        let args = [Token::Address(owner)];
        chain.respond(token, "balanceOf(address)", &args, &[Token::Uint(U256::from(7u8))]);

        let erc20 = Erc20::new(chain.clone(), token, &MemoCache::new());
        assert_eq!(erc20.balance_of(owner).await.unwrap(), U256::from(7u8));
        assert_eq!(erc20.balance_of(owner).await.unwrap(), U256::from(7u8));
        assert_eq!(chain.call_count(token, "balanceOf(address)", &args), 2);
    }
}
