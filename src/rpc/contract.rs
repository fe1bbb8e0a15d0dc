/*
 * ABI call encoding and decoding against a ChainReader
 */

use ethers::abi::{decode, encode, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::keccak256;
use std::sync::Arc;

use super::ChainReader;
use crate::models::{QuoterError, Result};

#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

#[must_use]
pub fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let mut call_data = selector(signature).to_vec();
    call_data.extend_from_slice(&encode(args));
    Bytes::from(call_data)
}

/// Read-only view of one deployed contract.
#[derive(Clone)]
pub struct ContractReader {
    chain: Arc<dyn ChainReader>,
    address: Address,
}

impl ContractReader {
    pub fn new(chain: Arc<dyn ChainReader>, address: Address) -> Self {
        Self { chain, address }
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn read(&self, signature: &str, args: &[Token], outputs: &[ParamType]) -> Result<Vec<Token>> {
        let result = self
            .chain
            .call(self.address, encode_call(signature, args))
            .await?;
        decode(outputs, &result).map_err(|e| {
            QuoterError::ContractError(format!(
                "Failed to decode {signature} from {:?}: {e}",
                self.address
            ))
        })
    }

    pub async fn read_one(&self, signature: &str, args: &[Token], output: ParamType) -> Result<Token> {
        self.read(signature, args, &[output])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| QuoterError::ContractError(format!("Empty response from {signature}")))
    }
}

pub fn token_address(token: Token) -> Result<Address> {
    token
        .into_address()
        .ok_or_else(|| QuoterError::ContractError("Expected address in response".to_string()))
}

pub fn token_uint(token: Token) -> Result<U256> {
    token
        .into_uint()
        .ok_or_else(|| QuoterError::ContractError("Expected uint in response".to_string()))
}

pub fn token_bool(token: Token) -> Result<bool> {
    token
        .into_bool()
        .ok_or_else(|| QuoterError::ContractError("Expected bool in response".to_string()))
}

pub fn token_string(token: Token) -> Result<String> {
    token
        .into_string()
        .ok_or_else(|| QuoterError::ContractError("Expected string in response".to_string()))
}

pub fn u256_to_u64(value: U256, field: &str) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(QuoterError::ContractError(format!("{field} does not fit in u64: {value}")));
    }
    Ok(value.as_u64())
}
