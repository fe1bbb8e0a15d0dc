/*
 * Response contracts of the off-chain collaborators: the launch platform
 * API and the bundle relay
 */

use ethers::types::H256;
use serde::{Deserialize, Serialize};

use crate::models::{QuoterError, Result};

/// `{code?, data, msg}` wrapper every launch platform endpoint returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub data: Option<T>,
    #[serde(default)]
    pub msg: String,
}

impl<T> ApiEnvelope<T> {
    /// The payload, or the server's message when there is none.
    pub fn into_data(self, action: &str) -> Result<T> {
        self.data
            .ok_or_else(|| QuoterError::ApiError(format!("{action} failed: {}", self.msg)))
    }
}

pub type NonceResponse = ApiEnvelope<String>;
pub type AccessTokenResponse = ApiEnvelope<String>;
pub type ImageUploadResponse = ApiEnvelope<String>;
pub type CreateTokenResponse = ApiEnvelope<CreateTokenSignature>;

/// Message the wallet signs to log in with an issued nonce.
#[must_use]
pub fn login_message(nonce: &str) -> String {
    format!("You are sign in Meme {nonce}")
}

/// Signed creation arguments for the manager's `createToken`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenSignature {
    pub create_arg: String,
    pub signature: String,
}

impl CreateTokenSignature {
    /// CREATE2 salt: the third 32-byte word of the encoded arguments.
    pub fn salt(&self) -> Result<H256> {
        let hex = self.create_arg.strip_prefix("0x").unwrap_or(&self.create_arg);
        let word = hex
            .get(128..192)
            .ok_or_else(|| QuoterError::ApiError("Create argument too short to carry a salt".to_string()))?;
        word.parse::<H256>()
            .map_err(|e| QuoterError::ApiError(format!("Invalid salt in create argument: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleReceipt {
    pub bundle_hash: H256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayError {
    pub code: i64,
    pub message: String,
}

/// JSON-RPC reply from the bundle relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResponse<T> {
    pub result: Option<T>,
    pub error: Option<RelayError>,
}

impl<T> RelayResponse<T> {
    pub fn into_result(self, method: &str) -> Result<T> {
        if let Some(error) = self.error {
            return Err(QuoterError::ApiError(format!("[{method}] {} {}", error.code, error.message)));
        }
        self.result
            .ok_or_else(|| QuoterError::ApiError(format!("[{method}] empty response")))
    }
}
