/*
 * Token-creation events from the bonding-curve manager, streamed over a
 * websocket log subscription
 */

use async_trait::async_trait;
use ethers::abi::{decode, ParamType};
use ethers::providers::{Middleware, Provider, Ws};
use ethers::types::{Address, Filter, Log, H256, U256};
use ethers::utils::keccak256;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{EventSink, EventSource, Teardown};
use crate::models::{QuoterError, Result};
use crate::rpc::contract::{token_address, token_string, token_uint, u256_to_u64};

pub const TOKEN_CREATE_EVENT: &str = "TokenCreate(address,address,uint256,string,string,uint256,uint256,uint256)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCreated {
    pub creator: Address,
    pub token: Address,
    pub request_id: U256,
    pub name: String,
    pub symbol: String,
    pub total_supply: U256,
    pub launch_time: u64,
    pub launch_fee: U256,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<H256>,
}

impl TokenCreated {
    #[must_use]
    pub fn topic() -> H256 {
        H256::from(keccak256(TOKEN_CREATE_EVENT.as_bytes()))
    }

    pub fn from_log(log: &Log) -> Result<Self> {
        if log.topics.first() != Some(&Self::topic()) {
            return Err(QuoterError::ContractError(format!(
                "Log {:?} is not a token creation",
                log.transaction_hash
            )));
        }

        let fields = decode(
            &[
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::String,
                ParamType::String,
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(256),
            ],
            &log.data,
        )
        .map_err(|e| QuoterError::ContractError(format!("Failed to decode token creation: {e}")))?;

        let mut fields = fields.into_iter();
        let mut next = || {
            fields
                .next()
                .ok_or_else(|| QuoterError::ContractError("Token creation log is truncated".to_string()))
        };

        Ok(Self {
            creator: token_address(next()?)?,
            token: token_address(next()?)?,
            request_id: token_uint(next()?)?,
            name: token_string(next()?)?,
            symbol: token_string(next()?)?,
            total_supply: token_uint(next()?)?,
            launch_time: u256_to_u64(token_uint(next()?)?, "launchTime")?,
            launch_fee: token_uint(next()?)?,
            block_number: log.block_number.map(|n| n.as_u64()),
            transaction_hash: log.transaction_hash,
        })
    }
}

/// Token creations from one manager contract. Each `open` runs its own
/// subscription task; the teardown aborts it, which drops the stream and
/// unsubscribes on the node.
pub struct LogStreamSource {
    provider: Arc<Provider<Ws>>,
    manager: Address,
}

impl LogStreamSource {
    pub fn new(provider: Arc<Provider<Ws>>, manager: Address) -> Self {
        Self { provider, manager }
    }

    pub async fn connect(ws_url: &str, manager: Address) -> Result<Self> {
        info!("Connecting to websocket endpoint {}", ws_url);
        let provider = Provider::<Ws>::connect(ws_url)
            .await
            .map_err(|e| QuoterError::SubscriptionError(format!("Failed to connect to {ws_url}: {e}")))?;
        Ok(Self::new(Arc::new(provider), manager))
    }

    #[must_use]
    pub fn filter(&self) -> Filter {
        Filter::new().address(self.manager).event(TOKEN_CREATE_EVENT)
    }
}

#[async_trait]
impl EventSource<TokenCreated> for LogStreamSource {
    async fn open(&self, sink: EventSink<TokenCreated>) -> Result<Teardown> {
        let provider = self.provider.clone();
        let filter = self.filter();
        let manager = self.manager;
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let task = tokio::spawn(async move {
            let mut stream = match provider.subscribe_logs(&filter).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(QuoterError::SubscriptionError(format!(
                        "Failed to subscribe to token creations: {e}"
                    ))));
                    return;
                }
            };
            if ready_tx.send(Ok(())).is_err() {
                debug!("Token creation subscriber went away before the stream started");
                return;
            }
            info!("Watching token creations from {:?}", manager);

            while let Some(log) = stream.next().await {
                let attached = match TokenCreated::from_log(&log) {
                    Ok(event) => {
                        debug!("Token created: {} ({:?})", event.symbol, event.token);
                        sink.emit(&event)
                    }
                    Err(e) => sink.fail(&e),
                };
                if !attached {
                    return;
                }
            }

            warn!("Token creation stream from {:?} ended", manager);
            sink.fail(&QuoterError::SubscriptionError("Log stream ended".to_string()));
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(move || task.abort())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(QuoterError::SubscriptionError(
                "Log stream task exited before subscribing".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Multiplexer;
    use ethers::abi::{encode, Token};
    use ethers::types::{Bytes, U64};
    use std::sync::Mutex;

    fn creation_log(symbol: &str) -> Log {
        let data = encode(&[
            Token::Address(Address::repeat_byte(0xc0)),
            Token::Address(Address::repeat_byte(0x44)),
            Token::Uint(U256::from(7u64)),
            Token::String(format!("{symbol} token")),
            Token::String(symbol.to_string()),
            Token::Uint(U256::exp10(27)),
            Token::Uint(U256::from(1_700_000_000u64)),
            Token::Uint(U256::exp10(16)),
        ]);
        Log {
            address: Address::repeat_byte(0x5c),
            topics: vec![TokenCreated::topic()],
            data: Bytes::from(data),
            block_number: Some(U64::from(42u64)),
            transaction_hash: Some(H256::repeat_byte(0x01)),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_creation_log() {
        let event = TokenCreated::from_log(&creation_log("PEPE")).unwrap();
        assert_eq!(event.creator, Address::repeat_byte(0xc0));
        assert_eq!(event.token, Address::repeat_byte(0x44));
        assert_eq!(event.request_id, U256::from(7u64));
        assert_eq!(event.name, "PEPE token");
        assert_eq!(event.symbol, "PEPE");
        assert_eq!(event.total_supply, U256::exp10(27));
        assert_eq!(event.launch_time, 1_700_000_000);
        assert_eq!(event.launch_fee, U256::exp10(16));
        assert_eq!(event.block_number, Some(42));
    }

    #[test]
    fn rejects_other_events() {
        let mut log = creation_log("PEPE");
        log.topics = vec![H256::repeat_byte(0xaa)];
        assert!(matches!(TokenCreated::from_log(&log), Err(QuoterError::ContractError(_))));

        let mut log = creation_log("PEPE");
        log.data = Bytes::from(vec![0u8; 31]);
        assert!(matches!(TokenCreated::from_log(&log), Err(QuoterError::ContractError(_))));
    }

    struct ReplaySource {
        logs: Vec<Log>,
    }

    #[async_trait]
    impl EventSource<TokenCreated> for ReplaySource {
        async fn open(&self, sink: EventSink<TokenCreated>) -> Result<Teardown> {
            let logs = self.logs.clone();
            tokio::spawn(async move {
                for log in logs {
                    match TokenCreated::from_log(&log) {
                        Ok(event) => sink.emit(&event),
                        Err(e) => sink.fail(&e),
                    };
                }
            });
            Ok(Box::new(|| {}))
        }
    }

    #[tokio::test]
    async fn creations_fan_out_through_the_multiplexer() {
        let mut bogus = creation_log("BAD");
        bogus.topics.clear();
        let source = Arc::new(ReplaySource {
            logs: vec![creation_log("ONE"), bogus, creation_log("TWO")],
        });
        let mux: Multiplexer<TokenCreated> = Multiplexer::new("token_created", source);

        let symbols = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(0usize));
        let (s, e) = (symbols.clone(), errors.clone());
        let _sub = mux
            .subscribe(
                move |event: &TokenCreated| s.lock().unwrap().push(event.symbol.clone()),
                move |_: &QuoterError| *e.lock().unwrap() += 1,
            )
            .await
            .unwrap();

        for _ in 0..50 {
            if symbols.lock().unwrap().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(*symbols.lock().unwrap(), vec!["ONE".to_string(), "TWO".to_string()]);
        assert_eq!(*errors.lock().unwrap(), 1);
    }
}
