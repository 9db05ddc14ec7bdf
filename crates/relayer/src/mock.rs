//! A scriptable in-memory chain for the test suite.
//!
//! Implements [`ChainClient`] over mutable state: seeded transactions per
//! height, a chain-side account sequence, receipt acknowledgements, and
//! optional scripted failures for the broadcast and simulation paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use centralized_relay_types::{Coin, NetworkId, Receipt, ResponseCode, TxResponse};

use crate::chain::client::{
    AccountInfo, BroadcastResponse, ChainClient, ClientError, EventStream, SubscriptionEvent,
    TxSearchHit, TxSearchParam, TxSearchResponse,
};
use crate::chain::cosmos::events::{EventsList, RawAttribute, RawEvent, EVENT_TYPE_WASM_MESSAGE};

/// One seeded transaction: the search hit plus the contract addresses its
/// events were emitted by, used for filter matching.
#[derive(Clone, Debug)]
struct SeededTx {
    hit: TxSearchHit,
    addresses: Vec<String>,
}

/// Scripted outcome for the next broadcast call, consumed in order. When
/// the script queue is empty the mock enforces sequence discipline against
/// its chain-side account.
#[derive(Clone, Debug)]
pub enum BroadcastScript {
    Error(ClientError),
    Code(u32, String),
}

#[derive(Default)]
struct MockState {
    latest_height: u64,
    txs: Vec<SeededTx>,
    receipts: HashMap<String, TxResponse>,
    account: AccountInfo,
    acknowledged: HashSet<(NetworkId, u64)>,
    broadcast_scripts: VecDeque<BroadcastScript>,
    simulate_scripts: VecDeque<ClientError>,
    subscription_scripts: VecDeque<Vec<Result<SubscriptionEvent, ClientError>>>,
    broadcasts: Vec<crate::chain::client::TxDraft>,
    simulated_gas: u64,
    auto_include: bool,
    tx_counter: u64,
}

pub struct MockChain {
    state: Mutex<MockState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                simulated_gas: 100_000,
                auto_include: true,
                ..MockState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_latest_height(&self, height: u64) {
        self.lock().latest_height = height;
    }

    pub fn set_account(&self, account: AccountInfo) {
        self.lock().account = account;
    }

    pub fn set_simulated_gas(&self, gas: u64) {
        self.lock().simulated_gas = gas;
    }

    /// Whether successful broadcasts are immediately given an OK receipt.
    pub fn set_auto_include(&self, auto_include: bool) {
        self.lock().auto_include = auto_include;
    }

    /// Seed a `wasm-Message` transaction at `height` with the given
    /// attributes, emitted by `contract`.
    pub fn push_wasm_tx(&self, height: u64, contract: &str, attrs: &[(&str, &str)]) {
        let mut attributes = vec![RawAttribute {
            key: "_contract_address".to_string(),
            value: contract.to_string(),
        }];

        attributes.extend(attrs.iter().map(|(k, v)| RawAttribute {
            key: k.to_string(),
            value: v.to_string(),
        }));

        let log = serde_json::to_string(&vec![EventsList {
            events: vec![RawEvent {
                kind: EVENT_TYPE_WASM_MESSAGE.to_string(),
                attributes,
            }],
        }])
        .unwrap();

        let mut state = self.lock();
        let tx_hash = format!("seeded-{}", state.txs.len());

        state.txs.push(SeededTx {
            hit: TxSearchHit {
                height,
                tx_hash,
                log,
            },
            addresses: vec![contract.to_string()],
        });
    }

    /// Mark `(src, sn)` as acknowledged by the connection contract.
    pub fn acknowledge(&self, src: &NetworkId, sn: u64) {
        self.lock().acknowledged.insert((src.clone(), sn));
    }

    pub fn script_broadcast(&self, script: BroadcastScript) {
        self.lock().broadcast_scripts.push_back(script);
    }

    pub fn script_simulate_error(&self, error: ClientError) {
        self.lock().simulate_scripts.push_back(error);
    }

    pub fn script_subscription(&self, events: Vec<Result<SubscriptionEvent, ClientError>>) {
        self.lock().subscription_scripts.push_back(events);
    }

    /// All broadcast drafts in submission order.
    pub fn broadcasts(&self) -> Vec<crate::chain::client::TxDraft> {
        self.lock().broadcasts.clone()
    }

    pub fn receipt(&self, tx_hash: &str) -> Option<Receipt> {
        self.lock().receipts.get(tx_hash).map(|r| Receipt {
            tx_hash: r.tx_hash.clone(),
            height: r.height as u64,
            status: r.is_success(),
        })
    }

    pub fn set_receipt(&self, response: TxResponse) {
        self.lock().receipts.insert(response.tx_hash.clone(), response);
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn latest_height(&self) -> Result<u64, ClientError> {
        Ok(self.lock().latest_height)
    }

    async fn tx_search(&self, param: TxSearchParam) -> Result<TxSearchResponse, ClientError> {
        let state = self.lock();

        let matches: Vec<TxSearchHit> = state
            .txs
            .iter()
            .filter(|tx| {
                tx.hit.height >= param.from_height
                    && tx.hit.height <= param.to_height
                    && tx.addresses.contains(&param.filter.attr_value)
            })
            .map(|tx| tx.hit.clone())
            .collect();

        let total_count = matches.len() as u32;

        let start = ((param.page - 1) * param.per_page) as usize;
        let txs = matches
            .into_iter()
            .skip(start)
            .take(param.per_page as usize)
            .collect();

        Ok(TxSearchResponse { txs, total_count })
    }

    async fn subscribe(&self, _query: String) -> Result<EventStream, ClientError> {
        let script = self.lock().subscription_scripts.pop_front();

        match script {
            Some(events) => Ok(Box::pin(stream::iter(events))),
            None => Err(ClientError::connection_closed(
                "no scripted subscription".to_string(),
            )),
        }
    }

    async fn query_contract(
        &self,
        _contract: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, ClientError> {
        let query: serde_json::Value = serde_json::from_slice(&payload)
            .map_err(|e| ClientError::decode(e.to_string()))?;

        let Some(receipt) = query.get("get_receipt") else {
            return Err(ClientError::rpc("unknown query".to_string()));
        };

        let src = receipt
            .get("src_network")
            .and_then(|v| v.as_str())
            .map(NetworkId::from)
            .ok_or_else(|| ClientError::decode("missing src_network".to_string()))?;

        let sn: u64 = receipt
            .get("conn_sn")
            .and_then(|v| v.as_str())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ClientError::decode("missing conn_sn".to_string()))?;

        let acknowledged = self.lock().acknowledged.contains(&(src, sn));

        Ok(serde_json::to_vec(&acknowledged).expect("bool serializes"))
    }

    async fn simulate(
        &self,
        _draft: &crate::chain::client::TxDraft,
    ) -> Result<u64, ClientError> {
        let mut state = self.lock();

        if let Some(error) = state.simulate_scripts.pop_front() {
            return Err(error);
        }

        Ok(state.simulated_gas)
    }

    async fn broadcast_tx(
        &self,
        draft: &crate::chain::client::TxDraft,
    ) -> Result<BroadcastResponse, ClientError> {
        let mut state = self.lock();

        if let Some(script) = state.broadcast_scripts.pop_front() {
            return match script {
                BroadcastScript::Error(e) => Err(e),
                BroadcastScript::Code(code, raw_log) => Ok(BroadcastResponse {
                    tx_hash: format!("rejected-{code}"),
                    code,
                    raw_log,
                }),
            };
        }

        if draft.sequence != state.account.sequence {
            return Err(ClientError::sequence_mismatch(format!(
                "expected {}, got {}",
                state.account.sequence, draft.sequence
            )));
        }

        state.account.sequence += 1;
        state.tx_counter += 1;
        state.broadcasts.push(draft.clone());

        let tx_hash = format!("tx-{}", state.tx_counter);

        if state.auto_include {
            let height = state.latest_height as i64;
            state.receipts.insert(
                tx_hash.clone(),
                TxResponse {
                    height,
                    tx_hash: tx_hash.clone(),
                    codespace: String::new(),
                    code: ResponseCode::Ok,
                    data: String::new(),
                },
            );
        }

        Ok(BroadcastResponse {
            tx_hash,
            code: 0,
            raw_log: String::new(),
        })
    }

    async fn tx_receipt(&self, tx_hash: &str) -> Result<TxResponse, ClientError> {
        self.lock()
            .receipts
            .get(tx_hash)
            .cloned()
            .ok_or_else(ClientError::not_found)
    }

    async fn account_info(&self, _address: &str) -> Result<AccountInfo, ClientError> {
        Ok(self.lock().account)
    }

    async fn balance(&self, _address: &str, denom: &str) -> Result<Coin, ClientError> {
        Ok(Coin::new(denom, 1_000_000))
    }
}
