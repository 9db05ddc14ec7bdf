//! Thin transport over a chain's RPC endpoint.
//!
//! One implementation exists per chain family; everything above this trait
//! (event decoding, transaction construction, sequence discipline) lives in
//! the family's provider. Implementations are expected to be safe for
//! concurrent calls.

use core::pin::Pin;

use async_trait::async_trait;
use flex_error::define_error;
use futures::Stream;
use serde_derive::{Deserialize, Serialize};

use centralized_relay_types::{Coin, TxResponse};

define_error! {
    #[derive(Debug, Clone)]
    ClientError {
        NotFound
            |_| { "not found" },

        SequenceMismatch
            { log: String }
            |e| { format_args!("account sequence mismatch: {}", e.log) },

        ConnectionClosed
            { reason: String }
            |e| { format_args!("connection closed: {}", e.reason) },

        Rpc
            { reason: String }
            |e| { format_args!("rpc error: {}", e.reason) },

        Decode
            { reason: String }
            |e| { format_args!("failed to decode chain response: {}", e.reason) },
    }
}

// `define_error!` deliberately does not derive `Clone` on the generated
// wrapper struct itself (its tracer type is treated as opaque), only on the
// detail enum. The detail's `#[derive(Clone)]` still requires the wrapper to
// be `Clone` wherever a variant embeds it, so provide that impl by cloning
// the detail and re-deriving the trace from it.
impl Clone for ClientError {
    fn clone(&self) -> Self {
        use flex_error::ErrorTracer;
        Self(self.0.clone(), flex_error::DefaultTracer::new_trace(self.0.clone()))
    }
}

/// One transaction as returned by a `tx_search` query. `log` carries the
/// chain's event log verbatim; for Cosmos-Wasm chains this is the JSON
/// `[{"events":[...]}]` shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSearchHit {
    pub height: u64,
    pub tx_hash: String,
    pub log: String,
}

/// A single event filter of the form `key = 'value'` scoped to an event
/// type, e.g. `wasm-Message._contract_address = 'archway1..'`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventFilter {
    pub event_type: String,
    pub attr_key: String,
    pub attr_value: String,
}

impl EventFilter {
    /// The query fragment understood by the chain node.
    pub fn to_query(&self) -> String {
        format!(
            "{}.{} = '{}'",
            self.event_type, self.attr_key, self.attr_value
        )
    }
}

/// Paged transaction search over a height range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxSearchParam {
    pub from_height: u64,
    pub to_height: u64,
    pub filter: EventFilter,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxSearchResponse {
    pub txs: Vec<TxSearchHit>,
    /// Total matching transactions across all pages.
    pub total_count: u32,
}

/// An event pushed by a server-side subscription. `log` carries the event
/// JSON of an executed transaction, or the chain's error log when `code`
/// is non-zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub height: u64,
    pub tx_hash: String,
    pub code: u32,
    pub log: String,
}

pub type EventStream =
    Pin<Box<dyn Stream<Item = Result<SubscriptionEvent, ClientError>> + Send>>;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountInfo {
    pub account_number: u64,
    pub sequence: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastResponse {
    pub tx_hash: String,
    pub code: u32,
    pub raw_log: String,
}

/// A transaction ready for gas simulation and broadcast. The relay core
/// never inspects `payload`; chain clients encode and sign it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxDraft {
    pub contract: String,
    pub payload: Vec<u8>,
    pub account_number: u64,
    pub sequence: u64,
    pub gas_limit: u64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn latest_height(&self) -> Result<u64, ClientError>;

    /// One page of transactions matching `param`'s filter in its height
    /// range. Callers page until `total_count` is exhausted.
    async fn tx_search(&self, param: TxSearchParam) -> Result<TxSearchResponse, ClientError>;

    /// Server-push subscription for events matching `query`.
    async fn subscribe(&self, query: String) -> Result<EventStream, ClientError>;

    /// Smart-contract query; `payload` and the response are contract-defined
    /// JSON.
    async fn query_contract(
        &self,
        contract: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, ClientError>;

    /// Simulated gas consumption of `draft`, before adjustment.
    async fn simulate(&self, draft: &TxDraft) -> Result<u64, ClientError>;

    async fn broadcast_tx(&self, draft: &TxDraft) -> Result<BroadcastResponse, ClientError>;

    /// Inclusion lookup by hash. `NotFound` until the transaction lands in
    /// a block.
    async fn tx_receipt(&self, tx_hash: &str) -> Result<TxResponse, ClientError>;

    async fn account_info(&self, address: &str) -> Result<AccountInfo, ClientError>;

    async fn balance(&self, address: &str, denom: &str) -> Result<Coin, ClientError>;
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self.detail(), ClientErrorDetail::NotFound(_))
    }

    pub fn is_sequence_mismatch(&self) -> bool {
        matches!(self.detail(), ClientErrorDetail::SequenceMismatch(_))
    }
}
