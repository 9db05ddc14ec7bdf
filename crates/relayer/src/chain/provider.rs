//! The capability set a chain exposes to the supervisor.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use centralized_relay_types::{BlockInfo, Coin, Message, MessageKey, NetworkId, TxResponse};

use crate::config::ChainConfig;
use crate::error::Error;

/// Invoked by the submission engine with the terminal result of a routed
/// message: the transaction response when one was obtained, and the error
/// that ended the attempt otherwise.
pub type TxResponseFn =
    Box<dyn FnOnce(MessageKey, Option<TxResponse>, Option<Error>) + Send + 'static>;

/// A blockchain as understood by the relay: an event listener on one side
/// and a transaction router on the other.
///
/// Implementations exist per chain family (Cosmos-Wasm here; EVM, Sui and
/// ICON plug in behind the same trait) and are driven concurrently by the
/// supervisor. All blocking entry points honour the cancellation token.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    fn nid(&self) -> &NetworkId;

    fn config(&self) -> &ChainConfig;

    /// Confirmations required before this chain's events may be forwarded.
    fn finality_block(&self) -> u64;

    async fn query_latest_height(&self) -> Result<u64, Error>;

    /// Streams [`BlockInfo`]s from `last_saved_height` onwards into `tx`,
    /// in height order, until cancelled. Returns on terminal failure only.
    async fn listener(
        &self,
        token: CancellationToken,
        last_saved_height: u64,
        tx: mpsc::Sender<BlockInfo>,
    ) -> Result<(), Error>;

    /// Builds and submits the chain-native transaction for `message`.
    /// Inclusion is awaited in a detached task which invokes `callback`
    /// exactly once with the terminal result.
    async fn route(&self, message: Message, callback: TxResponseFn) -> Result<(), Error>;

    /// Whether the destination chain has recorded receipt of `(src, sn)`.
    async fn message_received(&self, src: &NetworkId, sn: u64) -> Result<bool, Error>;

    async fn query_balance(&self, address: &str) -> Result<Coin, Error>;

    /// Rolls back a message held by the connection contract.
    async fn revert_message(&self, sn: u64) -> Result<(), Error>;

    /// Rotates the connection contract's admin address.
    async fn set_admin(&self, address: &str) -> Result<(), Error>;

    /// Updates the connection contract's message/response fees for a network.
    async fn set_fee(&self, network: &NetworkId, msg_fee: u64, res_fee: u64) -> Result<(), Error>;

    /// Claims accrued fees from the connection contract.
    async fn claim_fee(&self) -> Result<(), Error>;
}
