//! The Cosmos-Wasm chain provider.
//!
//! Wraps an abstract [`ChainClient`] with `wasm-Message` event decoding,
//! contract transaction construction, and wallet sequence discipline. The
//! listener side streams normalized messages to the supervisor; the router
//! side delivers messages handed back by the supervisor.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, error_span, info, Instrument};

use centralized_relay_types::{BlockInfo, Coin, EventKind, Message, NetworkId};

use crate::chain::client::ChainClient;
use crate::chain::provider::{ChainProvider, TxResponseFn};
use crate::config::ChainConfig;
use crate::error::Error;

pub mod events;
pub mod retry;
pub mod source;
pub mod tx;
pub mod types;
pub mod wait;

use events::EventDecoder;
use retry::send_tx_with_account_sequence_retry;
use source::{run_listener, ListenerContext};
use types::WalletState;
use wait::wait_for_tx_result;

pub struct CosmosProvider<C> {
    config: ChainConfig,
    client: Arc<C>,
    decoder: EventDecoder,

    /// Serializes transaction submission on the relay wallet; the only
    /// mutual-exclusion requirement of the provider. Shared with detached
    /// result waiters, which mark the wallet blocked on failed waits.
    wallet: Arc<Mutex<WalletState>>,

    /// Parent token for detached tasks (result waiters) spawned by `route`.
    token: CancellationToken,
}

impl<C: ChainClient + 'static> CosmosProvider<C> {
    pub fn new(config: ChainConfig, client: Arc<C>, token: CancellationToken) -> Result<Self, Error> {
        config.validate().map_err(Error::config)?;

        let decoder = EventDecoder::new(config.nid.clone(), config.contracts.clone());

        Ok(Self {
            config,
            client,
            decoder,
            wallet: Arc::new(Mutex::new(WalletState::default())),
            token,
        })
    }

    /// The destination contract and execute payload for a message,
    /// selected by event kind.
    fn contract_message(&self, message: &Message) -> Result<(String, Vec<u8>), Error> {
        let contracts = &self.config.contracts;

        let (contract, payload) = match message.event_kind {
            EventKind::CallMessage => (
                &contracts.xcall,
                serde_json::to_vec(&types::ExecExecuteCall::from_message(message)),
            ),
            EventKind::ExecuteRollback => (
                &contracts.xcall,
                serde_json::to_vec(&types::ExecExecuteRollback::from_message(message)),
            ),
            EventKind::EmitMessage => (
                &contracts.connection,
                serde_json::to_vec(&types::ExecRecvMessage::from_message(message)),
            ),
            EventKind::RevertMessage => (
                &contracts.connection,
                serde_json::to_vec(&types::ExecRevertMessage {
                    revert_message: types::RevertMessage {
                        sn: message.sn.to_string(),
                    },
                }),
            ),
            EventKind::SetAdmin => (
                &contracts.connection,
                serde_json::to_vec(&types::ExecSetAdmin {
                    set_admin: types::SetAdmin {
                        address: String::from_utf8_lossy(&message.data).into_owned(),
                    },
                }),
            ),
            EventKind::SetFee => (
                &contracts.connection,
                serde_json::to_vec(&types::ExecSetFee {
                    set_fee: types::SetFee {
                        network_id: message.src.clone(),
                        message_fee: message.sn.to_string(),
                        response_fee: message.req_id.to_string(),
                    },
                }),
            ),
            EventKind::ClaimFee => (
                &contracts.connection,
                serde_json::to_vec(&types::ExecClaimFees::default()),
            ),
        };

        Ok((contract.clone(), payload.map_err(Error::json)?))
    }

    /// Submit a contract execution under the wallet lock and return the
    /// broadcast response.
    async fn send_message(&self, contract: String, payload: Vec<u8>) -> Result<String, Error> {
        let mut wallet = self.wallet.lock().await;

        let response = send_tx_with_account_sequence_retry(
            self.client.as_ref(),
            &self.config,
            &mut wallet,
            contract,
            payload,
        )
        .await?;

        Ok(response.tx_hash)
    }

    /// Route a control operation end to end: submit and wait inline for
    /// the terminal result.
    async fn execute_control(&self, message: &Message) -> Result<(), Error> {
        let (contract, payload) = self.contract_message(message)?;
        let tx_hash = self.send_message(contract, payload).await?;

        let response =
            wait_for_tx_result(self.client.as_ref(), &self.config, &self.token, &tx_hash).await?;

        info!(
            tx_hash = %response.tx_hash,
            height = response.height,
            event_kind = %message.event_kind,
            "transaction success"
        );

        Ok(())
    }

    fn control_message(&self, event_kind: EventKind) -> Message {
        Message {
            src: self.config.nid.clone(),
            dst: self.config.nid.clone(),
            sn: 0,
            req_id: 0,
            event_kind,
            data: Vec::new(),
            message_height: 0,
            retry_count: 0,
            last_tried_at: 0,
        }
    }
}

#[async_trait]
impl<C: ChainClient + 'static> ChainProvider for CosmosProvider<C> {
    fn nid(&self) -> &NetworkId {
        &self.config.nid
    }

    fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn finality_block(&self) -> u64 {
        self.config.finality_block
    }

    async fn query_latest_height(&self) -> Result<u64, Error> {
        self.client.latest_height().await.map_err(Error::client)
    }

    async fn listener(
        &self,
        token: CancellationToken,
        last_saved_height: u64,
        tx: mpsc::Sender<BlockInfo>,
    ) -> Result<(), Error> {
        let ctx = ListenerContext {
            client: &self.client,
            config: &self.config,
            decoder: &self.decoder,
        };

        run_listener(ctx, token, last_saved_height, tx)
            .instrument(error_span!("listener", chain = %self.config.nid))
            .await
    }

    async fn route(&self, message: Message, callback: TxResponseFn) -> Result<(), Error> {
        let (contract, payload) = self.contract_message(&message)?;
        let tx_hash = self.send_message(contract, payload).await?;

        // Await inclusion in a detached task; the callback fires exactly
        // once with the terminal result.
        let client = self.client.clone();
        let config = self.config.clone();
        let wallet = self.wallet.clone();
        let token = self.token.child_token();
        let key = message.key();
        let span = error_span!("tx_waiter", chain = %self.config.nid, tx_hash = %tx_hash);

        tokio::spawn(
            async move {
                match wait_for_tx_result(client.as_ref(), &config, &token, &tx_hash).await {
                    Ok(response) => {
                        info!(
                            height = response.height,
                            chain_id = %config.chain_id,
                            "transaction success"
                        );

                        callback(key, Some(response), None);
                    }
                    Err(e) => {
                        if !e.is_cancelled() {
                            error!(chain_id = %config.chain_id, "transaction failed: {e}");
                        }

                        // The mempool may have dropped or reordered the
                        // tx; force a sequence refresh before the next
                        // submission.
                        wallet.lock().await.mempool_blocked = true;

                        callback(key, None, Some(e));
                    }
                }
            }
            .instrument(span),
        );

        Ok(())
    }

    async fn message_received(&self, src: &NetworkId, sn: u64) -> Result<bool, Error> {
        let query = types::QueryReceipt::new(src, sn);
        let payload = serde_json::to_vec(&query).map_err(Error::json)?;

        let response = self
            .client
            .query_contract(&self.config.contracts.connection, payload)
            .await
            .map_err(Error::client)?;

        serde_json::from_slice(&response).map_err(Error::json)
    }

    async fn query_balance(&self, address: &str) -> Result<Coin, Error> {
        self.client
            .balance(address, &self.config.denomination)
            .await
            .map_err(Error::client)
    }

    async fn revert_message(&self, sn: u64) -> Result<(), Error> {
        let mut message = self.control_message(EventKind::RevertMessage);
        message.sn = sn;

        self.execute_control(&message).await
    }

    async fn set_admin(&self, address: &str) -> Result<(), Error> {
        let mut message = self.control_message(EventKind::SetAdmin);
        message.data = address.as_bytes().to_vec();

        self.execute_control(&message).await
    }

    async fn set_fee(&self, network: &NetworkId, msg_fee: u64, res_fee: u64) -> Result<(), Error> {
        let mut message = self.control_message(EventKind::SetFee);
        message.src = network.clone();
        message.sn = msg_fee;
        message.req_id = res_fee;

        self.execute_control(&message).await
    }

    async fn claim_fee(&self) -> Result<(), Error> {
        self.execute_control(&self.control_message(EventKind::ClaimFee))
            .await
    }
}
