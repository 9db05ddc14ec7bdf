//! Wire types of the Cosmos-Wasm provider: contract execute/query payloads
//! and the wallet state guarded by the submission lock.

use serde_derive::{Deserialize, Serialize};

use centralized_relay_types::{Message, NetworkId};

use crate::chain::client::AccountInfo;

/// `execute_call` on the xcall contract, delivering a `CallMessage`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecExecuteCall {
    pub execute_call: ExecuteCall,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteCall {
    pub request_id: String,
    pub data: Vec<u8>,
}

impl ExecExecuteCall {
    pub fn from_message(message: &Message) -> Self {
        Self {
            execute_call: ExecuteCall {
                request_id: message.req_id.to_string(),
                data: message.data.clone(),
            },
        }
    }
}

/// `execute_rollback` on the xcall contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecExecuteRollback {
    pub execute_rollback: ExecuteRollback,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRollback {
    pub sequence_no: String,
}

impl ExecExecuteRollback {
    pub fn from_message(message: &Message) -> Self {
        Self {
            execute_rollback: ExecuteRollback {
                sequence_no: message.sn.to_string(),
            },
        }
    }
}

/// `recv_message` on the connection contract, delivering an `EmitMessage`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRecvMessage {
    pub recv_message: RecvMessage,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecvMessage {
    pub src_network: NetworkId,
    pub conn_sn: String,
    pub msg: Vec<u8>,
}

impl ExecRecvMessage {
    pub fn from_message(message: &Message) -> Self {
        Self {
            recv_message: RecvMessage {
                src_network: message.src.clone(),
                conn_sn: message.sn.to_string(),
                msg: message.data.clone(),
            },
        }
    }
}

/// `revert_message` on the connection contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRevertMessage {
    pub revert_message: RevertMessage,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertMessage {
    pub sn: String,
}

/// `set_admin` on the connection contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSetAdmin {
    pub set_admin: SetAdmin,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAdmin {
    pub address: String,
}

/// `set_fee` on the connection contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSetFee {
    pub set_fee: SetFee,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetFee {
    pub network_id: NetworkId,
    pub message_fee: String,
    pub response_fee: String,
}

/// `claim_fees` on the connection contract.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecClaimFees {
    pub claim_fees: ClaimFees,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimFees {}

/// `get_receipt` smart query on the connection contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryReceipt {
    pub get_receipt: GetReceipt,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetReceipt {
    pub src_network: NetworkId,
    pub conn_sn: String,
}

impl QueryReceipt {
    pub fn new(src: &NetworkId, sn: u64) -> Self {
        Self {
            get_receipt: GetReceipt {
                src_network: src.clone(),
                conn_sn: sn.to_string(),
            },
        }
    }
}

/// Wallet state guarded by the per-provider submission lock.
///
/// `mempool_blocked` marks the cached sequence as untrusted: the next
/// submission must re-read the account from the chain before broadcasting.
#[derive(Clone, Debug, Default)]
pub struct WalletState {
    pub account: Option<AccountInfo>,
    pub mempool_blocked: bool,
}

impl WalletState {
    pub fn needs_refresh(&self) -> bool {
        self.mempool_blocked || self.account.is_none()
    }

    /// Called after a successful broadcast: the chain accepted the cached
    /// sequence, so advance it and trust the cache again.
    pub fn record_broadcast(&mut self) {
        if let Some(account) = self.account.as_mut() {
            account.sequence += 1;
        }
        self.mempool_blocked = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_query_encodes_sn_as_decimal_string() {
        let query = QueryReceipt::new(&NetworkId::from("chainA"), 42);
        let json = serde_json::to_string(&query).unwrap();

        assert_eq!(
            json,
            r#"{"get_receipt":{"src_network":"chainA","conn_sn":"42"}}"#
        );
    }

    #[test]
    fn record_broadcast_advances_sequence_and_unblocks() {
        let mut wallet = WalletState {
            account: Some(AccountInfo {
                account_number: 1,
                sequence: 100,
            }),
            mempool_blocked: true,
        };

        wallet.record_broadcast();

        assert_eq!(wallet.account.unwrap().sequence, 101);
        assert!(!wallet.mempool_blocked);
    }
}
