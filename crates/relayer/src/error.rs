//! Error taxonomy of the relay core.

use centralized_relay_types::NetworkId;
use flex_error::{define_error, TraceError};

use crate::chain::client::ClientError;
use crate::config::ConfigError;
use crate::store::StoreError;

define_error! {
    Error {
        Config
            [ ConfigError ]
            |_| { "configuration error" },

        Client
            [ ClientError ]
            |_| { "chain client error" },

        Store
            [ StoreError ]
            |_| { "message store error" },

        InvalidCursor
            {
                saved: u64,
                latest: u64,
            }
            |e| {
                format_args!(
                    "last saved height {} is greater than the chain's latest height {}",
                    e.saved, e.latest
                )
            },

        Decode
            { reason: String }
            |e| { format_args!("failed to decode event: {}", e.reason) },

        ZeroGas
            |_| { "gas amount cannot be zero" },

        GasBounds
            {
                estimated: u64,
                min: u64,
                max: u64,
            }
            |e| {
                format_args!(
                    "estimated gas {} outside the allowed bounds [{}, {}]",
                    e.estimated, e.min, e.max
                )
            },

        Broadcast
            { log: String }
            |e| { format_args!("failed to broadcast tx: {}", e.log) },

        TxFailed
            {
                tx_hash: String,
                code: u32,
                log: String,
            }
            |e| {
                format_args!("transaction {} failed with code {}: {}", e.tx_hash, e.code, e.log)
            },

        TxTimeout
            { tx_hash: String }
            |e| { format_args!("timed out waiting for inclusion of tx {}", e.tx_hash) },

        Subscription
            { reason: String }
            |e| { format_args!("event subscription failed: {}", e.reason) },

        UnknownDestination
            { nid: NetworkId }
            |e| { format_args!("no provider registered for destination network '{}'", e.nid) },

        ChannelClosed
            |_| { "internal message-passing failure: channel closed" },

        Json
            [ TraceError<serde_json::Error> ]
            |_| { "JSON serialization error" },

        Cancelled
            |_| { "operation cancelled" },
    }
}

impl Error {
    /// Whether this error came from the wallet's cached sequence going stale,
    /// in which case the submission engine refreshes the account from the
    /// chain and retries once.
    pub fn is_sequence_mismatch(&self) -> bool {
        matches!(
            self.detail(),
            ErrorDetail::Client(detail)
                if matches!(
                    detail.source,
                    crate::chain::client::ClientErrorDetail::SequenceMismatch(_)
                )
        )
    }

    /// Clean-shutdown errors are not logged as failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.detail(), ErrorDetail::Cancelled(_))
    }
}
