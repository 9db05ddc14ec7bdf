use core::fmt::{Display, Error as FmtError, Formatter};

use serde_derive::{Deserialize, Serialize};

use crate::events::EventKind;
use crate::identifier::NetworkId;

/// The normalized cross-chain message envelope.
///
/// Created by a chain's event decoder, persisted by the supervisor on
/// receipt, and deleted once the destination chain acknowledges delivery.
/// The payload in `data` is preserved byte-exact from the source event
/// through the destination transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Origin network.
    pub src: NetworkId,

    /// Destination network.
    pub dst: NetworkId,

    /// Sequence number assigned by the connection contract on the source
    /// chain; unique within `(src, dst, event_kind)`.
    pub sn: u64,

    /// Request id emitted by the xcall layer; zero for non-call events.
    pub req_id: u64,

    pub event_kind: EventKind,

    /// Opaque payload, decoded only by the destination-side contract.
    #[serde(with = "serde_bytes_vec")]
    pub data: Vec<u8>,

    /// Height at which the event was observed on `src`.
    pub message_height: u64,

    /// Number of failed delivery attempts so far.
    pub retry_count: u8,

    /// Unix timestamp (seconds) of the last delivery attempt; zero if the
    /// message has never been tried.
    pub last_tried_at: u64,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        MessageKey {
            src: self.src.clone(),
            dst: self.dst.clone(),
            sn: self.sn,
            event_kind: self.event_kind,
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "{} sn={} src={} dst={} height={} retries={}",
            self.event_kind, self.sn, self.src, self.dst, self.message_height, self.retry_count
        )
    }
}

/// Natural key of a [`Message`]: `(src, dst, sn, event_kind)`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub src: NetworkId,
    pub dst: NetworkId,
    pub sn: u64,
    pub event_kind: EventKind,
}

impl MessageKey {
    pub fn new(src: NetworkId, dst: NetworkId, sn: u64, event_kind: EventKind) -> Self {
        Self {
            src,
            dst,
            sn,
            event_kind,
        }
    }
}

impl Display for MessageKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}/{}/{}/{}", self.src, self.dst, self.sn, self.event_kind)
    }
}

/// Serialize message payloads as plain byte arrays.
mod serde_bytes_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Vec::<u8>::deserialize(deserializer)
    }
}
