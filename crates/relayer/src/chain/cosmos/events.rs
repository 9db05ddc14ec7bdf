//! Decoding of Cosmos-Wasm `wasm-Message` events into the normalized
//! message envelope.

use core::str::FromStr;

use serde_derive::{Deserialize, Serialize};

use centralized_relay_types::{EventKind, Message, NetworkId};

use crate::chain::client::EventFilter;
use crate::config::ContractSet;
use crate::error::Error;

pub const EVENT_TYPE_WASM_MESSAGE: &str = "wasm-Message";

// Attribute keys for connection contract events.
pub const ATTR_KEY_MSG: &str = "msg";
pub const ATTR_KEY_TARGET_NETWORK: &str = "targetNetwork";
pub const ATTR_KEY_CONN_SN: &str = "connSn";

// Attribute keys for xcall contract events.
pub const ATTR_KEY_REQ_ID: &str = "reqId";
pub const ATTR_KEY_DATA: &str = "data";
pub const ATTR_KEY_FROM: &str = "from";

pub const ATTR_KEY_CONTRACT_ADDRESS: &str = "_contract_address";

/// One event as carried inside `TxResult.Log`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub attributes: Vec<RawAttribute>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAttribute {
    pub key: String,
    pub value: String,
}

/// The outer shape of a transaction's event log: one entry per message in
/// the transaction, each carrying its emitted events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsList {
    pub events: Vec<RawEvent>,
}

/// Parses chain-native event records into [`Message`]s, keyed by contract
/// address. A pure function of its inputs.
#[derive(Clone, Debug)]
pub struct EventDecoder {
    nid: NetworkId,
    contracts: ContractSet,
}

impl EventDecoder {
    pub fn new(nid: NetworkId, contracts: ContractSet) -> Self {
        Self { nid, contracts }
    }

    /// Decodes a transaction's raw event log observed at `height`.
    ///
    /// A malformed attribute anywhere in the log aborts decoding of the
    /// whole transaction; partial results are never returned.
    pub fn decode_log(&self, log: &str, height: u64) -> Result<Vec<Message>, Error> {
        let lists: Vec<EventsList> = serde_json::from_str(log)
            .map_err(|e| Error::decode(format!("malformed tx log: {e}")))?;

        let mut messages = Vec::new();

        for list in &lists {
            messages.extend(self.decode_events(&list.events, height)?);
        }

        Ok(messages)
    }

    /// Decodes a list of already-parsed event records.
    pub fn decode_events(
        &self,
        events: &[RawEvent],
        height: u64,
    ) -> Result<Vec<Message>, Error> {
        let mut messages = Vec::new();

        for event in events {
            if event.kind != EVENT_TYPE_WASM_MESSAGE {
                continue;
            }

            if let Some(message) = self.decode_message(event, height)? {
                messages.push(message);
            }
        }

        Ok(messages)
    }

    fn decode_message(&self, event: &RawEvent, height: u64) -> Result<Option<Message>, Error> {
        let mut kind: Option<EventKind> = None;
        let mut src = NetworkId::from("");
        let mut dst = NetworkId::from("");
        let mut sn = 0u64;
        let mut req_id = 0u64;
        let mut data = Vec::new();

        for attr in &event.attributes {
            match attr.key.as_str() {
                ATTR_KEY_CONTRACT_ADDRESS => {
                    if attr.value == self.contracts.xcall {
                        kind = Some(EventKind::CallMessage);
                        dst = self.nid.clone();
                    } else if attr.value == self.contracts.connection {
                        kind = Some(EventKind::EmitMessage);
                        src = self.nid.clone();
                    }
                }
                ATTR_KEY_MSG | ATTR_KEY_DATA => {
                    data = decode_hex(&attr.value)?;
                }
                ATTR_KEY_CONN_SN => {
                    sn = decode_u64(ATTR_KEY_CONN_SN, &attr.value)?;
                }
                ATTR_KEY_TARGET_NETWORK => {
                    dst = NetworkId::from(attr.value.as_str());
                }
                ATTR_KEY_REQ_ID => {
                    req_id = decode_u64(ATTR_KEY_REQ_ID, &attr.value)?;
                }
                ATTR_KEY_FROM => {
                    src = NetworkId::from(attr.value.as_str());
                }
                _ => {}
            }
        }

        // Events emitted by contracts other than ours share the tx log;
        // they are not relay messages.
        let Some(event_kind) = kind else {
            return Ok(None);
        };

        Ok(Some(Message {
            src,
            dst,
            sn,
            req_id,
            event_kind,
            data,
            message_height: height,
            retry_count: 0,
            last_tried_at: 0,
        }))
    }

    /// One `tx_search` filter per monitored contract address.
    pub fn monitor_filters(&self) -> Vec<EventFilter> {
        [&self.contracts.xcall, &self.contracts.connection]
            .into_iter()
            .map(|addr| EventFilter {
                event_type: EVENT_TYPE_WASM_MESSAGE.to_string(),
                attr_key: ATTR_KEY_CONTRACT_ADDRESS.to_string(),
                attr_value: addr.clone(),
            })
            .collect()
    }
}

fn decode_hex(value: &str) -> Result<Vec<u8>, Error> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);

    hex::decode(stripped)
        .map_err(|e| Error::decode(format!("failed to parse msg data from event: {e}")))
}

fn decode_u64(key: &str, value: &str) -> Result<u64, Error> {
    u64::from_str(value).map_err(|_| Error::decode(format!("failed to parse {key} from event")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> EventDecoder {
        EventDecoder::new(
            NetworkId::from("chainA"),
            ContractSet {
                xcall: "xcall_addr".to_string(),
                connection: "conn_addr".to_string(),
            },
        )
    }

    fn event(attrs: &[(&str, &str)]) -> RawEvent {
        RawEvent {
            kind: EVENT_TYPE_WASM_MESSAGE.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| RawAttribute {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn decode_emit_message_from_connection_contract() {
        let messages = decoder()
            .decode_events(
                &[event(&[
                    ("_contract_address", "conn_addr"),
                    ("msg", "0x0102"),
                    ("connSn", "7"),
                    ("targetNetwork", "chainB"),
                ])],
                100,
            )
            .unwrap();

        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert_eq!(msg.src, NetworkId::from("chainA"));
        assert_eq!(msg.dst, NetworkId::from("chainB"));
        assert_eq!(msg.sn, 7);
        assert_eq!(msg.event_kind, EventKind::EmitMessage);
        assert_eq!(msg.data, vec![0x01, 0x02]);
        assert_eq!(msg.message_height, 100);
    }

    #[test]
    fn decode_call_message_from_xcall_contract() {
        let messages = decoder()
            .decode_events(
                &[event(&[
                    ("_contract_address", "xcall_addr"),
                    ("data", "0xaa"),
                    ("reqId", "42"),
                    ("from", "chainX"),
                ])],
                55,
            )
            .unwrap();

        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert_eq!(msg.src, NetworkId::from("chainX"));
        assert_eq!(msg.dst, NetworkId::from("chainA"));
        assert_eq!(msg.req_id, 42);
        assert_eq!(msg.event_kind, EventKind::CallMessage);
        assert_eq!(msg.data, vec![0xaa]);
    }

    #[test]
    fn non_wasm_events_are_ignored() {
        let mut ev = event(&[("_contract_address", "conn_addr")]);
        ev.kind = "transfer".to_string();

        let messages = decoder().decode_events(&[ev], 1).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn foreign_contract_events_are_skipped() {
        let messages = decoder()
            .decode_events(
                &[event(&[("_contract_address", "someone_else"), ("connSn", "3")])],
                1,
            )
            .unwrap();

        assert!(messages.is_empty());
    }

    #[test]
    fn malformed_hex_aborts_the_transaction() {
        let result = decoder().decode_events(
            &[event(&[
                ("_contract_address", "conn_addr"),
                ("msg", "0xzz"),
            ])],
            1,
        );

        assert!(result.is_err());
    }

    #[test]
    fn malformed_sn_aborts_the_transaction() {
        let result = decoder().decode_events(
            &[event(&[
                ("_contract_address", "conn_addr"),
                ("connSn", "-1"),
            ])],
            1,
        );

        assert!(result.is_err());
    }

    #[test]
    fn decode_log_parses_the_wire_shape() {
        let log = r#"[{"events":[
            {"type":"wasm-Message","attributes":[
                {"key":"_contract_address","value":"conn_addr"},
                {"key":"msg","value":"beef"},
                {"key":"connSn","value":"9"},
                {"key":"targetNetwork","value":"chainB"}
            ]}
        ]}]"#;

        let messages = decoder().decode_log(log, 12).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sn, 9);
        assert_eq!(messages[0].data, vec![0xbe, 0xef]);
    }

    #[test]
    fn decoding_is_deterministic() {
        let events = [event(&[
            ("_contract_address", "conn_addr"),
            ("msg", "0102"),
            ("connSn", "7"),
            ("targetNetwork", "chainB"),
        ])];

        let first = decoder().decode_events(&events, 100).unwrap();
        let second = decoder().decode_events(&events, 100).unwrap();

        assert_eq!(first, second);
    }
}
