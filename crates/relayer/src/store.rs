//! Durable message and cursor storage.
//!
//! The supervisor owns every in-flight [`Message`] through this interface.
//! Per-chain, messages of a height are always `put` before the cursor is
//! advanced to that height, so a crash can replay but never skip events.

use std::collections::BTreeMap;

use async_trait::async_trait;
use flex_error::define_error;
use tokio::sync::RwLock;

use centralized_relay_types::{Message, MessageKey, NetworkId};

define_error! {
    #[derive(Debug, Clone)]
    StoreError {
        NotFound
            { key: MessageKey }
            |e| { format_args!("message {} not found in store", e.key) },

        Backend
            { reason: String }
            |e| { format_args!("store backend failure: {}", e.reason) },
    }
}

/// Durable key-value storage for in-flight messages plus a per-chain
/// height cursor.
///
/// Implementations must make a successful `put` survive a process crash.
/// `messages` returns a point-in-time snapshot; holding it does not block
/// concurrent writes.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Stores `msg` under `key`, overwriting any existing entry.
    async fn put(&self, key: &MessageKey, msg: &Message) -> Result<(), StoreError>;

    async fn get(&self, key: &MessageKey) -> Result<Option<Message>, StoreError>;

    async fn delete(&self, key: &MessageKey) -> Result<(), StoreError>;

    /// Snapshot of all in-flight messages.
    async fn messages(&self) -> Result<Vec<(MessageKey, Message)>, StoreError>;

    /// Records a message that exhausted its delivery attempts. Markers are
    /// write-only from the relay's point of view; operators inspect them
    /// out of band.
    async fn put_failed(&self, key: &MessageKey, msg: &Message) -> Result<(), StoreError>;

    async fn set_cursor(&self, nid: &NetworkId, height: u64) -> Result<(), StoreError>;

    /// Last saved height for `nid`; zero if the chain has never been scanned.
    async fn cursor(&self, nid: &NetworkId) -> Result<u64, StoreError>;
}

/// In-memory reference implementation, used by tests and as the default
/// in-process store.
#[derive(Default)]
pub struct MemoryStore {
    messages: RwLock<BTreeMap<MessageKey, Message>>,
    failed: RwLock<BTreeMap<MessageKey, Message>>,
    cursors: RwLock<BTreeMap<NetworkId, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the permanent-failure markers.
    pub async fn failed_messages(&self) -> Vec<(MessageKey, Message)> {
        self.failed
            .read()
            .await
            .iter()
            .map(|(k, m)| (k.clone(), m.clone()))
            .collect()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn put(&self, key: &MessageKey, msg: &Message) -> Result<(), StoreError> {
        self.messages
            .write()
            .await
            .insert(key.clone(), msg.clone());

        Ok(())
    }

    async fn get(&self, key: &MessageKey) -> Result<Option<Message>, StoreError> {
        Ok(self.messages.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &MessageKey) -> Result<(), StoreError> {
        self.messages.write().await.remove(key);

        Ok(())
    }

    async fn messages(&self) -> Result<Vec<(MessageKey, Message)>, StoreError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .map(|(k, m)| (k.clone(), m.clone()))
            .collect())
    }

    async fn put_failed(&self, key: &MessageKey, msg: &Message) -> Result<(), StoreError> {
        self.failed.write().await.insert(key.clone(), msg.clone());

        Ok(())
    }

    async fn set_cursor(&self, nid: &NetworkId, height: u64) -> Result<(), StoreError> {
        self.cursors.write().await.insert(nid.clone(), height);

        Ok(())
    }

    async fn cursor(&self, nid: &NetworkId) -> Result<u64, StoreError> {
        Ok(self.cursors.read().await.get(nid).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use centralized_relay_types::EventKind;

    fn message(sn: u64) -> Message {
        Message {
            src: NetworkId::from("chainA"),
            dst: NetworkId::from("chainB"),
            sn,
            req_id: 0,
            event_kind: EventKind::EmitMessage,
            data: vec![0x01],
            message_height: 10,
            retry_count: 0,
            last_tried_at: 0,
        }
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let store = MemoryStore::new();
        let msg = message(1);
        let key = msg.key();

        store.put(&key, &msg).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(msg));

        store.delete(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites_existing_entry() {
        let store = MemoryStore::new();
        let mut msg = message(1);
        let key = msg.key();

        store.put(&key, &msg).await.unwrap();

        msg.retry_count = 3;
        store.put(&key, &msg).await.unwrap();

        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 3);
        assert_eq!(store.messages().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cursor_defaults_to_zero() {
        let store = MemoryStore::new();
        let nid = NetworkId::from("chainA");

        assert_eq!(store.cursor(&nid).await.unwrap(), 0);

        store.set_cursor(&nid, 42).await.unwrap();
        assert_eq!(store.cursor(&nid).await.unwrap(), 42);
    }
}
