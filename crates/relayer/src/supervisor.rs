//! The relay supervisor: spawns a listener per source chain, pairs
//! discovered messages with destination providers, owns the in-flight
//! store, and drives per-destination retry under finality delay and
//! exponential backoff.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use core::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, error_span, info, warn};

use centralized_relay_types::{BlockInfo, Message, MessageKey, NetworkId, TxResponse};

use crate::chain::provider::{ChainProvider, TxResponseFn};
use crate::config::GlobalConfig;
use crate::error::Error;
use crate::store::MessageStore;
use crate::util::retry::retry_delay;
use crate::util::task::{spawn_restarting_task, TaskHandle};

const BLOCK_CHANNEL_CAPACITY: usize = 64;

const LISTENER_RESTART_DELAY: Duration = Duration::from_secs(5);
const LISTENER_RESTART_MAX_DELAY: Duration = Duration::from_secs(5 * 60);

/// Terminal result of a routed message, delivered by the provider's
/// detached result waiter (or synthesized when `route` itself fails).
struct Completion {
    key: MessageKey,
    response: Option<TxResponse>,
    error: Option<Error>,
}

/// In-flight messages grouped by destination, plus the set of keys
/// currently routed and awaiting their completion.
#[derive(Default)]
struct PendingState {
    messages: BTreeMap<NetworkId, BTreeMap<MessageKey, Message>>,
    routing: HashSet<MessageKey>,
}

impl PendingState {
    fn insert(&mut self, msg: Message) {
        self.messages
            .entry(msg.dst.clone())
            .or_default()
            .insert(msg.key(), msg);
    }

    fn remove(&mut self, key: &MessageKey) {
        if let Some(for_dst) = self.messages.get_mut(&key.dst) {
            for_dst.remove(key);
        }
        self.routing.remove(key);
    }
}

pub struct Supervisor {
    global: GlobalConfig,
    store: Arc<dyn MessageStore>,
    providers: BTreeMap<NetworkId, Arc<dyn ChainProvider>>,
    token: CancellationToken,
}

impl Supervisor {
    pub fn new(
        global: GlobalConfig,
        store: Arc<dyn MessageStore>,
        token: CancellationToken,
    ) -> Self {
        Self {
            global,
            store,
            providers: BTreeMap::new(),
            token,
        }
    }

    pub fn add_provider(&mut self, provider: Arc<dyn ChainProvider>) {
        self.providers.insert(provider.nid().clone(), provider);
    }

    /// Run the relay until the token is cancelled.
    ///
    /// Spawns one listener task per chain and one retry loop per
    /// destination, then processes block and completion events on the
    /// calling task. Chain failures restart that chain with backoff and
    /// never affect the others; only startup errors abort.
    pub async fn run(self) -> Result<(), Error> {
        // Startup flush: every persisted message is rescheduled before any
        // listener can produce new ones.
        let mut state = PendingState::default();

        for (key, msg) in self.store.messages().await.map_err(Error::store)? {
            if !self.providers.contains_key(&msg.dst) {
                warn!(%key, dst = %msg.dst, "skipping persisted message for unknown destination");
                continue;
            }

            debug!(%key, "rescheduling persisted message");
            state.insert(msg);
        }

        let pending = Arc::new(Mutex::new(state));

        let (block_tx, mut block_rx) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);
        let (completion_tx, mut completion_rx) = mpsc::unbounded_channel();

        let mut tasks: Vec<TaskHandle> = Vec::new();

        for (nid, provider) in &self.providers {
            tasks.push(self.spawn_listener(nid.clone(), provider.clone(), block_tx.clone()));
            tasks.push(self.spawn_retry_loop(
                nid.clone(),
                provider.clone(),
                pending.clone(),
                completion_tx.clone(),
            ));
        }

        drop(block_tx);
        drop(completion_tx);

        info!(chains = self.providers.len(), "relay started");

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,

                block = block_rx.recv() => match block {
                    Some((src, block)) => self.handle_block(&src, block, &pending).await,
                    None => break,
                },

                completion = completion_rx.recv() => match completion {
                    Some(completion) => self.handle_completion(completion, &pending).await,
                    None => break,
                },
            }
        }

        info!("relay shutting down");

        for task in &tasks {
            task.shutdown();
        }
        for task in tasks {
            task.shutdown_and_wait().await;
        }

        Ok(())
    }

    fn spawn_listener(
        &self,
        nid: NetworkId,
        provider: Arc<dyn ChainProvider>,
        block_tx: mpsc::Sender<(NetworkId, BlockInfo)>,
    ) -> TaskHandle {
        let store = self.store.clone();
        let span = error_span!("chain", nid = %nid);

        spawn_restarting_task(
            span,
            self.token.child_token(),
            LISTENER_RESTART_DELAY,
            LISTENER_RESTART_MAX_DELAY,
            move |task_token| {
                let nid = nid.clone();
                let provider = provider.clone();
                let store = store.clone();
                let block_tx = block_tx.clone();

                async move {
                    // Re-read the cursor on every (re)start; the dispatcher
                    // advances it concurrently.
                    let cursor = store.cursor(&nid).await.map_err(Error::store)?;

                    let (tx, mut rx) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);

                    let forward = async {
                        while let Some(block) = rx.recv().await {
                            if block_tx.send((nid.clone(), block)).await.is_err() {
                                break;
                            }
                        }
                    };

                    let (result, ()) =
                        tokio::join!(provider.listener(task_token, cursor, tx), forward);

                    result
                }
            },
        )
    }

    fn spawn_retry_loop(
        &self,
        dst: NetworkId,
        provider: Arc<dyn ChainProvider>,
        pending: Arc<Mutex<PendingState>>,
        completion_tx: mpsc::UnboundedSender<Completion>,
    ) -> TaskHandle {
        let providers = self.providers.clone();
        let global = self.global.clone();
        let span = error_span!("retry", dst = %dst);

        spawn_restarting_task(
            span,
            self.token.child_token(),
            LISTENER_RESTART_DELAY,
            LISTENER_RESTART_MAX_DELAY,
            move |task_token| {
                let dst = dst.clone();
                let provider = provider.clone();
                let providers = providers.clone();
                let global = global.clone();
                let pending = pending.clone();
                let completion_tx = completion_tx.clone();

                async move {
                    let mut ticker = tokio::time::interval(provider.config().block_interval);
                    ticker.tick().await;

                    loop {
                        tokio::select! {
                            _ = task_token.cancelled() => return Ok::<(), Error>(()),
                            _ = ticker.tick() => {}
                        }

                        dispatch_eligible(
                            &dst,
                            provider.as_ref(),
                            &providers,
                            &global,
                            &pending,
                            &completion_tx,
                        )
                        .await;
                    }
                }
            },
        )
    }

    /// Persist a block's messages, then advance the chain cursor. The
    /// write order matters: a crash between the two replays the block
    /// instead of skipping it.
    async fn handle_block(
        &self,
        src: &NetworkId,
        block: BlockInfo,
        pending: &Arc<Mutex<PendingState>>,
    ) {
        for msg in block.messages {
            let key = msg.key();

            if !self.providers.contains_key(&msg.dst) {
                warn!(%key, dst = %msg.dst, "dropping message for unknown destination");
                continue;
            }

            match self.store.get(&key).await {
                Ok(Some(_)) => {
                    debug!(%key, "duplicate message, skipping");
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(%key, "failed to read store: {e}");
                    continue;
                }
            }

            if let Err(e) = self.store.put(&key, &msg).await {
                error!(%key, "failed to persist message: {e}");
                continue;
            }

            info!(%key, height = msg.message_height, "message persisted");

            pending.lock().await.insert(msg);
        }

        match self.store.cursor(src).await {
            Ok(cursor) if block.height > cursor => {
                if let Err(e) = self.store.set_cursor(src, block.height).await {
                    error!(chain = %src, height = block.height, "failed to advance cursor: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!(chain = %src, "failed to read cursor: {e}");
            }
        }
    }

    async fn handle_completion(&self, completion: Completion, pending: &Arc<Mutex<PendingState>>) {
        let key = completion.key;

        pending.lock().await.routing.remove(&key);

        let msg = match self.store.get(&key).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                debug!(%key, "completion for a message no longer in store");
                return;
            }
            Err(e) => {
                error!(%key, "failed to read store: {e}");
                return;
            }
        };

        let delivered = completion.error.is_none()
            && completion.response.as_ref().is_some_and(|r| r.is_success());

        if delivered {
            match self.confirm_receipt(&key).await {
                Ok(true) => {
                    if let Err(e) = self.store.delete(&key).await {
                        error!(%key, "failed to delete delivered message: {e}");
                        return;
                    }

                    pending.lock().await.remove(&key);
                    info!(%key, "message delivered");
                    return;
                }
                Ok(false) => {
                    warn!(%key, "delivery reported but receipt not yet visible, leaving for retry");
                }
                Err(e) => {
                    warn!(%key, "failed to query receipt, leaving for retry: {e}");
                }
            }

            // Not confirmed: refresh the attempt timestamp so the next try
            // waits out the backoff instead of hot-looping.
            self.record_attempt(msg, pending, false).await;
            return;
        }

        if let Some(e) = &completion.error {
            if e.is_cancelled() {
                return;
            }

            error!(%key, "delivery attempt failed: {e}");
        }

        self.record_attempt(msg, pending, true).await;
    }

    /// Whether the destination chain acknowledges `(src, sn)`.
    async fn confirm_receipt(&self, key: &MessageKey) -> Result<bool, Error> {
        let provider = self
            .providers
            .get(&key.dst)
            .ok_or_else(|| Error::unknown_destination(key.dst.clone()))?;

        provider.message_received(&key.src, key.sn).await
    }

    /// Update a message's retry accounting after a failed or unconfirmed
    /// attempt; drop it with a persistent marker once the retry limit is
    /// exhausted.
    async fn record_attempt(
        &self,
        mut msg: Message,
        pending: &Arc<Mutex<PendingState>>,
        count_retry: bool,
    ) {
        let key = msg.key();

        if count_retry {
            msg.retry_count = msg.retry_count.saturating_add(1);
        }
        msg.last_tried_at = unix_now();

        if count_retry && msg.retry_count >= self.global.max_retry {
            error!(
                %key,
                retries = msg.retry_count,
                "message exceeded the retry limit, marking as permanently failed"
            );

            if let Err(e) = self.store.put_failed(&key, &msg).await {
                error!(%key, "failed to record permanent failure: {e}");
            }
            if let Err(e) = self.store.delete(&key).await {
                error!(%key, "failed to delete failed message: {e}");
            }

            pending.lock().await.remove(&key);
            return;
        }

        if let Err(e) = self.store.put(&key, &msg).await {
            error!(%key, "failed to update message: {e}");
        }

        pending.lock().await.insert(msg);
    }
}

/// One retry-loop tick: route every pending message for `dst` whose source
/// finality delay has elapsed and whose backoff window is over.
async fn dispatch_eligible(
    dst: &NetworkId,
    provider: &dyn ChainProvider,
    providers: &BTreeMap<NetworkId, Arc<dyn ChainProvider>>,
    global: &GlobalConfig,
    pending: &Arc<Mutex<PendingState>>,
    completion_tx: &mpsc::UnboundedSender<Completion>,
) {
    let now = unix_now();

    let candidates: Vec<Message> = {
        let state = pending.lock().await;

        let Some(for_dst) = state.messages.get(dst) else {
            return;
        };

        for_dst
            .iter()
            .filter(|(key, _)| !state.routing.contains(*key))
            .filter(|(_, msg)| backoff_elapsed(msg, now, global))
            .map(|(_, msg)| msg.clone())
            .collect()
    };

    if candidates.is_empty() {
        return;
    }

    // The finality check needs each source's tip; query it once per tick.
    let mut latest_by_src: BTreeMap<NetworkId, u64> = BTreeMap::new();

    for msg in candidates {
        let key = msg.key();

        let Some(src_provider) = providers.get(&msg.src) else {
            warn!(%key, src = %msg.src, "source chain not configured, cannot check finality");
            continue;
        };

        let latest = match latest_by_src.get(&msg.src) {
            Some(latest) => *latest,
            None => match src_provider.query_latest_height().await {
                Ok(latest) => {
                    latest_by_src.insert(msg.src.clone(), latest);
                    latest
                }
                Err(e) => {
                    warn!(src = %msg.src, "failed to query source height: {e}");
                    continue;
                }
            },
        };

        if msg.message_height + src_provider.finality_block() > latest {
            debug!(
                %key,
                height = msg.message_height,
                latest,
                "waiting out the source finality delay"
            );
            continue;
        }

        pending.lock().await.routing.insert(key.clone());

        debug!(%key, attempt = msg.retry_count, "routing message");

        let cb_tx = completion_tx.clone();
        let callback: TxResponseFn = Box::new(move |key, response, error| {
            let _ = cb_tx.send(Completion {
                key,
                response,
                error,
            });
        });

        if let Err(e) = provider.route(msg.clone(), callback).await {
            // The callback was consumed without being invoked; synthesize
            // the completion so retry accounting still happens.
            let _ = completion_tx.send(Completion {
                key,
                response: None,
                error: Some(e),
            });
        }
    }
}

fn backoff_elapsed(msg: &Message, now: u64, global: &GlobalConfig) -> bool {
    if msg.last_tried_at == 0 {
        return true;
    }

    let delay = retry_delay(
        msg.retry_count,
        global.retry_base_delay,
        global.retry_max_delay,
    );

    now.saturating_sub(msg.last_tried_at) >= delay.as_secs()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    use centralized_relay_types::EventKind;

    fn message(retry_count: u8, last_tried_at: u64) -> Message {
        Message {
            src: NetworkId::from("chainA"),
            dst: NetworkId::from("chainB"),
            sn: 1,
            req_id: 0,
            event_kind: EventKind::EmitMessage,
            data: vec![],
            message_height: 10,
            retry_count,
            last_tried_at,
        }
    }

    #[test]
    fn untried_messages_are_immediately_eligible() {
        let global = GlobalConfig::default();

        assert!(backoff_elapsed(&message(0, 0), unix_now(), &global));
    }

    #[test]
    fn backoff_window_blocks_recent_attempts() {
        let global = GlobalConfig::default();
        let now = unix_now();

        // First retry waits at least the base delay.
        assert!(!backoff_elapsed(&message(1, now), now, &global));
        assert!(backoff_elapsed(
            &message(1, now - global.retry_base_delay.as_secs() * 2),
            now,
            &global
        ));
    }

    #[test]
    fn backoff_grows_with_retry_count() {
        let global = GlobalConfig::default();
        let now = unix_now();
        let base = global.retry_base_delay.as_secs();

        // Enough for one doubling but not three.
        let last_tried = now - base * 2;

        assert!(backoff_elapsed(&message(1, last_tried), now, &global));
        assert!(!backoff_elapsed(&message(3, last_tried), now, &global));
    }

    #[test]
    fn pending_state_groups_by_destination() {
        let mut state = PendingState::default();
        let msg = message(0, 0);
        let key = msg.key();

        state.insert(msg);
        assert!(state.messages[&NetworkId::from("chainB")].contains_key(&key));

        state.remove(&key);
        assert!(state.messages[&NetworkId::from("chainB")].is_empty());
    }
}
