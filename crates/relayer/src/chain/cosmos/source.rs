//! Event sourcing for a Cosmos-Wasm chain: the catch-up block query
//! pipeline and the realtime subscription tail.
//!
//! The pipeline fans a contiguous height range out over a bounded worker
//! pool; workers complete sub-ranges in arbitrary order and the listener
//! reassembles forward progress before anything reaches the supervisor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::available_parallelism;

use core::time::Duration;

use futures::stream::{select_all, StreamExt};
use itertools::Itertools;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use centralized_relay_types::BlockInfo;

use crate::chain::client::{ChainClient, EventFilter, TxSearchHit, TxSearchParam};
use crate::chain::cosmos::events::EventDecoder;
use crate::config::{ChainConfig, EventSourceMode};
use crate::error::Error;
use crate::util::retry::ConstantGrowth;

/// Width of the sub-ranges handed to pipeline workers.
const BLOCK_RANGE_WIDTH: u64 = 2;

/// Page size for `tx_search` queries.
const TX_SEARCH_PER_PAGE: u32 = 25;

/// Interval at which the chain's latest height is re-queried.
const HEIGHT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Shortened poll interval after a failed latest-height query.
const HEIGHT_POLL_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// In-worker fetch retry: starts at 1s, grows to a few seconds.
const FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);
const FETCH_RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

/// Consecutive subscription failures tolerated before the listener reports
/// the chain unhealthy.
const MAX_SUBSCRIPTION_RESTARTS: usize = 5;

const SUBSCRIPTION_RETRY_DELAY: Duration = Duration::from_secs(1);
const SUBSCRIPTION_RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// A fully scanned height: every matching transaction has been fetched and
/// decoded. `messages` may be empty.
#[derive(Clone, Debug)]
struct ScannedBlock {
    height: u64,
    messages: Vec<centralized_relay_types::Message>,
}

/// A contiguous sub-range completed by one worker, carrying a scan result
/// for every height in `[from, to]`.
#[derive(Debug)]
struct ScannedRange {
    from: u64,
    blocks: Vec<ScannedBlock>,
}

pub(super) struct ListenerContext<'a, C> {
    pub client: &'a Arc<C>,
    pub config: &'a ChainConfig,
    pub decoder: &'a EventDecoder,
}

/// Entry point of the chain listener. Streams ordered [`BlockInfo`]s into
/// `out` until cancelled; returns an error only on terminal failure.
pub(super) async fn run_listener<C: ChainClient + 'static>(
    ctx: ListenerContext<'_, C>,
    token: CancellationToken,
    last_saved_height: u64,
    out: mpsc::Sender<BlockInfo>,
) -> Result<(), Error> {
    let mut latest_height = ctx.client.latest_height().await.map_err(Error::client)?;

    let mut start_height = start_height(ctx.config.start_height, last_saved_height, latest_height)?;

    info!(height = start_height, "start from height");

    match ctx.config.event_source {
        EventSourceMode::Push => {
            if start_height <= latest_height {
                run_block_query(&ctx, &token, start_height, latest_height, &out).await?;
            }

            run_subscription_tail(&ctx, &token, latest_height + 1, &out).await
        }

        EventSourceMode::Pull => {
            let mut height_ticker = tokio::time::interval(ctx.config.block_interval);
            let mut height_poller = tokio::time::interval(HEIGHT_POLL_INTERVAL);

            // The first tick of a tokio interval fires immediately.
            height_ticker.tick().await;
            height_poller.tick().await;

            loop {
                if start_height <= latest_height {
                    debug!(
                        from_height = start_height,
                        to_height = latest_height,
                        "query started"
                    );

                    run_block_query(&ctx, &token, start_height, latest_height, &out).await?;
                    start_height = latest_height + 1;
                }

                tokio::select! {
                    _ = token.cancelled() => return Ok(()),

                    // Optimistic height bump between polls, to keep RPC
                    // load down at block-interval granularity.
                    _ = height_ticker.tick() => {
                        latest_height += 1;
                    }

                    _ = height_poller.tick() => {
                        match ctx.client.latest_height().await {
                            Ok(height) => {
                                latest_height = height;
                            }
                            Err(e) => {
                                error!("failed to query latest height: {e}");
                                height_poller.reset_after(HEIGHT_POLL_RETRY_INTERVAL);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Start-height resolution: an explicit configured height wins, then the
/// persisted cursor, then the chain tip. A cursor beyond the chain tip is
/// an invalid state that requires operator action.
pub(super) fn start_height(
    configured: u64,
    last_saved: u64,
    latest: u64,
) -> Result<u64, Error> {
    if last_saved > latest {
        return Err(Error::invalid_cursor(last_saved, latest));
    }

    if configured > 0 && configured < latest {
        return Ok(configured);
    }

    if last_saved > 0 && last_saved < latest {
        return Ok(last_saved);
    }

    Ok(latest)
}

/// Fans `[from_height, to_height]` out over a bounded worker pool and
/// forwards message-bearing heights to `out` in height order.
async fn run_block_query<C: ChainClient + 'static>(
    ctx: &ListenerContext<'_, C>,
    token: &CancellationToken,
    from_height: u64,
    to_height: u64,
    out: &mpsc::Sender<BlockInfo>,
) -> Result<(), Error> {
    let done = token.child_token();

    let workers = worker_count(from_height, to_height);
    let (range_tx, range_rx) = mpsc::channel::<(u64, u64)>(workers);
    let range_rx = Arc::new(Mutex::new(range_rx));

    // Height-range producer.
    let producer_done = done.clone();
    let producer = tokio::spawn(async move {
        let mut from = from_height;

        while from <= to_height {
            let to = (from + BLOCK_RANGE_WIDTH - 1).min(to_height);

            tokio::select! {
                _ = producer_done.cancelled() => return,
                res = range_tx.send((from, to)) => {
                    if res.is_err() {
                        return;
                    }
                }
            }

            from = to + 1;
        }
    });

    let (scan_tx, mut scan_rx) = mpsc::channel::<ScannedRange>(workers);

    let mut worker_handles = Vec::with_capacity(workers);

    for _ in 0..workers {
        let client = ctx.client.clone();
        let decoder = ctx.decoder.clone();
        let filters = ctx.decoder.monitor_filters();
        let ranges = range_rx.clone();
        let results = scan_tx.clone();
        let worker_done = done.clone();

        worker_handles.push(tokio::spawn(async move {
            loop {
                let range = {
                    let mut rx = ranges.lock().await;

                    tokio::select! {
                        _ = worker_done.cancelled() => return,
                        range = rx.recv() => range,
                    }
                };

                let Some((from, to)) = range else {
                    return;
                };

                let Some(scanned) =
                    scan_range(client.as_ref(), &decoder, &filters, &worker_done, from, to).await
                else {
                    return;
                };

                if results.send(scanned).await.is_err() {
                    return;
                }
            }
        }));
    }

    // Drop our clone so the fan-in channel closes once all workers exit.
    drop(scan_tx);

    // Reassemble forward progress: ranges complete in arbitrary order, the
    // supervisor must see heights in order.
    let mut pending: BTreeMap<u64, ScannedRange> = BTreeMap::new();
    let mut next_height = from_height;

    while let Some(scanned) = scan_rx.recv().await {
        pending.insert(scanned.from, scanned);

        while let Some(range) = pending.remove(&next_height) {
            for block in range.blocks {
                next_height = block.height + 1;

                if block.messages.is_empty() {
                    continue;
                }

                let info = BlockInfo {
                    height: block.height,
                    messages: block.messages,
                };

                if out.send(info).await.is_err() {
                    done.cancel();
                    return Err(Error::channel_closed());
                }
            }
        }
    }

    producer.abort();
    for handle in worker_handles {
        let _ = handle.await;
    }

    if token.is_cancelled() {
        return Ok(());
    }

    // All workers are gone; either every range was delivered or the scan
    // was cancelled mid-flight.
    if next_height <= to_height && !done.is_cancelled() {
        return Err(Error::channel_closed());
    }

    Ok(())
}

fn worker_count(from_height: u64, to_height: u64) -> usize {
    let cpus = available_parallelism().map(|n| n.get()).unwrap_or(1);
    let ranges = (to_height - from_height + BLOCK_RANGE_WIDTH) / BLOCK_RANGE_WIDTH;

    cpus.min(ranges as usize).max(1)
}

/// Scans one sub-range: a complete, paged `tx_search` per filter, merged
/// and decoded. Transient fetch errors retry with backoff until success or
/// cancellation (in which case `None` is returned).
async fn scan_range<C: ChainClient>(
    client: &C,
    decoder: &EventDecoder,
    filters: &[EventFilter],
    done: &CancellationToken,
    from: u64,
    to: u64,
) -> Option<ScannedRange> {
    let mut hits: Vec<TxSearchHit> = Vec::new();

    for filter in filters {
        let mut page = 1u32;

        loop {
            let param = TxSearchParam {
                from_height: from,
                to_height: to,
                filter: filter.clone(),
                page,
                per_page: TX_SEARCH_PER_PAGE,
            };

            let response = fetch_page_with_retry(client, param, done).await?;
            let total_count = response.total_count;

            hits.extend(response.txs);

            // Paging must be complete before anything is emitted.
            if u64::from(page) * u64::from(TX_SEARCH_PER_PAGE) >= u64::from(total_count) {
                break;
            }

            page += 1;
        }
    }

    let mut blocks: BTreeMap<u64, Vec<centralized_relay_types::Message>> =
        (from..=to).map(|height| (height, Vec::new())).collect();

    // A transaction can match several filters; decode it once.
    for hit in hits.into_iter().unique_by(|hit| hit.tx_hash.clone()) {
        match decoder.decode_log(&hit.log, hit.height) {
            Ok(messages) => {
                for msg in &messages {
                    info!(
                        height = msg.message_height,
                        target_network = %msg.dst,
                        sn = msg.sn,
                        event_kind = %msg.event_kind,
                        "detected eventlog"
                    );
                }

                blocks.entry(hit.height).or_default().extend(messages);
            }
            Err(e) => {
                // Decode failures are transaction-scoped: skip the tx.
                warn!(tx_hash = %hit.tx_hash, "failed to decode tx events: {e}");
            }
        }
    }

    Some(ScannedRange {
        from,
        blocks: blocks
            .into_iter()
            .map(|(height, messages)| ScannedBlock { height, messages })
            .collect(),
    })
}

async fn fetch_page_with_retry<C: ChainClient>(
    client: &C,
    param: TxSearchParam,
    done: &CancellationToken,
) -> Option<crate::chain::client::TxSearchResponse> {
    let mut backoff = ConstantGrowth::new(FETCH_RETRY_DELAY, Duration::from_secs(1))
        .clamp(FETCH_RETRY_MAX_DELAY);

    loop {
        match client.tx_search(param.clone()).await {
            Ok(response) => return Some(response),
            Err(e) => {
                let delay = backoff.next().expect("backoff is an infinite iterator");

                error!(
                    from_height = param.from_height,
                    to_height = param.to_height,
                    "failed to fetch block txs: {e}, retrying in {delay:?}"
                );

                tokio::select! {
                    _ = done.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Realtime tail: one server-push subscription per monitored contract,
/// starting at `from_height`. Read errors re-establish the subscriptions
/// with backoff; repeated failures bubble up so the supervisor can back the
/// whole chain off.
async fn run_subscription_tail<C: ChainClient>(
    ctx: &ListenerContext<'_, C>,
    token: &CancellationToken,
    from_height: u64,
    out: &mpsc::Sender<BlockInfo>,
) -> Result<(), Error> {
    let mut restart_backoff =
        ConstantGrowth::new(SUBSCRIPTION_RETRY_DELAY, Duration::from_secs(2))
            .clamp(SUBSCRIPTION_RETRY_MAX_DELAY);
    let mut consecutive_failures = 0usize;

    // Resume point: never re-deliver a height the tail has already seen.
    let mut resume_height = from_height;

    loop {
        if token.is_cancelled() {
            return Ok(());
        }

        let resume_before = resume_height;

        match subscribe_once(ctx, token, resume_height, out, &mut resume_height).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                // Progress since the last restart means the chain is
                // healthy enough; start counting afresh.
                if resume_height > resume_before {
                    consecutive_failures = 0;
                    restart_backoff =
                        ConstantGrowth::new(SUBSCRIPTION_RETRY_DELAY, Duration::from_secs(2))
                            .clamp(SUBSCRIPTION_RETRY_MAX_DELAY);
                }

                consecutive_failures += 1;

                if consecutive_failures >= MAX_SUBSCRIPTION_RESTARTS {
                    return Err(e);
                }

                let delay = restart_backoff
                    .next()
                    .expect("backoff is an infinite iterator");

                warn!("event subscription interrupted: {e}, re-subscribing in {delay:?}");

                tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

async fn subscribe_once<C: ChainClient>(
    ctx: &ListenerContext<'_, C>,
    token: &CancellationToken,
    from_height: u64,
    out: &mpsc::Sender<BlockInfo>,
    resume_height: &mut u64,
) -> Result<(), Error> {
    let mut streams = Vec::new();

    for filter in ctx.decoder.monitor_filters() {
        let query = format!(
            "tm.event = 'Tx' AND tx.height >= {} AND {}",
            from_height,
            filter.to_query()
        );

        let stream = ctx
            .client
            .subscribe(query)
            .await
            .map_err(|e| Error::subscription(e.to_string()))?;

        streams.push(stream);
    }

    let mut merged = select_all(streams);

    info!(height = from_height, "started realtime event listener");

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),

            event = merged.next() => {
                let event = match event {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => return Err(Error::subscription(e.to_string())),
                    None => return Err(Error::subscription("event stream ended".to_string())),
                };

                trace!(height = event.height, tx_hash = %event.tx_hash, "subscription event");

                if event.code != 0 {
                    continue;
                }

                // Decode failures are transaction-scoped: skip the tx.
                let messages = match ctx.decoder.decode_log(&event.log, event.height) {
                    Ok(messages) => messages,
                    Err(e) => {
                        warn!(tx_hash = %event.tx_hash, "failed to decode tx events: {e}");
                        continue;
                    }
                };

                if event.height >= *resume_height {
                    *resume_height = event.height + 1;
                }

                if messages.is_empty() {
                    continue;
                }

                let info = BlockInfo {
                    height: event.height,
                    messages,
                };

                if out.send(info).await.is_err() {
                    return Err(Error::channel_closed());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_start_height_wins_when_below_latest() {
        assert_eq!(start_height(30, 40, 50).unwrap(), 30);
    }

    #[test]
    fn saved_cursor_is_used_when_no_configured_height() {
        assert_eq!(start_height(0, 40, 50).unwrap(), 40);
    }

    #[test]
    fn falls_back_to_latest_height() {
        assert_eq!(start_height(0, 0, 50).unwrap(), 50);
        assert_eq!(start_height(0, 50, 50).unwrap(), 50);
        assert_eq!(start_height(60, 0, 50).unwrap(), 50);
    }

    #[test]
    fn cursor_beyond_tip_is_invalid() {
        assert!(start_height(0, 51, 50).is_err());
    }

    #[test]
    fn worker_count_is_bounded_by_range() {
        assert_eq!(worker_count(10, 10), 1);
        assert_eq!(worker_count(10, 11), 1);
        assert!(worker_count(1, 1000) <= available_parallelism().map(|n| n.get()).unwrap_or(1));
    }
}
