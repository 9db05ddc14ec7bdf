//! Awaiting inclusion of a broadcast transaction.
//!
//! Two interchangeable strategies sit behind [`wait_for_tx_result`]: a
//! server-push subscription on the transaction hash, and receipt polling.
//! The choice follows the chain's event-source mode. Either way exactly one
//! terminal result is produced; a timeout is never treated as delivery.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use centralized_relay_types::{ResponseCode, TxResponse};

use crate::chain::client::ChainClient;
use crate::config::{ChainConfig, EventSourceMode};
use crate::error::Error;

pub async fn wait_for_tx_result<C: ChainClient>(
    client: &C,
    config: &ChainConfig,
    token: &CancellationToken,
    tx_hash: &str,
) -> Result<TxResponse, Error> {
    match config.event_source {
        EventSourceMode::Push => subscribe_tx_result(client, config, token, tx_hash).await,
        EventSourceMode::Pull => poll_tx_result(client, config, token, tx_hash).await,
    }
}

/// Subscribe to `tm.event = 'Tx' AND tx.hash = 'H'` and wait for the single
/// matching event, bounded by the chain's wait timeout.
async fn subscribe_tx_result<C: ChainClient>(
    client: &C,
    config: &ChainConfig,
    token: &CancellationToken,
    tx_hash: &str,
) -> Result<TxResponse, Error> {
    let query = format!("tm.event = 'Tx' AND tx.hash = '{tx_hash}'");

    let mut stream = client
        .subscribe(query)
        .await
        .map_err(|e| Error::subscription(e.to_string()))?;

    let event = tokio::select! {
        _ = token.cancelled() => return Err(Error::cancelled()),

        _ = tokio::time::sleep(config.tx_wait_timeout) => {
            return Err(Error::tx_timeout(tx_hash.to_string()));
        }

        event = stream.next() => match event {
            Some(Ok(event)) => event,
            Some(Err(e)) => return Err(Error::subscription(e.to_string())),
            None => return Err(Error::subscription("tx result stream ended".to_string())),
        },
    };

    let response = TxResponse {
        height: event.height as i64,
        tx_hash: tx_hash.to_string(),
        codespace: String::new(),
        code: ResponseCode::from_u32(event.code),
        data: String::new(),
    };

    if event.code != 0 {
        return Err(Error::tx_failed(
            tx_hash.to_string(),
            event.code,
            event.log,
        ));
    }

    Ok(response)
}

/// Poll the transaction receipt at the confirmation interval until it is
/// found or the wait timeout elapses.
async fn poll_tx_result<C: ChainClient>(
    client: &C,
    config: &ChainConfig,
    token: &CancellationToken,
    tx_hash: &str,
) -> Result<TxResponse, Error> {
    let started = tokio::time::Instant::now();

    let mut ticker = tokio::time::interval(config.tx_confirmation_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => return Err(Error::cancelled()),
            _ = ticker.tick() => {}
        }

        match client.tx_receipt(tx_hash).await {
            Ok(response) => {
                if let ResponseCode::Err(code) = response.code {
                    return Err(Error::tx_failed(
                        tx_hash.to_string(),
                        code,
                        response.data.clone(),
                    ));
                }

                return Ok(response);
            }

            Err(e) => {
                trace!(tx_hash, "tx not yet included: {e}");

                if started.elapsed() > config.tx_wait_timeout {
                    return Err(Error::tx_timeout(tx_hash.to_string()));
                }
            }
        }
    }
}
