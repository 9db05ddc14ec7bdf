//! Submission with account-sequence discipline.
//!
//! The wallet's cached sequence can go stale when the same account is used
//! by another agent or when the mempool drops a transaction. Both failure
//! surfaces are handled here: a sequence-mismatch error from gas
//! estimation, and a sequence-mismatch response code from the broadcast
//! itself. Either way the account is re-read from the chain and the
//! submission retried once.

use core::time::Duration;

use tracing::{debug, error, warn};

use crate::chain::client::{BroadcastResponse, ChainClient};
use crate::chain::cosmos::tx::estimate_fee_and_send_tx;
use crate::chain::cosmos::types::WalletState;
use crate::config::ChainConfig;
use crate::error::Error;

/// Delay before retrying in the case of account sequence mismatch.
const ACCOUNT_SEQUENCE_RETRY_DELAY: Duration = Duration::from_millis(300);

/// The unique code of the "incorrect account sequence" error in the
/// cosmos-sdk.
const INCORRECT_ACCOUNT_SEQUENCE_ERR: u32 = 32;

/// Try to send a contract execution, retrying once on account sequence
/// mismatch with a re-fetched account.
///
/// Must be called with the wallet lock held. On a successful broadcast the
/// wallet's cached sequence is advanced and the mempool-blocked flag
/// cleared; a blocked wallet is refreshed from the chain before the first
/// attempt.
pub async fn send_tx_with_account_sequence_retry<C: ChainClient>(
    client: &C,
    config: &ChainConfig,
    wallet: &mut WalletState,
    contract: String,
    payload: Vec<u8>,
) -> Result<BroadcastResponse, Error> {
    let account = match wallet.account {
        Some(account) if !wallet.needs_refresh() => account,
        _ => refresh_account(client, config, wallet).await?,
    };

    match estimate_fee_and_send_tx(client, config, account, contract.clone(), payload.clone())
        .await
    {
        // The cached account sequence went stale during gas estimation.
        Err(ref e) if e.is_sequence_mismatch() => {
            warn!(
                error = %e,
                "failed to estimate gas because of a mismatched account sequence number, \
                refreshing account sequence number and retrying once",
            );

            wallet.mempool_blocked = true;

            refresh_and_retry(client, config, wallet, contract, payload).await
        }

        // Gas estimation succeeded but CheckTx rejected the sequence.
        Ok(ref response) if response.code == INCORRECT_ACCOUNT_SEQUENCE_ERR => {
            warn!(
                ?response,
                "failed to broadcast tx because of a mismatched account sequence number, \
                refreshing account sequence number and retrying once"
            );

            wallet.mempool_blocked = true;

            refresh_and_retry(client, config, wallet, contract, payload).await
        }

        Ok(response) => {
            if response.code == 0 {
                let old_sequence = account.sequence;

                wallet.record_broadcast();

                debug!(
                    tx_hash = %response.tx_hash,
                    sequence.old = old_sequence,
                    sequence.new = old_sequence + 1,
                    "tx was successfully broadcasted, increasing account sequence number"
                );

                Ok(response)
            } else {
                // CheckTx failed; the sequence was not consumed, so the
                // cached value stays.
                error!(?response, "failed to broadcast tx with unrecoverable error");

                Err(Error::broadcast(response.raw_log.clone()))
            }
        }

        Err(e) => {
            error!(error = %e, "gas estimation failed or encountered another unrecoverable error");

            Err(e)
        }
    }
}

async fn refresh_and_retry<C: ChainClient>(
    client: &C,
    config: &ChainConfig,
    wallet: &mut WalletState,
    contract: String,
    payload: Vec<u8>,
) -> Result<BroadcastResponse, Error> {
    let account = refresh_account(client, config, wallet).await?;

    tokio::time::sleep(ACCOUNT_SEQUENCE_RETRY_DELAY).await;

    let response = estimate_fee_and_send_tx(client, config, account, contract, payload).await?;

    if response.code == 0 {
        wallet.record_broadcast();

        Ok(response)
    } else {
        Err(Error::broadcast(response.raw_log.clone()))
    }
}

/// Re-read the wallet's account number and sequence from the chain.
pub async fn refresh_account<C: ChainClient>(
    client: &C,
    config: &ChainConfig,
    wallet: &mut WalletState,
) -> Result<crate::chain::client::AccountInfo, Error> {
    let account = client
        .account_info(&config.address)
        .await
        .map_err(Error::client)?;

    debug!(
        account_number = account.account_number,
        sequence = account.sequence,
        "refreshed account from chain"
    );

    wallet.account = Some(account);

    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::chain::client::{AccountInfo, ClientError};
    use crate::config::ChainConfig;
    use crate::mock::{BroadcastScript, MockChain};

    fn config() -> ChainConfig {
        crate::chain::cosmos::tests::test_config("chainB")
    }

    fn wallet(sequence: u64) -> WalletState {
        WalletState {
            account: Some(AccountInfo {
                account_number: 1,
                sequence,
            }),
            mempool_blocked: false,
        }
    }

    #[tokio::test]
    async fn broadcast_mismatch_refreshes_and_retries_once() {
        let chain = Arc::new(MockChain::new());
        chain.set_account(AccountInfo {
            account_number: 1,
            sequence: 105,
        });
        chain.script_broadcast(BroadcastScript::Error(ClientError::sequence_mismatch(
            "expected 105, got 100".to_string(),
        )));

        let mut wallet = wallet(100);

        let response =
            send_tx_with_account_sequence_retry(chain.as_ref(), &config(), &mut wallet, "chainB-conn".to_string(), b"{}".to_vec())
                .await
                .unwrap();

        assert_eq!(response.code, 0);
        assert_eq!(wallet.account.unwrap().sequence, 106);
        assert!(!wallet.mempool_blocked);

        // Only the retry reached the chain, with the refreshed sequence.
        let broadcasts = chain.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].sequence, 105);
    }

    #[tokio::test]
    async fn check_tx_sequence_code_also_triggers_the_retry() {
        let chain = Arc::new(MockChain::new());
        chain.set_account(AccountInfo {
            account_number: 1,
            sequence: 50,
        });
        chain.script_broadcast(BroadcastScript::Code(
            INCORRECT_ACCOUNT_SEQUENCE_ERR,
            "account sequence mismatch".to_string(),
        ));

        let mut wallet = wallet(48);

        let response =
            send_tx_with_account_sequence_retry(chain.as_ref(), &config(), &mut wallet, "chainB-conn".to_string(), b"{}".to_vec())
                .await
                .unwrap();

        assert_eq!(response.code, 0);
        assert_eq!(wallet.account.unwrap().sequence, 51);
    }

    #[tokio::test]
    async fn blocked_wallet_refreshes_before_submitting() {
        let chain = Arc::new(MockChain::new());
        chain.set_account(AccountInfo {
            account_number: 1,
            sequence: 7,
        });

        let mut wallet = wallet(3);
        wallet.mempool_blocked = true;

        send_tx_with_account_sequence_retry(chain.as_ref(), &config(), &mut wallet, "chainB-conn".to_string(), b"{}".to_vec())
            .await
            .unwrap();

        let broadcasts = chain.broadcasts();
        assert_eq!(broadcasts[0].sequence, 7);
        assert_eq!(wallet.account.unwrap().sequence, 8);
        assert!(!wallet.mempool_blocked);
    }

    #[tokio::test]
    async fn unrecoverable_broadcast_error_keeps_the_sequence() {
        let chain = Arc::new(MockChain::new());
        chain.set_account(AccountInfo {
            account_number: 1,
            sequence: 10,
        });
        chain.script_broadcast(BroadcastScript::Code(13, "out of gas".to_string()));

        let mut wallet = wallet(10);

        let result = send_tx_with_account_sequence_retry(
            chain.as_ref(),
            &config(),
            &mut wallet,
            "chainB-conn".to_string(),
            b"{}".to_vec(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(wallet.account.unwrap().sequence, 10);
    }

    #[tokio::test]
    async fn configured_default_gas_skips_simulation() {
        let chain = Arc::new(MockChain::new());
        // Any simulation attempt would fail; the fixed gas must bypass it.
        chain.script_simulate_error(ClientError::rpc("simulation unsupported".to_string()));

        let mut config = config();
        config.default_gas = Some(50_000);

        let mut wallet = wallet(0);

        send_tx_with_account_sequence_retry(
            chain.as_ref(),
            &config,
            &mut wallet,
            "chainB-conn".to_string(),
            b"{}".to_vec(),
        )
        .await
        .unwrap();

        let broadcasts = chain.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].gas_limit, 50_000);
    }

    #[tokio::test]
    async fn gas_out_of_bounds_is_rejected_before_broadcast() {
        let chain = Arc::new(MockChain::new());
        chain.set_simulated_gas(10);

        let mut wallet = wallet(0);

        let result = send_tx_with_account_sequence_retry(
            chain.as_ref(),
            &config(),
            &mut wallet,
            "chainB-conn".to_string(),
            b"{}".to_vec(),
        )
        .await;

        assert!(result.is_err());
        assert!(chain.broadcasts().is_empty());
    }
}
