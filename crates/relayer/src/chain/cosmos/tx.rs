//! Gas estimation and broadcast of a contract execution.

use tracing::debug;

use crate::chain::client::{AccountInfo, BroadcastResponse, ChainClient, TxDraft};
use crate::config::ChainConfig;
use crate::error::Error;

/// Determine the gas for the execution under the given account sequence,
/// check it against the configured bounds, and push the transaction to the
/// mempool.
///
/// Gas is simulated and multiplied by the configured adjustment unless the
/// chain carries a fixed `default_gas`, in which case estimation is
/// skipped and the fixed amount is used as-is.
///
/// Must be called with the wallet lock held. Does not mutate the wallet;
/// sequence accounting is the caller's job.
pub async fn estimate_fee_and_send_tx<C: ChainClient>(
    client: &C,
    config: &ChainConfig,
    account: AccountInfo,
    contract: String,
    payload: Vec<u8>,
) -> Result<BroadcastResponse, Error> {
    let mut draft = TxDraft {
        contract,
        payload,
        account_number: account.account_number,
        sequence: account.sequence,
        gas_limit: 0,
    };

    let gas_limit = match config.default_gas {
        Some(gas) => gas,

        None => {
            let gas_used = client.simulate(&draft).await.map_err(Error::client)?;
            let adjusted = config.gas_adjustment.apply(gas_used);

            debug!(
                estimated = gas_used,
                adjusted,
                sequence = draft.sequence,
                "gas estimation succeeded"
            );

            adjusted
        }
    };

    if gas_limit == 0 {
        return Err(Error::zero_gas());
    }

    if gas_limit < config.min_gas || gas_limit > config.max_gas {
        return Err(Error::gas_bounds(gas_limit, config.min_gas, config.max_gas));
    }

    draft.gas_limit = gas_limit;

    client.broadcast_tx(&draft).await.map_err(Error::client)
}
