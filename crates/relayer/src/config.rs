//! Relay configuration.

pub mod error;
pub mod gas_adjustment;

use core::cmp::Ordering;
use core::fmt::{Display, Error as FmtError, Formatter};
use core::str::FromStr;
use core::time::Duration;

use serde_derive::{Deserialize, Serialize};

use centralized_relay_types::NetworkId;

pub use error::Error as ConfigError;
pub use gas_adjustment::GasAdjustment;

/// Gas price in the chain's fee denomination, e.g. `0.025uarch`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GasPrice {
    pub price: f64,
    pub denom: String,
}

impl GasPrice {
    pub const fn new(price: f64, denom: String) -> Self {
        Self { price, denom }
    }
}

impl Display for GasPrice {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "{}{}", self.price, self.denom)
    }
}

impl FromStr for GasPrice {
    type Err = ConfigError;

    fn from_str(price_in: &str) -> Result<Self, Self::Err> {
        let spos = price_in.find(char::is_alphabetic);

        match spos {
            Some(position) => {
                let (price_str, denom) = price_in.split_at(position);

                let price = price_str
                    .parse::<f64>()
                    .map_err(|_| ConfigError::invalid_gas_price(price_in.to_string()))?;

                Ok(GasPrice {
                    price,
                    denom: denom.to_owned(),
                })
            }

            None => Err(ConfigError::invalid_gas_price(price_in.to_string())),
        }
    }
}

impl TryFrom<String> for GasPrice {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<GasPrice> for String {
    fn from(gp: GasPrice) -> Self {
        gp.to_string()
    }
}

// Gas prices are only comparable within the same denomination.
impl PartialOrd for GasPrice {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.denom == other.denom {
            self.price.partial_cmp(&other.price)
        } else {
            None
        }
    }
}

/// Addresses of the two destination-side contracts the relay talks to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractSet {
    /// Executes cross-chain call payloads (`CallMessage`, `ExecuteRollback`).
    pub xcall: String,

    /// Accepts transport-layer messages (`EmitMessage` and control events).
    pub connection: String,
}

impl ContractSet {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.xcall.is_empty() {
            return Err(ConfigError::missing_contract_address("xcall".to_string()));
        }

        if self.connection.is_empty() {
            return Err(ConfigError::missing_contract_address(
                "connection".to_string(),
            ));
        }

        Ok(())
    }
}

/// How a chain's events are sourced, and with it how transaction inclusion
/// is awaited: `Push` chains get a server-side subscription plus a
/// subscribe-based result waiter, `Pull` chains are polled.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum EventSourceMode {
    Push,
    #[serde(alias = "poll")]
    Pull,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    /// The network identifier of this chain within the relay topology.
    pub nid: NetworkId,

    pub chain_name: String,

    /// The chain's own identifier, e.g. `archway-1`.
    pub chain_id: String,

    pub rpc_url: String,

    /// Height to start listening from; 0 resumes from the persisted cursor.
    #[serde(default)]
    pub start_height: u64,

    pub contracts: ContractSet,

    pub gas_prices: GasPrice,

    #[serde(default)]
    pub gas_adjustment: GasAdjustment,

    /// Fixed gas amount for chains without simulation support; when set,
    /// gas estimation is skipped and this amount is used as-is.
    #[serde(default)]
    pub default_gas: Option<u64>,

    pub min_gas: u64,

    pub max_gas: u64,

    /// Confirmations required before a source event may be forwarded.
    #[serde(default)]
    pub finality_block: u64,

    /// Expected block production interval, used to pace catch-up queries and
    /// the per-destination retry loop.
    #[serde(default = "default::block_interval", with = "humantime_serde")]
    pub block_interval: Duration,

    /// Polling interval of the transaction result waiter.
    #[serde(default = "default::tx_confirmation_interval", with = "humantime_serde")]
    pub tx_confirmation_interval: Duration,

    /// Maximum time to wait for inclusion of a broadcast transaction.
    #[serde(default = "default::tx_wait_timeout", with = "humantime_serde")]
    pub tx_wait_timeout: Duration,

    /// Fee denomination, also used for balance queries.
    pub denomination: String,

    /// The relay wallet address on this chain.
    pub address: String,

    pub event_source: EventSourceMode,
}

impl ChainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.contracts.validate()?;

        if self.max_gas < self.min_gas {
            return Err(ConfigError::invalid_gas_bounds(self.min_gas, self.max_gas));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Delivery attempts before a message is marked permanently failed.
    #[serde(default = "default::max_retry")]
    pub max_retry: u8,

    /// Base delay of the exponential per-message retry backoff.
    #[serde(default = "default::retry_base_delay", with = "humantime_serde")]
    pub retry_base_delay: Duration,

    /// Cap on the per-message retry backoff.
    #[serde(default = "default::retry_max_delay", with = "humantime_serde")]
    pub retry_max_delay: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_retry: default::max_retry(),
            retry_base_delay: default::retry_base_delay(),
            retry_max_delay: default::retry_max_delay(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

impl Config {
    pub fn find_chain(&self, nid: &NetworkId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| &c.nid == nid)
    }

    /// Startup validation; any failure here aborts the process.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for chain in &self.chains {
            chain
                .validate()
                .map_err(|e| ConfigError::chain(chain.nid.clone(), Box::new(e)))?;
        }

        Ok(())
    }
}

pub mod default {
    use core::time::Duration;

    pub fn max_retry() -> u8 {
        5
    }

    pub fn retry_base_delay() -> Duration {
        Duration::from_secs(3)
    }

    pub fn retry_max_delay() -> Duration {
        Duration::from_secs(5 * 60)
    }

    pub fn block_interval() -> Duration {
        Duration::from_secs(6)
    }

    pub fn tx_confirmation_interval() -> Duration {
        Duration::from_secs(6)
    }

    pub fn tx_wait_timeout() -> Duration {
        Duration::from_secs(120)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_toml() -> String {
        r#"
            nid = 'chainA'
            chain_name = 'archway'
            chain_id = 'archway-1'
            rpc_url = 'http://localhost:26657'
            gas_prices = '0.025uarch'
            min_gas = 20000
            max_gas = 4000000
            denomination = 'uarch'
            address = 'archway1xyz'

            [contracts]
            xcall = 'archway1xcall'
            connection = 'archway1conn'

            [event_source]
            mode = 'pull'
        "#
        .to_string()
    }

    #[test]
    fn parse_chain_config() {
        let config: ChainConfig = toml::from_str(&chain_toml()).expect("could not parse config");

        assert_eq!(config.nid, NetworkId::from("chainA"));
        assert_eq!(config.gas_prices.denom, "uarch");
        assert_eq!(config.event_source, EventSourceMode::Pull);
        assert_eq!(config.block_interval, default::block_interval());
        assert_eq!(config.default_gas, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let toml_content = format!("{}\nnot_a_key = 42\n", chain_toml());

        assert!(toml::from_str::<ChainConfig>(&toml_content).is_err());
    }

    #[test]
    fn gas_bounds_are_checked() {
        let toml_content = chain_toml()
            .replace("min_gas = 20000", "min_gas = 5000000")
            .replace("max_gas = 4000000", "max_gas = 100");

        let config: ChainConfig = toml::from_str(&toml_content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_gas_price() {
        let gp: GasPrice = "0.025uarch".parse().unwrap();
        assert_eq!(gp.price, 0.025);
        assert_eq!(gp.denom, "uarch");

        assert!("uarch".parse::<GasPrice>().is_err());
        assert!("0.025".parse::<GasPrice>().is_err());
    }

    #[test]
    fn gas_prices_compare_within_denom_only() {
        let low: GasPrice = "0.025uarch".parse().unwrap();
        let high: GasPrice = "0.5uarch".parse().unwrap();
        let other: GasPrice = "0.5uatom".parse().unwrap();

        assert!(low < high);
        assert_eq!(low.partial_cmp(&other), None);
    }
}
