//! Chain-facing abstractions and the chain-family providers built on them.

pub mod client;
pub mod cosmos;
pub mod provider;

pub use client::{ChainClient, ClientError};
pub use cosmos::CosmosProvider;
pub use provider::ChainProvider;
